//! Exception entry: stack frame construction and vector fetch for every
//! exception kind, from reset down to trace. The unit drains one pending
//! exception per activation; the CPU top routes ticks here instead of the
//! instruction unit while it works.

use crate::bus::AddrSpace;
use crate::error::{CpuError, CpuResult};
use crate::exception::{AccessFault, ExceptionManager, ExceptionType};
use crate::instructions::ExecCtx;
use crate::scheduler::{OnComplete, WriteOrder};
use crate::size::OpSize;
use bincode::{Decode, Encode};

const VECTOR_BUS_ERROR: u32 = 0x08;
const VECTOR_ADDRESS_ERROR: u32 = 0x0C;

fn vector_of(ex: ExceptionType) -> u8 {
    match ex {
        ExceptionType::IllegalInstruction => 4,
        ExceptionType::DivideByZero => 5,
        ExceptionType::Chk => 6,
        ExceptionType::TrapV => 7,
        ExceptionType::Privilege => 8,
        ExceptionType::Trace => 9,
        ExceptionType::LineA => 10,
        ExceptionType::LineF => 11,
        _ => unreachable!("vectored through an operand record"),
    }
}

/// Acceptance order when several exceptions are pending at once.
const PRIORITY: [ExceptionType; 13] = [
    ExceptionType::Reset,
    ExceptionType::AddressError,
    ExceptionType::BusError,
    ExceptionType::IllegalInstruction,
    ExceptionType::Privilege,
    ExceptionType::DivideByZero,
    ExceptionType::Chk,
    ExceptionType::TrapV,
    ExceptionType::Trap,
    ExceptionType::LineA,
    ExceptionType::LineF,
    ExceptionType::Trace,
    ExceptionType::Interrupt,
];

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct ExceptionUnit {
    active: bool,
    current: ExceptionType,
    phase: u8,
    fault: AccessFault,
    trap_vector: u8,
    int_priority: u8,
}

impl ExceptionUnit {
    pub fn new() -> Self {
        Self {
            active: false,
            current: ExceptionType::Reset,
            phase: 0,
            fault: AccessFault::default(),
            trap_vector: 0,
            int_priority: 0,
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.phase = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn current(&self) -> ExceptionType {
        self.current
    }

    /// Reset and access faults preempt whatever is running; everything else
    /// waits for an instruction boundary.
    pub fn has_work(exman: &ExceptionManager, at_boundary: bool) -> bool {
        if exman.is_raised(ExceptionType::Reset)
            || exman.is_raised(ExceptionType::AddressError)
            || exman.is_raised(ExceptionType::BusError)
        {
            return true;
        }
        at_boundary && exman.any_raised()
    }

    /// Pick the highest-priority pending exception and make it current. The
    /// caller has already run the abort hook.
    pub fn accept(&mut self, exman: &mut ExceptionManager) -> CpuResult<()> {
        let ex = PRIORITY
            .into_iter()
            .find(|&ex| exman.is_raised(ex))
            .ok_or(CpuError::Internal("exception unit activated with nothing pending"))?;

        match ex {
            ExceptionType::AddressError => self.fault = exman.accept_address_error(),
            ExceptionType::BusError => self.fault = exman.accept_bus_error(),
            ExceptionType::Trap => self.trap_vector = exman.accept_trap(),
            ExceptionType::Interrupt => self.int_priority = exman.accept_interrupt(),
            _ => exman.accept(ex),
        }

        log::debug!("entering exception {ex:?}");
        self.current = ex;
        self.phase = 0;
        self.active = true;
        Ok(())
    }

    pub fn cycle(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        if !ctx.scheduler.is_idle() {
            return Ok(());
        }
        match self.current {
            ExceptionType::Reset => self.reset_entry(ctx),
            ExceptionType::AddressError | ExceptionType::BusError => self.fault_entry(ctx),
            ExceptionType::Interrupt => self.interrupt_entry(ctx),
            ExceptionType::Trap => {
                let vector = self.trap_vector;
                self.trap_entry(ctx, vector);
                Ok(())
            }
            ex => {
                let vector = vector_of(ex);
                self.trap_entry(ctx, vector);
                Ok(())
            }
        }
    }

    fn reset_entry(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        ctx.regs.sr.supervisor = true;
        ctx.regs.sr.trace = false;
        ctx.regs.sr.interrupt_mask = 7;

        ctx.scheduler.read(0x0000_0000, OpSize::LongWord, AddrSpace::Data, OnComplete::LoadSsp);
        ctx.scheduler.read(0x0000_0004, OpSize::LongWord, AddrSpace::Data, OnComplete::LoadPc);
        ctx.scheduler.prefetch_two();

        self.active = false;
        Ok(())
    }

    /// Seven-word address/bus error frame, pushed in the hardware's order:
    /// PC low, SR, PC high, IRD, fault address low, status word, fault
    /// address high.
    fn fault_entry(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let mut fault = self.fault;
        correct_fault_pc(ctx.regs.sird, &mut fault);

        ctx.scheduler.wait(3);

        let sr = ctx.regs.status();

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, fault.pc & 0xFFFF, OpSize::Word, WriteOrder::LswFirst);
        ctx.scheduler.write(
            ctx.regs.ssp.wrapping_sub(4),
            sr.into(),
            OpSize::Word,
            WriteOrder::LswFirst,
        );

        ctx.regs.sr.supervisor = true;
        ctx.regs.sr.trace = false;

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, fault.pc >> 16, OpSize::Word, WriteOrder::LswFirst);
        // the SR slot below was already written
        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, ctx.regs.sird.into(), OpSize::Word, WriteOrder::LswFirst);

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(
            ctx.regs.ssp,
            fault.address & 0xFFFF,
            OpSize::Word,
            WriteOrder::LswFirst,
        );
        ctx.scheduler.write(
            ctx.regs.ssp.wrapping_sub(4),
            fault_status_word(ctx.regs.sird, fault).into(),
            OpSize::Word,
            WriteOrder::LswFirst,
        );

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, fault.address >> 16, OpSize::Word, WriteOrder::LswFirst);
        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);

        let vector = if self.current == ExceptionType::BusError {
            VECTOR_BUS_ERROR
        } else {
            VECTOR_ADDRESS_ERROR
        };
        ctx.scheduler.read(vector, OpSize::LongWord, AddrSpace::Data, OnComplete::LoadPc);
        ctx.scheduler.prefetch_two();

        self.active = false;
        Ok(())
    }

    /// Three-word frame shared by the whole trap group: PC low, SR, PC high.
    fn trap_entry(&mut self, ctx: &mut ExecCtx<'_>, vector: u8) {
        if vector != 7 {
            ctx.scheduler.wait(3);
        }

        let sr = ctx.regs.status();
        let pc = ctx.regs.pc;

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, pc & 0xFFFF, OpSize::Word, WriteOrder::LswFirst);
        ctx.scheduler.write(
            ctx.regs.ssp.wrapping_sub(4),
            sr.into(),
            OpSize::Word,
            WriteOrder::LswFirst,
        );

        ctx.regs.sr.supervisor = true;
        ctx.regs.sr.trace = false;

        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
        ctx.scheduler.write(ctx.regs.ssp, pc >> 16, OpSize::Word, WriteOrder::LswFirst);
        ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);

        ctx.scheduler.read(
            u32::from(vector) * 4,
            OpSize::LongWord,
            AddrSpace::Data,
            OnComplete::LoadPc,
        );
        ctx.scheduler.prefetch_two();

        self.active = false;
    }

    /// Interrupt entry: acknowledge cycle, then the trap-style frame with
    /// the mask raised to the serviced level.
    fn interrupt_entry(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        match self.phase {
            0 => {
                ctx.scheduler.wait(6);
                ctx.scheduler.int_ack(self.int_priority);
                self.phase = 1;
                Ok(())
            }
            _ => {
                let vector = ctx
                    .scheduler
                    .take_int_vector()
                    .ok_or(CpuError::Internal("interrupt acknowledge latched no vector"))?;

                ctx.scheduler.wait(4);

                let sr = ctx.regs.status();
                let pc = ctx.regs.pc;

                ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
                ctx.scheduler.write(ctx.regs.ssp, pc & 0xFFFF, OpSize::Word, WriteOrder::LswFirst);
                ctx.scheduler.write(
                    ctx.regs.ssp.wrapping_sub(4),
                    sr.into(),
                    OpSize::Word,
                    WriteOrder::LswFirst,
                );

                ctx.regs.sr.supervisor = true;
                ctx.regs.sr.trace = false;
                ctx.regs.sr.interrupt_mask = self.int_priority;

                ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);
                ctx.scheduler.write(ctx.regs.ssp, pc >> 16, OpSize::Word, WriteOrder::LswFirst);
                ctx.regs.ssp = ctx.regs.ssp.wrapping_sub(2);

                ctx.scheduler.read(
                    u32::from(vector) * 4,
                    OpSize::LongWord,
                    AddrSpace::Data,
                    OnComplete::LoadPc,
                );
                ctx.scheduler.prefetch_two();

                self.active = false;
                Ok(())
            }
        }
    }
}

/// MOVE.W/MOVE.L with a predecrement destination stores a PC advanced by two
/// when the store faults; no other instruction shows this.
fn correct_fault_pc(sird: u16, fault: &mut AccessFault) {
    let is_move = matches!(sird >> 12, 0b0010 | 0b0011);
    let predec_dest = (sird >> 6) & 0x7 == 0b100;
    if is_move && predec_dest && !fault.read {
        fault.pc = fault.pc.wrapping_add(2);
    }
}

fn fault_status_word(sird: u16, fault: AccessFault) -> u16 {
    let mut status = sird & !0b11111;
    status |= u16::from(fault.func_codes & 0x7);
    if fault.instruction {
        status |= 1 << 3;
    }
    if fault.read {
        status |= 1 << 4;
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_predec_write_fault_pc_correction() {
        // MOVE.W D0, -(A0) = 0x3100
        let mut fault = AccessFault { pc: 0x1000, read: false, ..AccessFault::default() };
        correct_fault_pc(0x3100, &mut fault);
        assert_eq!(fault.pc, 0x1002);

        // same instruction, read fault: no correction
        let mut fault = AccessFault { pc: 0x1000, read: true, ..AccessFault::default() };
        correct_fault_pc(0x3100, &mut fault);
        assert_eq!(fault.pc, 0x1000);

        // ADD.W D0, -(A0)-shaped opcode is not a MOVE: no correction
        let mut fault = AccessFault { pc: 0x1000, read: false, ..AccessFault::default() };
        correct_fault_pc(0xD160, &mut fault);
        assert_eq!(fault.pc, 0x1000);
    }

    #[test]
    fn status_word_packs_fault_details() {
        let fault = AccessFault {
            address: 0,
            func_codes: 0b101,
            read: true,
            instruction: false,
            pc: 0,
        };
        let status = fault_status_word(0xABCD, fault);
        assert_eq!(status & 0b111, 0b101);
        assert_eq!(status & (1 << 3), 0);
        assert_ne!(status & (1 << 4), 0);
        assert_eq!(status & !0b11111, 0xABCD & !0b11111);
    }
}
