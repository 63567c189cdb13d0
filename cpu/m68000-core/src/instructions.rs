//! The instruction unit: one instruction at a time, expressed as a short
//! phase machine that schedules micro-ops and advances whenever the
//! scheduler drains.

mod arithmetic;
mod bits;
mod controlflow;
mod load;

use crate::ea::{AddressingMode, EaDecoder, EaFlags, Operand};
use crate::error::CpuResult;
use crate::exception::{ExceptionManager, ExceptionType};
use crate::opcodes::{self, InstructionKind};
use crate::registers::Registers;
use crate::scheduler::{BusScheduler, WriteOrder};
use crate::size::OpSize;
use bincode::{Decode, Encode};

/// Mutable view of the shared core state a unit needs during its slice of a
/// tick. Components never store references into each other; the CPU top
/// rebuilds this view every tick.
pub(crate) struct ExecCtx<'a> {
    pub regs: &'a mut Registers,
    pub scheduler: &'a mut BusScheduler,
    pub ea: &'a mut EaDecoder,
    pub exman: &'a mut ExceptionManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum UnitState {
    Idle,
    Executing,
    /// Parked by STOP until an exception is taken.
    Stopped,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct InstructionUnit {
    state: UnitState,
    opcode: u16,
    phase: u8,
    /// Opcode address of the executing instruction.
    start_pc: u32,
    /// Staged intermediate value (immediate operand, first memory operand,
    /// MOVEM mask, ...).
    value: u32,
    /// T was set when this instruction started; a trace exception follows
    /// at its boundary.
    trace_pending: bool,
}

impl InstructionUnit {
    pub fn new() -> Self {
        Self {
            state: UnitState::Idle,
            opcode: 0,
            phase: 0,
            start_pc: 0,
            value: 0,
            trace_pending: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = UnitState::Idle;
        self.phase = 0;
        self.trace_pending = false;
    }

    pub fn trace_pending(&self) -> bool {
        self.trace_pending
    }

    pub fn clear_trace_pending(&mut self) {
        self.trace_pending = false;
    }

    pub fn is_idle(&self) -> bool {
        self.state == UnitState::Idle
    }

    pub fn is_stopped(&self) -> bool {
        self.state == UnitState::Stopped
    }

    pub fn cycle(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        if !ctx.scheduler.is_idle() {
            return Ok(());
        }
        match self.state {
            UnitState::Stopped => return Ok(()),
            UnitState::Idle => self.start(ctx)?,
            UnitState::Executing => {}
        }

        // phases that resolve without bus traffic run back to back within
        // the same tick; only scheduled work consumes time
        while self.state == UnitState::Executing && ctx.scheduler.is_idle() {
            let phase_before = self.phase;
            self.exec(ctx)?;
            if self.state == UnitState::Executing
                && self.phase == phase_before
                && ctx.scheduler.is_idle()
            {
                return Err(crate::error::CpuError::Internal("instruction phase stalled"));
            }
        }
        Ok(())
    }

    fn start(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let opcode = ctx.regs.ird;
        ctx.regs.ir = opcode;
        ctx.regs.sird = opcode;
        ctx.regs.sssp = ctx.regs.ssp;

        self.opcode = opcode;
        self.start_pc = ctx.regs.pc;
        self.phase = 0;
        self.value = 0;
        self.trace_pending = false;
        ctx.ea.reset();

        let kind = opcodes::decode(opcode);
        log::trace!("{:08X}: {opcode:04X} {kind:?}", ctx.regs.pc);

        match kind {
            InstructionKind::Illegal => {
                ctx.exman.rise(ExceptionType::IllegalInstruction);
                return Ok(());
            }
            InstructionKind::LineA => {
                ctx.exman.rise(ExceptionType::LineA);
                return Ok(());
            }
            InstructionKind::LineF => {
                ctx.exman.rise(ExceptionType::LineF);
                return Ok(());
            }
            _ => {}
        }

        if requires_supervisor(kind) && !ctx.regs.sr.supervisor {
            ctx.exman.rise(ExceptionType::Privilege);
            return Ok(());
        }

        self.trace_pending = ctx.regs.sr.trace;
        self.state = UnitState::Executing;
        Ok(())
    }

    fn exec(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        use InstructionKind as K;

        match opcodes::decode(self.opcode) {
            K::Add | K::Sub | K::Cmp | K::And | K::Or | K::Eor => self.binary_alu(ctx),
            K::Adda | K::Suba | K::Cmpa => self.address_alu(ctx),
            K::Addi | K::Subi | K::Cmpi | K::Andi | K::Ori | K::Eori => self.immediate_alu(ctx),
            K::Addq | K::Subq => self.quick_alu(ctx),
            K::Addx | K::Subx => self.extended_alu(ctx),
            K::Abcd | K::Sbcd => self.bcd(ctx),
            K::Nbcd => self.nbcd(ctx),
            K::Cmpm => self.cmpm(ctx),
            K::Mulu | K::Muls => self.multiply(ctx),
            K::Divu | K::Divs => self.divide(ctx),
            K::Chk => self.chk(ctx),
            K::Neg | K::Negx | K::Not | K::Clr | K::Tst => self.unary_alu(ctx),

            K::AndiToCcr | K::OriToCcr | K::EoriToCcr => self.logic_to_ccr(ctx),
            K::AndiToSr | K::OriToSr | K::EoriToSr => self.logic_to_sr(ctx),
            K::Btst | K::Bchg | K::Bclr | K::Bset => self.bit_op(ctx),
            K::AsdReg | K::LsdReg | K::RoxdReg | K::RodReg => self.shift_register(ctx),
            K::AsdMem | K::LsdMem | K::RoxdMem | K::RodMem => self.shift_memory(ctx),
            K::Tas => self.tas(ctx),
            K::Swap => self.swap(ctx),
            K::Ext => self.ext(ctx),
            K::Exg => self.exg(ctx),

            K::Bra | K::Bsr | K::Bcc => self.branch(ctx),
            K::Dbcc => self.dbcc(ctx),
            K::Scc => self.scc(ctx),
            K::Jmp | K::Jsr => self.jump(ctx),
            K::Rts | K::Rte | K::Rtr => self.ret(ctx),
            K::Link => self.link(ctx),
            K::Unlk => self.unlk(ctx),
            K::Trap => self.trap(ctx),
            K::Trapv => self.trapv(ctx),
            K::Stop => self.stop(ctx),
            K::Reset => self.reset_instruction(ctx),
            K::Nop => self.nop(ctx),

            K::Move => self.move_(ctx),
            K::Movea => self.movea(ctx),
            K::Moveq => self.moveq(ctx),
            K::Movem => self.movem(ctx),
            K::Movep => self.movep(ctx),
            K::MoveFromSr => self.move_from_sr(ctx),
            K::MoveToCcr | K::MoveToSr => self.move_to_status(ctx),
            K::MoveUsp => self.move_usp(ctx),
            K::Lea => self.lea(ctx),
            K::Pea => self.pea(ctx),

            K::Illegal | K::LineA | K::LineF => unreachable!("raised at instruction start"),
        }
    }

    /* shared helpers for the per-instruction modules */

    fn finish(&mut self) {
        self.state = UnitState::Idle;
    }

    /// Abandon the instruction and record an illegal-instruction exception.
    fn illegal(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        ctx.exman.rise(ExceptionType::IllegalInstruction);
        ctx.regs.pc = self.start_pc;
        self.finish();
        Ok(())
    }

    /// Raise a trap-group exception at the current instruction boundary; PC
    /// has to name the next instruction, which after extension-word
    /// consumption always sits one word past the fetch pointer.
    fn raise_trap_exception(&mut self, ctx: &mut ExecCtx<'_>, ex: ExceptionType, vector: Option<u8>) {
        ctx.regs.pc = ctx.regs.pc.wrapping_add(2);
        match vector {
            Some(vector) => ctx.exman.rise_trap(vector),
            None => ctx.exman.rise(ex),
        }
        self.finish();
    }

    fn ea_field(&self) -> u8 {
        (self.opcode & 0x3F) as u8
    }

    fn ea_mode(&self) -> Option<AddressingMode> {
        AddressingMode::from_ea_field(self.ea_field())
    }

    /// Register number in bits 11-9.
    fn reg_field(&self) -> u8 {
        ((self.opcode >> 9) & 0x7) as u8
    }

    /// Register number in bits 2-0.
    fn low_reg_field(&self) -> u8 {
        (self.opcode & 0x7) as u8
    }

    fn size_field(&self) -> Option<OpSize> {
        OpSize::parse_from_opcode(self.opcode)
    }

    fn schedule_ea(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        size: OpSize,
        flags: EaFlags,
    ) -> CpuResult<()> {
        let field = self.ea_field();
        ctx.ea.schedule(ctx.scheduler, ctx.regs, field, size, flags)
    }

    /// Store an ALU result into a resolved destination. Register stores
    /// happen now; memory stores are queued, low word first.
    fn write_operand(
        &self,
        ctx: &mut ExecCtx<'_>,
        operand: Operand,
        value: u32,
    ) -> CpuResult<()> {
        match operand {
            Operand::DataReg { reg, size } => {
                ctx.regs.set_d(reg, value, size);
                Ok(())
            }
            Operand::AddrReg { reg, size } => {
                ctx.regs.set_a(reg, value, size);
                Ok(())
            }
            Operand::Pointer { address, size, .. } => {
                ctx.scheduler.write(address, value, size, WriteOrder::LswFirst);
                Ok(())
            }
            Operand::Immediate { .. } => {
                Err(crate::error::CpuError::Internal("write to an immediate operand"))
            }
        }
    }

    /// Extra internal cycles long-word register ALU forms pay on top of the
    /// trailing prefetch.
    fn long_alu_wait(src: Operand) -> u8 {
        match src {
            Operand::DataReg { .. } | Operand::AddrReg { .. } | Operand::Immediate { .. } => 4,
            Operand::Pointer { .. } => 2,
        }
    }
}

fn requires_supervisor(kind: InstructionKind) -> bool {
    use InstructionKind as K;
    matches!(
        kind,
        K::AndiToSr
            | K::OriToSr
            | K::EoriToSr
            | K::MoveToSr
            | K::MoveUsp
            | K::Rte
            | K::Reset
            | K::Stop
    )
}
