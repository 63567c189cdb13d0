//! Branches, jumps, subroutine linkage and the system-control instructions.

use crate::alu;
use crate::bus::AddrSpace;
use crate::ea::{AddressingMode, EaFlags, advance_pc};
use crate::error::CpuResult;
use crate::exception::ExceptionType;
use crate::instructions::{ExecCtx, InstructionUnit, UnitState};
use crate::opcodes::{self, InstructionKind};
use crate::scheduler::{CallOp, OnComplete, ReadImmFlag, WriteOrder};
use crate::size::OpSize;

impl InstructionUnit {
    /// BRA/BSR/Bcc with 8- or 16-bit displacements.
    pub(super) fn branch(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let disp8 = self.opcode as u8;
        let word_disp = disp8 == 0;

        let target = if word_disp {
            self.start_pc.wrapping_add(2).wrapping_add(OpSize::Word.sign_extend(ctx.regs.irc.into()))
        } else {
            self.start_pc.wrapping_add(2).wrapping_add(OpSize::Byte.sign_extend(disp8.into()))
        };

        match kind {
            InstructionKind::Bsr => {
                let return_pc = self.start_pc.wrapping_add(if word_disp { 4 } else { 2 });
                ctx.scheduler.wait(2);
                ctx.regs.pc = target;
                ctx.scheduler.push(return_pc, OpSize::LongWord, WriteOrder::MswFirst);
                ctx.scheduler.prefetch_two();
            }
            _ => {
                let taken = kind == InstructionKind::Bra
                    || alu::condition_true(((self.opcode >> 8) & 0xF) as u8, ctx.regs.sr);
                if taken {
                    ctx.scheduler.wait(2);
                    ctx.regs.pc = target;
                    ctx.scheduler.prefetch_two();
                } else {
                    ctx.scheduler.wait(4);
                    if word_disp {
                        ctx.scheduler.read_imm(
                            ctx.regs,
                            OpSize::Word,
                            ReadImmFlag::DoPrefetch,
                            OnComplete::None,
                        );
                    }
                    ctx.scheduler.prefetch_one();
                }
            }
        }

        self.finish();
        Ok(())
    }

    pub(super) fn dbcc(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let condition = alu::condition_true(((self.opcode >> 8) & 0xF) as u8, ctx.regs.sr);
        let reg = self.low_reg_field();

        if condition {
            // condition met: the loop is over, fall through past the
            // displacement word
            ctx.scheduler.wait(4);
            ctx.scheduler.read_imm(ctx.regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
            ctx.scheduler.prefetch_one();
            self.finish();
            return Ok(());
        }

        let counter = ctx.regs.d_sized(reg, OpSize::Word).wrapping_sub(1) & 0xFFFF;
        ctx.regs.set_d(reg, counter, OpSize::Word);

        if counter != 0xFFFF {
            let target =
                self.start_pc.wrapping_add(2).wrapping_add(OpSize::Word.sign_extend(ctx.regs.irc.into()));
            ctx.scheduler.wait(2);
            ctx.regs.pc = target;
            ctx.scheduler.prefetch_two();
        } else {
            // counter expired
            ctx.scheduler.wait(2);
            ctx.scheduler.read_imm(ctx.regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
            ctx.scheduler.call(CallOp::SetPc(self.start_pc.wrapping_add(4)));
            ctx.scheduler.prefetch_two();
        }

        self.finish();
        Ok(())
    }

    pub(super) fn scc(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let condition = alu::condition_true(((self.opcode >> 8) & 0xF) as u8, ctx.regs.sr);
        let value: u32 = if condition { 0xFF } else { 0x00 };

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if mode == AddressingMode::DataReg {
                    ctx.regs.set_d(self.low_reg_field(), value, OpSize::Byte);
                    if condition {
                        ctx.scheduler.wait(2);
                    }
                    ctx.scheduler.prefetch_one();
                    self.finish();
                    return Ok(());
                }
                if !mode.is_memory() || !mode.is_writable() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Byte, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                ctx.scheduler.prefetch_one();
                self.write_operand(ctx, operand, value)?;
                self.finish();
            }
        }
        Ok(())
    }

    /// JMP and JSR share the control-mode address resolution.
    pub(super) fn jump(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let is_jsr = opcodes::decode(self.opcode) == InstructionKind::Jsr;

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if !mode.is_control() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::LongWord, EaFlags::ADDRESS_ONLY)?;
                self.phase = 1;
            }
            _ => {
                let mode = ctx.ea.operand()?.mode();
                let target = ctx.ea.operand()?.address()?;

                if is_jsr {
                    let return_pc =
                        advance_pc(self.start_pc.wrapping_add(2), mode, OpSize::LongWord);
                    ctx.regs.pc = target;
                    ctx.scheduler.push(return_pc, OpSize::LongWord, WriteOrder::MswFirst);
                } else {
                    ctx.regs.pc = target;
                }
                ctx.scheduler.prefetch_two();
                self.finish();
            }
        }
        Ok(())
    }

    /// RTS/RTE/RTR.
    pub(super) fn ret(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let sp = ctx.regs.sp();

        match kind {
            InstructionKind::Rts => {
                ctx.scheduler.read(sp, OpSize::LongWord, AddrSpace::Data, OnComplete::LoadPc);
                ctx.regs.set_a(7, sp.wrapping_add(4), OpSize::LongWord);
            }
            InstructionKind::Rte => {
                ctx.scheduler.read(sp, OpSize::Word, AddrSpace::Data, OnComplete::SetSr);
                ctx.scheduler.read(
                    sp.wrapping_add(2),
                    OpSize::LongWord,
                    AddrSpace::Data,
                    OnComplete::LoadPc,
                );
                ctx.regs.set_a(7, sp.wrapping_add(6), OpSize::LongWord);
            }
            InstructionKind::Rtr => {
                ctx.scheduler.read(sp, OpSize::Word, AddrSpace::Data, OnComplete::SetCcr);
                ctx.scheduler.read(
                    sp.wrapping_add(2),
                    OpSize::LongWord,
                    AddrSpace::Data,
                    OnComplete::LoadPc,
                );
                ctx.regs.set_a(7, sp.wrapping_add(6), OpSize::LongWord);
            }
            _ => unreachable!("ret dispatch"),
        }

        ctx.scheduler.prefetch_two();
        self.finish();
        Ok(())
    }

    pub(super) fn link(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.low_reg_field();
        let disp = OpSize::Word.sign_extend(ctx.regs.irc.into());

        let sp = ctx.regs.sp();
        let frame = sp.wrapping_sub(4);
        // LINK A7 pushes the already-decremented stack pointer
        let pushed = if reg == 7 { frame } else { ctx.regs.a(reg) };

        ctx.scheduler.read_imm(ctx.regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
        ctx.scheduler.push(pushed, OpSize::LongWord, WriteOrder::MswFirst);
        ctx.scheduler.call(CallOp::WriteAddrLong { reg, value: frame });
        ctx.scheduler.call(CallOp::WriteAddrLong { reg: 7, value: frame.wrapping_add(disp) });
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn unlk(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.low_reg_field();
        let frame = ctx.regs.a(reg);

        ctx.scheduler.read(frame, OpSize::LongWord, AddrSpace::Data, OnComplete::LoadAddrReg {
            reg,
        });
        if reg != 7 {
            ctx.scheduler.call(CallOp::WriteAddrLong { reg: 7, value: frame.wrapping_add(4) });
        }
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn trap(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let vector = 32 + (self.opcode & 0xF) as u8;
        ctx.regs.pc = self.start_pc.wrapping_add(2);
        ctx.exman.rise_trap(vector);
        self.finish();
        Ok(())
    }

    pub(super) fn trapv(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        if ctx.regs.sr.overflow {
            ctx.regs.pc = self.start_pc.wrapping_add(2);
            ctx.exman.rise(ExceptionType::TrapV);
            self.finish();
        } else {
            ctx.scheduler.prefetch_one();
            self.finish();
        }
        Ok(())
    }

    /// STOP: load SR from the immediate word and park until an exception
    /// wakes the processor.
    pub(super) fn stop(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        ctx.regs.set_status(ctx.regs.irc);
        ctx.regs.pc = self.start_pc.wrapping_add(4);
        self.state = UnitState::Stopped;
        Ok(())
    }

    /// RESET drives the reset line to external devices for 124 clocks; the
    /// CPU itself is unaffected.
    pub(super) fn reset_instruction(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        ctx.scheduler.wait(124);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn nop(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }
}
