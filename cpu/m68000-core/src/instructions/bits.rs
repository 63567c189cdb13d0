//! Logic-to-status ops, bit manipulation, shifts/rotates and the small
//! register-transform instructions.

use crate::alu;
use crate::bus_manager::ModifyOp;
use crate::ea::{AddressingMode, EaFlags, Operand};
use crate::error::CpuResult;
use crate::instructions::{ExecCtx, InstructionUnit};
use crate::num::GetBit;
use crate::opcodes::{self, InstructionKind};
use crate::registers::SR_MASK;
use crate::scheduler::{OnComplete, ReadImmFlag};
use crate::size::OpSize;

impl InstructionUnit {
    /// ANDI/ORI/EORI to CCR. The pipeline is refilled from scratch after the
    /// status write, which is why these cost two trailing prefetches.
    pub(super) fn logic_to_ccr(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        match self.phase {
            0 => {
                ctx.scheduler.read_imm(
                    ctx.regs,
                    OpSize::Byte,
                    ReadImmFlag::DoPrefetch,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            _ => {
                let imm = ctx.scheduler.data() as u8 & 0x1F;
                let ccr = ctx.regs.sr.ccr();
                let result = match opcodes::decode(self.opcode) {
                    InstructionKind::AndiToCcr => ccr & (0xE0 | imm),
                    InstructionKind::OriToCcr => ccr | imm,
                    InstructionKind::EoriToCcr => ccr ^ imm,
                    _ => unreachable!("logic_to_ccr dispatch"),
                };
                ctx.regs.sr.set_ccr(result);

                ctx.scheduler.wait(8);
                ctx.regs.pc = self.start_pc.wrapping_add(4);
                ctx.scheduler.prefetch_two();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn logic_to_sr(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        match self.phase {
            0 => {
                ctx.scheduler.read_imm(
                    ctx.regs,
                    OpSize::Word,
                    ReadImmFlag::DoPrefetch,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            _ => {
                let imm = ctx.scheduler.data() as u16 & SR_MASK;
                let sr = ctx.regs.status();
                let result = match opcodes::decode(self.opcode) {
                    InstructionKind::AndiToSr => sr & imm,
                    InstructionKind::OriToSr => sr | imm,
                    InstructionKind::EoriToSr => sr ^ imm,
                    _ => unreachable!("logic_to_sr dispatch"),
                };
                ctx.regs.set_status(result);

                ctx.scheduler.wait(8);
                ctx.regs.pc = self.start_pc.wrapping_add(4);
                ctx.scheduler.prefetch_two();
                self.finish();
            }
        }
        Ok(())
    }

    /// BTST/BCHG/BCLR/BSET; the opcode's bit 8 selects the dynamic (register
    /// bit number) form, otherwise the bit number follows as an immediate.
    pub(super) fn bit_op(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let dynamic = self.opcode.bit(8);
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };

        match self.phase {
            0 => {
                let readable = mode == AddressingMode::DataReg
                    || (mode.is_memory()
                        && (kind == InstructionKind::Btst || mode.is_writable()));
                if !readable || (dynamic && mode == AddressingMode::AddrReg) {
                    return self.illegal(ctx);
                }

                if dynamic {
                    self.value = ctx.regs.d(self.reg_field());
                    self.phase = 2;
                } else {
                    ctx.scheduler.read_imm(
                        ctx.regs,
                        OpSize::Word,
                        ReadImmFlag::DoPrefetch,
                        OnComplete::None,
                    );
                    self.phase = 1;
                }
            }
            1 => {
                self.value = ctx.scheduler.data();
                self.phase = 2;
            }
            2 => {
                let size =
                    if mode == AddressingMode::DataReg { OpSize::LongWord } else { OpSize::Byte };
                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 3;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let long_operand = operand.is_data_reg();
                let bit = alu::bit_number(self.value, long_operand);
                let value = operand.value(ctx.regs)?;
                let sr = &mut ctx.regs.sr;

                match kind {
                    InstructionKind::Btst => {
                        alu::btst(bit, value, sr);
                        if long_operand {
                            ctx.scheduler.wait(2);
                        }
                        ctx.scheduler.prefetch_one();
                    }
                    _ => {
                        let result = match kind {
                            InstructionKind::Bchg => alu::bchg(bit, value, sr),
                            InstructionKind::Bclr => alu::bclr(bit, value, sr),
                            InstructionKind::Bset => alu::bset(bit, value, sr),
                            _ => unreachable!("bit_op dispatch"),
                        };
                        if let Operand::DataReg { reg, .. } = operand {
                            ctx.regs.set_d(reg, result, OpSize::LongWord);
                            ctx.scheduler.wait(if kind == InstructionKind::Bclr { 6 } else { 4 });
                            ctx.scheduler.prefetch_one();
                        } else {
                            ctx.scheduler.prefetch_one();
                            self.write_operand(ctx, operand, result)?;
                        }
                    }
                }
                self.finish();
            }
        }
        Ok(())
    }

    /// Register shifts and rotates; the count comes from an immediate field
    /// or a register modulo 64.
    pub(super) fn shift_register(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let left = self.opcode.bit(8);
        let reg = self.low_reg_field();

        let count = if self.opcode.bit(5) {
            ctx.regs.d(self.reg_field()) % 64
        } else {
            match self.reg_field() {
                0 => 8,
                n => u32::from(n),
            }
        };

        let value = ctx.regs.d_sized(reg, size);
        let sr = &mut ctx.regs.sr;
        let result = match (kind, left) {
            (InstructionKind::AsdReg, true) => alu::asl(value, count, size, sr),
            (InstructionKind::AsdReg, false) => alu::asr(value, count, size, sr),
            (InstructionKind::LsdReg, true) => alu::lsl(value, count, size, sr),
            (InstructionKind::LsdReg, false) => alu::lsr(value, count, size, sr),
            (InstructionKind::RoxdReg, true) => alu::roxl(value, count, size, sr),
            (InstructionKind::RoxdReg, false) => alu::roxr(value, count, size, sr),
            (InstructionKind::RodReg, true) => alu::rol(value, count, size, sr),
            (InstructionKind::RodReg, false) => alu::ror(value, count, size, sr),
            _ => unreachable!("shift_register dispatch"),
        };
        ctx.regs.set_d(reg, result, size);

        let base_wait = if size == OpSize::LongWord { 4 } else { 2 };
        ctx.scheduler.wait((base_wait + 2 * count) as u8);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    /// Memory shifts: word-sized, count of one.
    pub(super) fn shift_memory(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let left = self.opcode.bit(8);

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if !mode.is_memory() || !mode.is_writable() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Word, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let value = operand.value(ctx.regs)?;
                let sr = &mut ctx.regs.sr;
                let result = match (kind, left) {
                    (InstructionKind::AsdMem, true) => alu::asl(value, 1, OpSize::Word, sr),
                    (InstructionKind::AsdMem, false) => alu::asr(value, 1, OpSize::Word, sr),
                    (InstructionKind::LsdMem, true) => alu::lsl(value, 1, OpSize::Word, sr),
                    (InstructionKind::LsdMem, false) => alu::lsr(value, 1, OpSize::Word, sr),
                    (InstructionKind::RoxdMem, true) => alu::roxl(value, 1, OpSize::Word, sr),
                    (InstructionKind::RoxdMem, false) => alu::roxr(value, 1, OpSize::Word, sr),
                    (InstructionKind::RodMem, true) => alu::rol(value, 1, OpSize::Word, sr),
                    (InstructionKind::RodMem, false) => alu::ror(value, 1, OpSize::Word, sr),
                    _ => unreachable!("shift_memory dispatch"),
                };
                ctx.scheduler.prefetch_one();
                self.write_operand(ctx, operand, result)?;
                self.finish();
            }
        }
        Ok(())
    }

    /// TAS: flags from the old value, bit 7 set; memory forms use the
    /// indivisible read-modify-write cycle.
    pub(super) fn tas(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };

        match self.phase {
            0 => {
                if mode == AddressingMode::DataReg {
                    let reg = self.low_reg_field();
                    let value = ctx.regs.d_sized(reg, OpSize::Byte) as u8;
                    let result = ModifyOp::Tas.apply(value, &mut ctx.regs.sr);
                    ctx.regs.set_d(reg, result.into(), OpSize::Byte);
                    ctx.scheduler.prefetch_one();
                    self.finish();
                    return Ok(());
                }
                if !mode.is_memory() || !mode.is_writable() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Byte, EaFlags::NO_READ)?;
                self.phase = 1;
            }
            _ => {
                let address = ctx.ea.operand()?.address()?;
                ctx.scheduler.rmw(address, ModifyOp::Tas);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn swap(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.low_reg_field();
        let result = alu::swap(ctx.regs.d(reg), &mut ctx.regs.sr);
        ctx.regs.set_d(reg, result, OpSize::LongWord);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn ext(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.low_reg_field();
        let to = if self.opcode.bit(6) { OpSize::LongWord } else { OpSize::Word };
        let result = alu::ext(ctx.regs.d(reg), to, &mut ctx.regs.sr);
        ctx.regs.set_d(reg, result, to);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn exg(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let rx = self.reg_field();
        let ry = self.low_reg_field();

        match (self.opcode >> 3) & 0x1F {
            0b01000 => {
                let x = ctx.regs.d(rx);
                let y = ctx.regs.d(ry);
                ctx.regs.set_d(rx, y, OpSize::LongWord);
                ctx.regs.set_d(ry, x, OpSize::LongWord);
            }
            0b01001 => {
                let x = ctx.regs.a(rx);
                let y = ctx.regs.a(ry);
                ctx.regs.set_a(rx, y, OpSize::LongWord);
                ctx.regs.set_a(ry, x, OpSize::LongWord);
            }
            0b10001 => {
                let x = ctx.regs.d(rx);
                let y = ctx.regs.a(ry);
                ctx.regs.set_d(rx, y, OpSize::LongWord);
                ctx.regs.set_a(ry, x, OpSize::LongWord);
            }
            _ => return self.illegal(ctx),
        }

        ctx.scheduler.wait(2);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }
}
