//! Add/subtract/compare families, multiply/divide, BCD arithmetic and CHK.

use crate::alu::{self, DivResult};
use crate::bus::AddrSpace;
use crate::ea::{AddressingMode, EaFlags, Operand};
use crate::error::CpuResult;
use crate::exception::ExceptionType;
use crate::instructions::{ExecCtx, InstructionUnit};
use crate::num::GetBit;
use crate::opcodes::{self, InstructionKind};
use crate::scheduler::{OnComplete, WriteOrder};
use crate::size::OpSize;

const DIVIDE_BY_ZERO_WAIT: u8 = 4;

impl InstructionUnit {
    /// ADD/SUB/CMP/AND/OR/EOR in their register/memory directions.
    pub(super) fn binary_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
        let reg = self.reg_field();

        // EOR only exists in the register-to-EA direction; CMP only in the
        // EA-to-register direction
        let to_memory = match kind {
            InstructionKind::Eor => true,
            InstructionKind::Cmp => false,
            _ => self.opcode.bit(8),
        };

        match self.phase {
            0 => {
                let valid = if to_memory {
                    if kind == InstructionKind::Eor {
                        mode == AddressingMode::DataReg
                            || (mode.is_memory() && mode.is_writable())
                    } else {
                        mode.is_memory() && mode.is_writable()
                    }
                } else {
                    // An sources only make sense at word/long width, and
                    // never for the logic ops
                    mode != AddressingMode::AddrReg
                        || (size != OpSize::Byte
                            && matches!(
                                kind,
                                InstructionKind::Add | InstructionKind::Sub | InstructionKind::Cmp
                            ))
                };
                if !valid {
                    return self.illegal(ctx);
                }

                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let ea_value = operand.value(ctx.regs)?;
                let reg_value = ctx.regs.d_sized(reg, size);
                let sr = &mut ctx.regs.sr;

                let (a, b) = if to_memory { (reg_value, ea_value) } else { (ea_value, reg_value) };
                let result = match kind {
                    InstructionKind::Add => alu::add(a, b, size, sr),
                    InstructionKind::Sub => alu::sub(b, a, size, sr),
                    InstructionKind::And => alu::and(a, b, size, sr),
                    InstructionKind::Or => alu::or(a, b, size, sr),
                    InstructionKind::Eor => alu::eor(a, b, size, sr),
                    InstructionKind::Cmp => {
                        alu::cmp(b, a, size, sr);
                        0
                    }
                    _ => unreachable!("binary_alu dispatch"),
                };

                if kind == InstructionKind::Cmp {
                    if size == OpSize::LongWord {
                        ctx.scheduler.wait(2);
                    }
                    ctx.scheduler.prefetch_one();
                } else if to_memory && !operand.is_data_reg() {
                    ctx.scheduler.prefetch_one();
                    self.write_operand(ctx, operand, result)?;
                } else {
                    let dest_reg = if to_memory {
                        match operand {
                            Operand::DataReg { reg, .. } => reg,
                            _ => unreachable!("register destination was validated"),
                        }
                    } else {
                        reg
                    };
                    ctx.regs.set_d(dest_reg, result, size);
                    if size == OpSize::LongWord {
                        ctx.scheduler.wait(Self::long_alu_wait(operand));
                    }
                    ctx.scheduler.prefetch_one();
                }
                self.finish();
            }
        }
        Ok(())
    }

    /// ADDA/SUBA/CMPA: word sources sign extend to 32 bits. ADDA and SUBA
    /// never touch CCR; CMPA sets the compare flags like any other compare,
    /// with X preserved.
    pub(super) fn address_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let size = if self.opcode.bit(8) { OpSize::LongWord } else { OpSize::Word };
        let reg = self.reg_field();

        match self.phase {
            0 => {
                if self.ea_mode().is_none() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let src = size.sign_extend(operand.value(ctx.regs)?);
                let dest = ctx.regs.a(reg);

                match kind {
                    InstructionKind::Adda => {
                        ctx.regs.set_a(reg, dest.wrapping_add(src), OpSize::LongWord);
                        self.schedule_address_alu_wait(ctx, size, operand);
                    }
                    InstructionKind::Suba => {
                        ctx.regs.set_a(reg, dest.wrapping_sub(src), OpSize::LongWord);
                        self.schedule_address_alu_wait(ctx, size, operand);
                    }
                    InstructionKind::Cmpa => {
                        alu::cmp(dest, src, OpSize::LongWord, &mut ctx.regs.sr);
                        ctx.scheduler.wait(2);
                    }
                    _ => unreachable!("address_alu dispatch"),
                }

                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    fn schedule_address_alu_wait(&self, ctx: &mut ExecCtx<'_>, size: OpSize, src: Operand) {
        let wait = if size == OpSize::Word { 4 } else { Self::long_alu_wait(src) };
        ctx.scheduler.wait(wait);
    }

    /// ADDI/SUBI/CMPI/ANDI/ORI/EORI.
    pub(super) fn immediate_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };

        match self.phase {
            0 => {
                let writable = mode == AddressingMode::DataReg
                    || (mode.is_memory() && mode.is_writable());
                if !writable {
                    return self.illegal(ctx);
                }
                ctx.scheduler.read_imm(
                    ctx.regs,
                    size,
                    crate::scheduler::ReadImmFlag::DoPrefetch,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            1 => {
                self.value = ctx.scheduler.data();
                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 2;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let dest = operand.value(ctx.regs)?;
                let imm = size.truncate(self.value);
                let sr = &mut ctx.regs.sr;

                let result = match kind {
                    InstructionKind::Addi => alu::add(imm, dest, size, sr),
                    InstructionKind::Subi => alu::sub(dest, imm, size, sr),
                    InstructionKind::Andi => alu::and(imm, dest, size, sr),
                    InstructionKind::Ori => alu::or(imm, dest, size, sr),
                    InstructionKind::Eori => alu::eor(imm, dest, size, sr),
                    InstructionKind::Cmpi => {
                        alu::cmp(dest, imm, size, sr);
                        0
                    }
                    _ => unreachable!("immediate_alu dispatch"),
                };

                match operand {
                    Operand::DataReg { reg, .. } => {
                        if kind != InstructionKind::Cmpi {
                            ctx.regs.set_d(reg, result, size);
                        }
                        if size == OpSize::LongWord {
                            ctx.scheduler.wait(if kind == InstructionKind::Cmpi { 2 } else { 4 });
                        }
                        ctx.scheduler.prefetch_one();
                    }
                    _ => {
                        ctx.scheduler.prefetch_one();
                        if kind != InstructionKind::Cmpi {
                            self.write_operand(ctx, operand, result)?;
                        }
                    }
                }
                self.finish();
            }
        }
        Ok(())
    }

    /// ADDQ/SUBQ; an address-register destination never touches CCR and
    /// always operates on the full register.
    pub(super) fn quick_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let subtract = self.opcode.bit(8);
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
        let quick = match self.reg_field() {
            0 => 8,
            n => u32::from(n),
        };

        match self.phase {
            0 => {
                let valid = match mode {
                    AddressingMode::AddrReg => size != OpSize::Byte,
                    AddressingMode::DataReg => true,
                    _ => mode.is_memory() && mode.is_writable(),
                };
                if !valid {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                match operand {
                    Operand::AddrReg { reg, .. } => {
                        let dest = ctx.regs.a(reg);
                        let result = if subtract {
                            dest.wrapping_sub(quick)
                        } else {
                            dest.wrapping_add(quick)
                        };
                        ctx.regs.set_a(reg, result, OpSize::LongWord);
                        ctx.scheduler.wait(4);
                        ctx.scheduler.prefetch_one();
                    }
                    Operand::DataReg { reg, .. } => {
                        let dest = ctx.regs.d_sized(reg, size);
                        let result = if subtract {
                            alu::sub(dest, quick, size, &mut ctx.regs.sr)
                        } else {
                            alu::add(quick, dest, size, &mut ctx.regs.sr)
                        };
                        ctx.regs.set_d(reg, result, size);
                        if size == OpSize::LongWord {
                            ctx.scheduler.wait(4);
                        }
                        ctx.scheduler.prefetch_one();
                    }
                    _ => {
                        let dest = operand.value(ctx.regs)?;
                        let result = if subtract {
                            alu::sub(dest, quick, size, &mut ctx.regs.sr)
                        } else {
                            alu::add(quick, dest, size, &mut ctx.regs.sr)
                        };
                        ctx.scheduler.prefetch_one();
                        self.write_operand(ctx, operand, result)?;
                    }
                }
                self.finish();
            }
        }
        Ok(())
    }

    /// ADDX/SUBX in both the register and the predecrement memory forms.
    pub(super) fn extended_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let subtract = (self.opcode & 0xF000) == 0x9000;
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let src_reg = self.low_reg_field();
        let dest_reg = self.reg_field();
        let memory_form = self.opcode.bit(3);

        if !memory_form {
            let src = ctx.regs.d_sized(src_reg, size);
            let dest = ctx.regs.d_sized(dest_reg, size);
            let result = if subtract {
                alu::subx(dest, src, size, &mut ctx.regs.sr)
            } else {
                alu::addx(src, dest, size, &mut ctx.regs.sr)
            };
            ctx.regs.set_d(dest_reg, result, size);
            if size == OpSize::LongWord {
                ctx.scheduler.wait(4);
            }
            ctx.scheduler.prefetch_one();
            self.finish();
            return Ok(());
        }

        match self.phase {
            0 => {
                ctx.scheduler.wait(2);
                ctx.regs.dec_addr(src_reg, size);
                ctx.scheduler.read(ctx.regs.a(src_reg), size, AddrSpace::Data, OnComplete::None);
                self.phase = 1;
            }
            1 => {
                self.value = ctx.scheduler.data();
                ctx.regs.dec_addr(dest_reg, size);
                ctx.scheduler.read(ctx.regs.a(dest_reg), size, AddrSpace::Data, OnComplete::None);
                self.phase = 2;
            }
            _ => {
                let src = self.value;
                let dest = ctx.scheduler.data();
                let result = if subtract {
                    alu::subx(dest, src, size, &mut ctx.regs.sr)
                } else {
                    alu::addx(src, dest, size, &mut ctx.regs.sr)
                };
                ctx.scheduler.prefetch_one();
                ctx.scheduler.write(ctx.regs.a(dest_reg), result, size, WriteOrder::LswFirst);
                self.finish();
            }
        }
        Ok(())
    }

    /// ABCD/SBCD.
    pub(super) fn bcd(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let subtract = (self.opcode & 0xF000) == 0x8000;
        let src_reg = self.low_reg_field();
        let dest_reg = self.reg_field();
        let memory_form = self.opcode.bit(3);

        if !memory_form {
            let src = ctx.regs.d_sized(src_reg, OpSize::Byte);
            let dest = ctx.regs.d_sized(dest_reg, OpSize::Byte);
            let result = if subtract {
                alu::sbcd(src, dest, &mut ctx.regs.sr)
            } else {
                alu::abcd(src, dest, &mut ctx.regs.sr)
            };
            ctx.regs.set_d(dest_reg, result, OpSize::Byte);
            ctx.scheduler.wait(2);
            ctx.scheduler.prefetch_one();
            self.finish();
            return Ok(());
        }

        match self.phase {
            0 => {
                ctx.scheduler.wait(2);
                ctx.regs.dec_addr(src_reg, OpSize::Byte);
                ctx.scheduler.read(
                    ctx.regs.a(src_reg),
                    OpSize::Byte,
                    AddrSpace::Data,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            1 => {
                self.value = ctx.scheduler.data();
                ctx.regs.dec_addr(dest_reg, OpSize::Byte);
                ctx.scheduler.read(
                    ctx.regs.a(dest_reg),
                    OpSize::Byte,
                    AddrSpace::Data,
                    OnComplete::None,
                );
                self.phase = 2;
            }
            _ => {
                let src = self.value;
                let dest = ctx.scheduler.data();
                let result = if subtract {
                    alu::sbcd(src, dest, &mut ctx.regs.sr)
                } else {
                    alu::abcd(src, dest, &mut ctx.regs.sr)
                };
                ctx.scheduler.prefetch_one();
                ctx.scheduler.write(
                    ctx.regs.a(dest_reg),
                    result,
                    OpSize::Byte,
                    WriteOrder::LswFirst,
                );
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn nbcd(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };

        match self.phase {
            0 => {
                let valid = mode == AddressingMode::DataReg
                    || (mode.is_memory() && mode.is_writable());
                if !valid {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Byte, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let value = operand.value(ctx.regs)?;
                let result = alu::nbcd(value, &mut ctx.regs.sr);
                if let Operand::DataReg { reg, .. } = operand {
                    ctx.regs.set_d(reg, result, OpSize::Byte);
                    ctx.scheduler.wait(2);
                    ctx.scheduler.prefetch_one();
                } else {
                    ctx.scheduler.prefetch_one();
                    self.write_operand(ctx, operand, result)?;
                }
                self.finish();
            }
        }
        Ok(())
    }

    /// CMPM (Ay)+,(Ax)+.
    pub(super) fn cmpm(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let src_reg = self.low_reg_field();
        let dest_reg = self.reg_field();

        match self.phase {
            0 => {
                ctx.scheduler.read(ctx.regs.a(src_reg), size, AddrSpace::Data, OnComplete::None);
                ctx.scheduler.inc_addr_reg(src_reg, size);
                self.phase = 1;
            }
            1 => {
                self.value = ctx.scheduler.data();
                ctx.scheduler.read(ctx.regs.a(dest_reg), size, AddrSpace::Data, OnComplete::None);
                ctx.scheduler.inc_addr_reg(dest_reg, size);
                self.phase = 2;
            }
            _ => {
                alu::cmp(ctx.scheduler.data(), self.value, size, &mut ctx.regs.sr);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn multiply(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let signed = opcodes::decode(self.opcode) == InstructionKind::Muls;
        let reg = self.reg_field();

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if mode == AddressingMode::AddrReg {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Word, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let src = ctx.ea.operand()?.value(ctx.regs)? as u16;
                let dest = ctx.regs.d_sized(reg, OpSize::Word) as u16;
                let (result, cycles) = if signed {
                    alu::muls(src, dest, &mut ctx.regs.sr)
                } else {
                    alu::mulu(src, dest, &mut ctx.regs.sr)
                };
                ctx.regs.set_d(reg, result, OpSize::LongWord);
                ctx.scheduler.wait((cycles - 4) as u8);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn divide(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let signed = opcodes::decode(self.opcode) == InstructionKind::Divs;
        let reg = self.reg_field();

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if mode == AddressingMode::AddrReg {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Word, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let divisor = ctx.ea.operand()?.value(ctx.regs)? as u16;
                if divisor == 0 {
                    alu::div_zero_flags(&mut ctx.regs.sr);
                    ctx.scheduler.wait(DIVIDE_BY_ZERO_WAIT);
                    self.raise_trap_exception(ctx, ExceptionType::DivideByZero, None);
                    return Ok(());
                }

                let dividend = ctx.regs.d(reg);
                let result = if signed {
                    alu::divs(dividend, divisor, &mut ctx.regs.sr)
                } else {
                    alu::divu(dividend, divisor, &mut ctx.regs.sr)
                };
                match result {
                    DivResult::Done { value, cycles } => {
                        ctx.regs.set_d(reg, value, OpSize::LongWord);
                        ctx.scheduler.wait((cycles - 4) as u8);
                    }
                    DivResult::Overflow { cycles } => {
                        // destination is left untouched
                        ctx.scheduler.wait((cycles - 4) as u8);
                    }
                }
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn chk(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.reg_field();

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if mode == AddressingMode::AddrReg {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::Word, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let bound = ctx.ea.operand()?.value(ctx.regs)?;
                let value = ctx.regs.d_sized(reg, OpSize::Word);
                if alu::chk(bound, value, &mut ctx.regs.sr) {
                    ctx.scheduler.wait(4);
                    self.raise_trap_exception(ctx, ExceptionType::Chk, None);
                } else {
                    ctx.scheduler.wait(6);
                    ctx.scheduler.prefetch_one();
                    self.finish();
                }
            }
        }
        Ok(())
    }

    /// NEG/NEGX/NOT/CLR/TST: single-operand forms sharing one shape. CLR and
    /// the rest all read the operand first, which is the documented 68000
    /// behavior for memory destinations.
    pub(super) fn unary_alu(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let kind = opcodes::decode(self.opcode);
        let Some(size) = self.size_field() else { return self.illegal(ctx) };
        let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };

        match self.phase {
            0 => {
                let valid = mode == AddressingMode::DataReg
                    || (mode.is_memory() && mode.is_writable());
                if !valid {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let value = operand.value(ctx.regs)?;
                let sr = &mut ctx.regs.sr;

                let result = match kind {
                    InstructionKind::Neg => alu::neg(value, size, sr),
                    InstructionKind::Negx => alu::negx(value, size, sr),
                    InstructionKind::Not => alu::not(value, size, sr),
                    InstructionKind::Clr => alu::clr(sr),
                    InstructionKind::Tst => {
                        alu::move_flags(value, size, sr);
                        ctx.scheduler.prefetch_one();
                        self.finish();
                        return Ok(());
                    }
                    _ => unreachable!("unary_alu dispatch"),
                };

                if let Operand::DataReg { reg, .. } = operand {
                    ctx.regs.set_d(reg, result, size);
                    if size == OpSize::LongWord {
                        ctx.scheduler.wait(2);
                    }
                    ctx.scheduler.prefetch_one();
                } else {
                    ctx.scheduler.prefetch_one();
                    self.write_operand(ctx, operand, result)?;
                }
                self.finish();
            }
        }
        Ok(())
    }
}
