//! MOVE in all its shapes, MOVEM/MOVEP, status moves, LEA/PEA.

use crate::alu;
use crate::bus::AddrSpace;
use crate::ea::{AddressingMode, EaFlags};
use crate::error::CpuResult;
use crate::instructions::{ExecCtx, InstructionUnit};
use crate::num::GetBit;
use crate::opcodes::{self, InstructionKind};
use crate::scheduler::{CallOp, OnComplete, ReadImmFlag, WriteOrder};
use crate::size::OpSize;

impl InstructionUnit {
    fn move_size(&self) -> Option<OpSize> {
        match self.opcode & 0x3000 {
            0x1000 => Some(OpSize::Byte),
            0x3000 => Some(OpSize::Word),
            0x2000 => Some(OpSize::LongWord),
            _ => None,
        }
    }

    /// Destination EA of a MOVE, with mode and register fields swapped
    /// relative to the source encoding.
    fn move_dest_field(&self) -> u8 {
        let mode = ((self.opcode >> 6) & 0x7) as u8;
        let reg = ((self.opcode >> 9) & 0x7) as u8;
        (mode << 3) | reg
    }

    pub(super) fn move_(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let Some(size) = self.move_size() else { return self.illegal(ctx) };
        let dest_field = self.move_dest_field();
        let Some(dest_mode) = AddressingMode::from_ea_field(dest_field) else {
            return self.illegal(ctx);
        };

        match self.phase {
            0 => {
                let Some(src_mode) = self.ea_mode() else { return self.illegal(ctx) };
                let src_valid = src_mode != AddressingMode::AddrReg || size != OpSize::Byte;
                let dest_valid = dest_mode == AddressingMode::DataReg
                    || (dest_mode.is_memory() && dest_mode.is_writable());
                if !src_valid || !dest_valid {
                    return self.illegal(ctx);
                }

                self.schedule_ea(ctx, size, EaFlags::NONE)?;
                self.phase = 1;
            }
            1 => {
                let value = ctx.ea.operand()?.value(ctx.regs)?;
                self.value = value;
                alu::move_flags(value, size, &mut ctx.regs.sr);

                let reg = dest_field & 0x7;
                match dest_mode {
                    AddressingMode::DataReg => {
                        ctx.regs.set_d(reg, value, size);
                        ctx.scheduler.prefetch_one();
                        self.finish();
                    }
                    AddressingMode::Indirect => {
                        ctx.scheduler.write(ctx.regs.a(reg), value, size, WriteOrder::MswFirst);
                        ctx.scheduler.prefetch_one();
                        self.finish();
                    }
                    AddressingMode::Postinc => {
                        ctx.scheduler.write(ctx.regs.a(reg), value, size, WriteOrder::MswFirst);
                        ctx.scheduler.inc_addr_reg(reg, size);
                        ctx.scheduler.prefetch_one();
                        self.finish();
                    }
                    AddressingMode::Predec => {
                        // the trailing prefetch overtakes the store here;
                        // the stored words themselves go low word first
                        ctx.regs.dec_addr(reg, size);
                        ctx.scheduler.prefetch_one();
                        ctx.scheduler.write(ctx.regs.a(reg), value, size, WriteOrder::LswFirst);
                        self.finish();
                    }
                    _ => {
                        ctx.ea.schedule(ctx.scheduler, ctx.regs, dest_field, size, EaFlags::NO_READ)?;
                        self.phase = 2;
                    }
                }
            }
            _ => {
                let address = ctx.ea.operand()?.address()?;
                ctx.scheduler.write(address, self.value, size, WriteOrder::MswFirst);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn movea(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let size = if self.opcode & 0x3000 == 0x3000 { OpSize::Word } else { OpSize::LongWord };
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
                let value = size.sign_extend(ctx.ea.operand()?.value(ctx.regs)?);
                ctx.regs.set_a(reg, value, OpSize::LongWord);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn moveq(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let value = OpSize::Byte.sign_extend((self.opcode & 0xFF).into());
        alu::move_flags(value, OpSize::LongWord, &mut ctx.regs.sr);
        ctx.regs.set_d(self.reg_field(), value, OpSize::LongWord);
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn move_from_sr(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if mode == AddressingMode::DataReg {
                    let status = ctx.regs.status();
                    ctx.regs.set_d(self.low_reg_field(), status.into(), OpSize::Word);
                    ctx.scheduler.wait(2);
                    ctx.scheduler.prefetch_one();
                    self.finish();
                    return Ok(());
                }
                if !mode.is_memory() || !mode.is_writable() {
                    return self.illegal(ctx);
                }
                // the destination is read before it is overwritten
                self.schedule_ea(ctx, OpSize::Word, EaFlags::NONE)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                let status: u32 = ctx.regs.status().into();
                ctx.scheduler.prefetch_one();
                self.write_operand(ctx, operand, status)?;
                self.finish();
            }
        }
        Ok(())
    }

    /// MOVE to CCR / MOVE to SR; both refill the pipeline afterwards.
    pub(super) fn move_to_status(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let to_sr = opcodes::decode(self.opcode) == InstructionKind::MoveToSr;

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
                let value = ctx.ea.operand()?.value(ctx.regs)? as u16;
                if to_sr {
                    ctx.regs.set_status(value);
                } else {
                    ctx.regs.sr.set_ccr(value as u8);
                }
                ctx.scheduler.wait(4);
                ctx.regs.pc = ctx.regs.pc.wrapping_add(2);
                ctx.scheduler.prefetch_two();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn move_usp(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.low_reg_field();
        if self.opcode.bit(3) {
            let usp = ctx.regs.usp;
            ctx.regs.set_a(reg, usp, OpSize::LongWord);
        } else {
            ctx.regs.usp = ctx.regs.a(reg);
        }
        ctx.scheduler.prefetch_one();
        self.finish();
        Ok(())
    }

    pub(super) fn lea(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let reg = self.reg_field();

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if !mode.is_control() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::LongWord, EaFlags::NO_READ)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                ctx.regs.set_a(reg, operand.address()?, OpSize::LongWord);
                if matches!(
                    operand.mode(),
                    AddressingMode::IndexIndirect | AddressingMode::IndexPc
                ) {
                    ctx.scheduler.wait(2);
                }
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn pea(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                if !mode.is_control() {
                    return self.illegal(ctx);
                }
                self.schedule_ea(ctx, OpSize::LongWord, EaFlags::NO_READ)?;
                self.phase = 1;
            }
            _ => {
                let operand = ctx.ea.operand()?;
                if matches!(
                    operand.mode(),
                    AddressingMode::IndexIndirect | AddressingMode::IndexPc
                ) {
                    ctx.scheduler.wait(2);
                }
                ctx.scheduler.push(operand.address()?, OpSize::LongWord, WriteOrder::MswFirst);
                ctx.scheduler.prefetch_one();
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn movem(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let to_memory = !self.opcode.bit(10);
        let size = if self.opcode.bit(6) { OpSize::LongWord } else { OpSize::Word };

        match self.phase {
            0 => {
                let Some(mode) = self.ea_mode() else { return self.illegal(ctx) };
                let valid = if to_memory {
                    matches!(
                        mode,
                        AddressingMode::Indirect
                            | AddressingMode::Predec
                            | AddressingMode::DispIndirect
                            | AddressingMode::IndexIndirect
                            | AddressingMode::AbsShort
                            | AddressingMode::AbsLong
                    )
                } else {
                    matches!(
                        mode,
                        AddressingMode::Indirect
                            | AddressingMode::Postinc
                            | AddressingMode::DispIndirect
                            | AddressingMode::IndexIndirect
                            | AddressingMode::AbsShort
                            | AddressingMode::AbsLong
                            | AddressingMode::DispPc
                            | AddressingMode::IndexPc
                    )
                };
                if !valid {
                    return self.illegal(ctx);
                }

                ctx.scheduler.read_imm(
                    ctx.regs,
                    OpSize::Word,
                    ReadImmFlag::DoPrefetch,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            1 => {
                self.value = ctx.scheduler.data();
                let mode = self.ea_mode().expect("validated in phase 0");
                if matches!(mode, AddressingMode::Predec | AddressingMode::Postinc) {
                    // the register list transfers straight through An
                    self.phase = 2;
                } else {
                    self.schedule_ea(ctx, size, EaFlags::NO_READ)?;
                    self.phase = 2;
                }
            }
            _ => {
                let mask = self.value as u16;
                let mode = self.ea_mode().expect("validated in phase 0");

                match mode {
                    AddressingMode::Predec => {
                        let reg = self.low_reg_field();
                        let mut addr = ctx.regs.a(reg);
                        // mask bit 0 names A7 in the predecrement form;
                        // registers are stored from A7 down to D0
                        for bit in 0..16u8 {
                            if mask.bit(bit) {
                                let index = 15 - bit;
                                let value = register_value(ctx, index);
                                addr = addr.wrapping_sub(size.byte_count());
                                ctx.scheduler.write(addr, value, size, WriteOrder::LswFirst);
                            }
                        }
                        ctx.scheduler.call(CallOp::WriteAddrLong { reg, value: addr });
                        ctx.scheduler.prefetch_one();
                    }
                    AddressingMode::Postinc => {
                        let reg = self.low_reg_field();
                        let mut addr = ctx.regs.a(reg);
                        for bit in 0..16u8 {
                            if mask.bit(bit) {
                                ctx.scheduler.read(
                                    addr,
                                    size,
                                    AddrSpace::Data,
                                    OnComplete::MovemReg { index: bit, size },
                                );
                                addr = addr.wrapping_add(size.byte_count());
                            }
                        }
                        // one word beyond the register list is always fetched
                        ctx.scheduler.read(addr, OpSize::Word, AddrSpace::Data, OnComplete::None);
                        ctx.scheduler.call(CallOp::WriteAddrLong { reg, value: addr });
                        ctx.scheduler.prefetch_one();
                    }
                    _ => {
                        let mut addr = ctx.ea.operand()?.address()?;
                        for bit in 0..16u8 {
                            if mask.bit(bit) {
                                if to_memory {
                                    let value = register_value(ctx, bit);
                                    ctx.scheduler.write(addr, value, size, WriteOrder::MswFirst);
                                } else {
                                    ctx.scheduler.read(
                                        addr,
                                        size,
                                        AddrSpace::Data,
                                        OnComplete::MovemReg { index: bit, size },
                                    );
                                }
                                addr = addr.wrapping_add(size.byte_count());
                            }
                        }
                        if !to_memory {
                            ctx.scheduler.read(
                                addr,
                                OpSize::Word,
                                AddrSpace::Data,
                                OnComplete::None,
                            );
                        }
                        ctx.scheduler.prefetch_one();
                    }
                }
                self.finish();
            }
        }
        Ok(())
    }

    pub(super) fn movep(&mut self, ctx: &mut ExecCtx<'_>) -> CpuResult<()> {
        let data_reg = self.reg_field();
        let addr_reg = self.low_reg_field();
        let to_memory = self.opcode.bit(7);
        let long = self.opcode.bit(6);
        let shifts: &[u8] = if long { &[24, 16, 8, 0] } else { &[8, 0] };

        match self.phase {
            0 => {
                self.value = ctx
                    .regs
                    .a(addr_reg)
                    .wrapping_add(OpSize::Word.sign_extend(ctx.regs.irc.into()));
                ctx.scheduler.read_imm(
                    ctx.regs,
                    OpSize::Word,
                    ReadImmFlag::DoPrefetch,
                    OnComplete::None,
                );
                self.phase = 1;
            }
            1 => {
                let base = self.value;
                if to_memory {
                    let value = ctx.regs.d(data_reg);
                    for (i, &shift) in shifts.iter().enumerate() {
                        ctx.scheduler.write(
                            base.wrapping_add(2 * i as u32),
                            (value >> shift) & 0xFF,
                            OpSize::Byte,
                            WriteOrder::LswFirst,
                        );
                    }
                    ctx.scheduler.prefetch_one();
                    self.finish();
                } else {
                    ctx.scheduler.clear_gathered();
                    for (i, &shift) in shifts.iter().enumerate() {
                        ctx.scheduler.read(
                            base.wrapping_add(2 * i as u32),
                            OpSize::Byte,
                            AddrSpace::Data,
                            OnComplete::GatherByte { shift },
                        );
                    }
                    ctx.scheduler.prefetch_one();
                    self.phase = 2;
                }
            }
            _ => {
                let value = ctx.scheduler.gathered();
                let size = if long { OpSize::LongWord } else { OpSize::Word };
                ctx.regs.set_d(data_reg, value, size);
                self.finish();
            }
        }
        Ok(())
    }
}

fn register_value(ctx: &ExecCtx<'_>, index: u8) -> u32 {
    if index < 8 { ctx.regs.d(index) } else { ctx.regs.a(index - 8) }
}
