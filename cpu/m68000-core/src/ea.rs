//! Effective-address decoding. Turns the 6-bit mode/register field into
//! scheduler operations that resolve the addressing mode and, unless asked
//! not to, read the operand. The decoded [`Operand`] becomes available once
//! the scheduled operations drain.

use crate::bus::AddrSpace;
use crate::error::{CpuError, CpuResult};
use crate::num::GetBit;
use crate::registers::Registers;
use crate::scheduler::{BusScheduler, OnComplete, ReadImmFlag};
use crate::size::OpSize;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AddressingMode {
    /// Dn
    DataReg,
    /// An
    AddrReg,
    /// (An)
    Indirect,
    /// (An)+
    Postinc,
    /// -(An)
    Predec,
    /// (d16,An)
    DispIndirect,
    /// (d8,An,Xn)
    IndexIndirect,
    /// (xxx).W
    AbsShort,
    /// (xxx).L
    AbsLong,
    /// (d16,PC)
    DispPc,
    /// (d8,PC,Xn)
    IndexPc,
    /// #imm
    Immediate,
}

impl AddressingMode {
    /// Decode the mode half of a 6-bit EA field; `None` for the three
    /// reserved 111-mode encodings, which decode as illegal instructions.
    #[must_use]
    pub fn from_ea_field(ea: u8) -> Option<Self> {
        match (ea >> 3) & 0x7 {
            0b000 => Some(Self::DataReg),
            0b001 => Some(Self::AddrReg),
            0b010 => Some(Self::Indirect),
            0b011 => Some(Self::Postinc),
            0b100 => Some(Self::Predec),
            0b101 => Some(Self::DispIndirect),
            0b110 => Some(Self::IndexIndirect),
            0b111 => match ea & 0x7 {
                0b000 => Some(Self::AbsShort),
                0b001 => Some(Self::AbsLong),
                0b010 => Some(Self::DispPc),
                0b011 => Some(Self::IndexPc),
                0b100 => Some(Self::Immediate),
                _ => None,
            },
            _ => unreachable!("masked to three bits"),
        }
    }

    #[must_use]
    pub fn is_register(self) -> bool {
        matches!(self, Self::DataReg | Self::AddrReg)
    }

    #[must_use]
    pub fn is_memory(self) -> bool {
        !matches!(self, Self::DataReg | Self::AddrReg | Self::Immediate)
    }

    /// Modes that can be stored to.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::DispPc | Self::IndexPc | Self::Immediate)
    }

    /// Control-addressing modes as the instruction set manual defines them
    /// (JMP/JSR/LEA/PEA/MOVEM targets).
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Indirect
                | Self::DispIndirect
                | Self::IndexIndirect
                | Self::AbsShort
                | Self::AbsLong
                | Self::DispPc
                | Self::IndexPc
        )
    }

    /// PC words consumed by the extension part of this mode; used by
    /// handlers that track PC explicitly.
    #[must_use]
    pub fn extension_words(self, size: OpSize) -> u32 {
        match self {
            Self::DataReg | Self::AddrReg | Self::Indirect | Self::Postinc | Self::Predec => 0,
            Self::DispIndirect
            | Self::IndexIndirect
            | Self::AbsShort
            | Self::DispPc
            | Self::IndexPc => 1,
            Self::AbsLong => 2,
            Self::Immediate => {
                if size == OpSize::LongWord {
                    2
                } else {
                    1
                }
            }
        }
    }
}

/// `PC + {0,2,4}` depending on how many extension words the mode consumed.
#[must_use]
pub fn advance_pc(pc: u32, mode: AddressingMode, size: OpSize) -> u32 {
    pc.wrapping_add(2 * mode.extension_words(size))
}

/// Brief extension word of the indexed modes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BriefExt {
    pub displacement: i8,
    pub index_reg: u8,
    pub index_is_addr: bool,
    pub long_index: bool,
}

impl From<u16> for BriefExt {
    fn from(raw: u16) -> Self {
        Self {
            displacement: raw as u8 as i8,
            index_reg: ((raw >> 12) & 0x7) as u8,
            index_is_addr: raw.bit(15),
            long_index: raw.bit(11),
        }
    }
}

impl BriefExt {
    pub(crate) fn apply(self, base: u32, regs: &Registers) -> u32 {
        let index_raw =
            if self.index_is_addr { regs.a(self.index_reg) } else { regs.d(self.index_reg) };
        let index = if self.long_index { index_raw } else { index_raw as u16 as i16 as u32 };
        base.wrapping_add(self.displacement as u32).wrapping_add(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Operand {
    DataReg { reg: u8, size: OpSize },
    AddrReg { reg: u8, size: OpSize },
    Immediate { value: u32, size: OpSize },
    Pointer { address: u32, value: Option<u32>, size: OpSize, mode: AddressingMode },
}

impl Operand {
    #[must_use]
    pub fn mode(self) -> AddressingMode {
        match self {
            Self::DataReg { .. } => AddressingMode::DataReg,
            Self::AddrReg { .. } => AddressingMode::AddrReg,
            Self::Immediate { .. } => AddressingMode::Immediate,
            Self::Pointer { mode, .. } => mode,
        }
    }

    #[must_use]
    pub fn is_addr_reg(self) -> bool {
        matches!(self, Self::AddrReg { .. })
    }

    #[must_use]
    pub fn is_data_reg(self) -> bool {
        matches!(self, Self::DataReg { .. })
    }

    #[must_use]
    pub fn size(self) -> OpSize {
        match self {
            Self::DataReg { size, .. }
            | Self::AddrReg { size, .. }
            | Self::Immediate { size, .. }
            | Self::Pointer { size, .. } => size,
        }
    }

    /// Operand value truncated to the operand width.
    pub fn value(self, regs: &Registers) -> CpuResult<u32> {
        match self {
            Self::DataReg { reg, size } => Ok(regs.d_sized(reg, size)),
            Self::AddrReg { reg, size } => {
                if size == OpSize::Byte {
                    return Err(CpuError::Internal("byte read of an address register"));
                }
                Ok(regs.a_sized(reg, size))
            }
            Self::Immediate { value, size } => Ok(size.truncate(value)),
            Self::Pointer { value, size, .. } => value
                .map(|value| size.truncate(value))
                .ok_or(CpuError::Internal("pointer operand was resolved without a read")),
        }
    }

    /// Resolved memory address of a pointer operand.
    pub fn address(self) -> CpuResult<u32> {
        match self {
            Self::Pointer { address, .. } => Ok(address),
            _ => Err(CpuError::Internal("operand is not a memory pointer")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub(crate) struct EaFlags {
    pub no_read: bool,
    pub no_prefetch: bool,
}

impl EaFlags {
    pub const NONE: Self = Self { no_read: false, no_prefetch: false };
    pub const NO_READ: Self = Self { no_read: true, no_prefetch: false };
    /// Resolve the address only, with no operand read and no pipeline
    /// traffic; what JMP/JSR need.
    pub const ADDRESS_ONLY: Self = Self { no_read: true, no_prefetch: true };

    fn is_none(self) -> bool {
        self == Self::NONE
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct EaDecoder {
    result: Option<Operand>,
    mode: AddressingMode,
    size: OpSize,
    flags: EaFlags,
    pointer: u32,
}

impl EaDecoder {
    pub fn new() -> Self {
        Self {
            result: None,
            mode: AddressingMode::DataReg,
            size: OpSize::Word,
            flags: EaFlags::NONE,
            pointer: 0,
        }
    }

    pub fn reset(&mut self) {
        self.result = None;
    }

    pub fn ready(&self) -> bool {
        self.result.is_some()
    }

    pub fn operand(&self) -> CpuResult<Operand> {
        self.result.ok_or(CpuError::Internal("effective address is not decoded yet"))
    }

    /// Enqueue the scheduler operations that resolve `ea_field`. Scheduled
    /// operations mutate registers, so starting a decode while earlier work
    /// is still queued would read stale state; that is a protocol violation.
    pub fn schedule(
        &mut self,
        scheduler: &mut BusScheduler,
        regs: &mut Registers,
        ea_field: u8,
        size: OpSize,
        flags: EaFlags,
    ) -> CpuResult<()> {
        if !scheduler.is_idle() {
            return Err(CpuError::Internal("effective-address decode with a busy scheduler"));
        }

        let mode = AddressingMode::from_ea_field(ea_field)
            .ok_or(CpuError::Internal("reserved addressing mode reached the decoder"))?;
        let reg = ea_field & 0x7;

        self.result = None;
        self.mode = mode;
        self.size = size;
        self.flags = flags;

        match mode {
            AddressingMode::DataReg => self.result = Some(Operand::DataReg { reg, size }),
            AddressingMode::AddrReg => self.result = Some(Operand::AddrReg { reg, size }),

            AddressingMode::Indirect => self.read_and_save(scheduler, regs.a(reg), size),

            AddressingMode::Postinc => {
                // the increment is queued ahead of the read, but the read
                // address was latched here, before it applies
                if flags.is_none() {
                    scheduler.inc_addr_reg(reg, size);
                }
                self.read_and_save(scheduler, regs.a(reg), size);
            }

            AddressingMode::Predec => {
                if flags.is_none() {
                    scheduler.wait(2);
                    regs.dec_addr(reg, size);
                }
                self.read_and_save(scheduler, regs.a(reg), size);
            }

            AddressingMode::DispIndirect => {
                let ptr = regs.a(reg).wrapping_add(OpSize::Word.sign_extend(regs.irc.into()));
                self.consume_extension_word(scheduler, regs);
                self.read_and_save(scheduler, ptr, size);
            }

            AddressingMode::IndexIndirect => {
                let ptr = BriefExt::from(regs.irc).apply(regs.a(reg), regs);
                self.schedule_indexed_overhead(scheduler, regs);
                self.read_and_save(scheduler, ptr, size);
            }

            AddressingMode::AbsShort => {
                let ptr = OpSize::Word.sign_extend(regs.irc.into());
                self.consume_extension_word(scheduler, regs);
                self.read_and_save(scheduler, ptr, size);
            }

            AddressingMode::AbsLong => {
                let flag = if flags.no_prefetch {
                    ReadImmFlag::NoPrefetch
                } else {
                    ReadImmFlag::DoPrefetch
                };
                scheduler.read_imm(regs, OpSize::LongWord, flag, OnComplete::EaAddress);
            }

            AddressingMode::DispPc => {
                // the extension word sits at PC + 2
                let base = regs.pc.wrapping_add(2);
                let ptr = base.wrapping_add(OpSize::Word.sign_extend(regs.irc.into()));
                self.consume_extension_word(scheduler, regs);
                self.read_and_save(scheduler, ptr, size);
            }

            AddressingMode::IndexPc => {
                let ptr = BriefExt::from(regs.irc).apply(regs.pc.wrapping_add(2), regs);
                self.schedule_indexed_overhead(scheduler, regs);
                self.read_and_save(scheduler, ptr, size);
            }

            AddressingMode::Immediate => {
                let flag = if flags.no_prefetch {
                    ReadImmFlag::NoPrefetch
                } else {
                    ReadImmFlag::DoPrefetch
                };
                if let Some(value) = scheduler.read_imm(regs, size, flag, OnComplete::EaImmediate)
                {
                    self.result = Some(Operand::Immediate { value: size.truncate(value), size });
                }
            }
        }

        Ok(())
    }

    /// One extension word: either a pipelined IRC refetch or, when the
    /// pipeline is left alone, the two internal cycles the address
    /// calculation costs.
    fn consume_extension_word(&self, scheduler: &mut BusScheduler, regs: &Registers) {
        if self.flags.no_prefetch {
            scheduler.wait(2);
        } else {
            scheduler.read_imm(regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
        }
    }

    /// Indexed modes pay two extra internal cycles on top of the extension
    /// word handling.
    fn schedule_indexed_overhead(&self, scheduler: &mut BusScheduler, regs: &Registers) {
        if self.flags.no_prefetch {
            scheduler.wait(6);
        } else {
            scheduler.wait(2);
            scheduler.read_imm(regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
        }
    }

    fn read_and_save(&mut self, scheduler: &mut BusScheduler, addr: u32, size: OpSize) {
        if self.flags.no_read {
            self.result =
                Some(Operand::Pointer { address: addr, value: None, size, mode: self.mode });
        } else {
            self.pointer = addr;
            scheduler.read(addr, size, AddrSpace::Data, OnComplete::EaOperand);
        }
    }

    /* completion hooks, invoked by the scheduler's tag dispatch */

    /// Absolute-long continuation: the address just arrived; either finish
    /// as a bare pointer or hand back the operand read to enqueue.
    pub(crate) fn on_address(&mut self, addr: u32) -> Option<(u32, OpSize)> {
        self.pointer = addr;
        if self.flags.no_read {
            self.result =
                Some(Operand::Pointer { address: addr, value: None, size: self.size, mode: self.mode });
            None
        } else {
            Some((addr, self.size))
        }
    }

    pub(crate) fn on_operand_value(&mut self, value: u32) {
        self.result = Some(Operand::Pointer {
            address: self.pointer,
            value: Some(self.size.truncate(value)),
            size: self.size,
            mode: self.mode,
        });
    }

    pub(crate) fn on_immediate(&mut self, value: u32) {
        self.result =
            Some(Operand::Immediate { value: self.size.truncate(value), size: self.size });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_decoding_covers_the_field() {
        assert_eq!(AddressingMode::from_ea_field(0b000_010), Some(AddressingMode::DataReg));
        assert_eq!(AddressingMode::from_ea_field(0b011_101), Some(AddressingMode::Postinc));
        assert_eq!(AddressingMode::from_ea_field(0b111_000), Some(AddressingMode::AbsShort));
        assert_eq!(AddressingMode::from_ea_field(0b111_100), Some(AddressingMode::Immediate));
        assert_eq!(AddressingMode::from_ea_field(0b111_101), None);
        assert_eq!(AddressingMode::from_ea_field(0b111_111), None);
    }

    #[test]
    fn brief_extension_word_fields() {
        // A3.L index, displacement -4
        let ext = BriefExt::from(0xB8FC);
        assert!(ext.index_is_addr);
        assert!(ext.long_index);
        assert_eq!(ext.index_reg, 3);
        assert_eq!(ext.displacement, -4);

        let mut regs = Registers::new();
        regs.set_a(3, 0x0000_0100, OpSize::LongWord);
        assert_eq!(ext.apply(0x2000, &regs), 0x2000 + 0x100 - 4);
    }

    #[test]
    fn word_index_is_sign_extended() {
        // D1.W index, displacement 0
        let ext = BriefExt::from(0x1000);
        let mut regs = Registers::new();
        regs.set_d(1, 0xFFFF_FFFE, OpSize::LongWord);
        assert_eq!(ext.apply(0x1000, &regs), 0x0FFE);
    }

    #[test]
    fn advance_pc_by_mode() {
        assert_eq!(advance_pc(0x1000, AddressingMode::DataReg, OpSize::Word), 0x1000);
        assert_eq!(advance_pc(0x1000, AddressingMode::DispIndirect, OpSize::Word), 0x1002);
        assert_eq!(advance_pc(0x1000, AddressingMode::AbsLong, OpSize::Word), 0x1004);
        assert_eq!(advance_pc(0x1000, AddressingMode::Immediate, OpSize::Word), 0x1002);
        assert_eq!(advance_pc(0x1000, AddressingMode::Immediate, OpSize::LongWord), 0x1004);
    }

    #[test]
    fn register_modes_resolve_immediately() {
        let mut ea = EaDecoder::new();
        let mut scheduler = BusScheduler::new();
        let mut regs = Registers::new();
        regs.set_d(3, 0xAABB_CCDD, OpSize::LongWord);

        ea.schedule(&mut scheduler, &mut regs, 0b000_011, OpSize::Word, EaFlags::NONE).unwrap();
        assert!(ea.ready());
        assert!(scheduler.is_idle());
        assert_eq!(ea.operand().unwrap().value(&regs).unwrap(), 0xCCDD);
    }

    #[test]
    fn decode_with_busy_scheduler_is_rejected() {
        let mut ea = EaDecoder::new();
        let mut scheduler = BusScheduler::new();
        let mut regs = Registers::new();
        scheduler.wait(4);

        let result = ea.schedule(&mut scheduler, &mut regs, 0, OpSize::Word, EaFlags::NONE);
        assert!(result.is_err());
    }
}
