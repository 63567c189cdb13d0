//! The two-word prefetch pipeline. IRD holds the executing opcode, IRC the
//! word after it. At every instruction boundary the pipeline satisfies
//! `IRD == mem[PC]` and `IRC == mem[PC + 2]` with PC naming the opcode
//! address; each prefetch kind below maintains that invariant.

use crate::registers::Registers;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum PrefetchKind {
    /// Refill the opcode half of the pipeline: IR/IRD from `mem[PC]`.
    /// Scheduled together with [`PrefetchKind::Irc`] after PC changes
    /// (branches, jumps, returns, exception entry).
    Ird,
    /// Refill only IRC from `mem[PC + 2]`.
    Irc,
    /// Sequential advance at the end of a straight-line instruction:
    /// PC moves to the next opcode, IRC shifts into IR/IRD and a fresh IRC
    /// is fetched.
    One,
}

impl PrefetchKind {
    /// Program-space address this prefetch reads from. `One` advances PC when
    /// it starts, so the fetch lands one word past the incoming IRC.
    pub(crate) fn start(self, regs: &mut Registers) -> u32 {
        match self {
            Self::Ird => regs.pc,
            Self::Irc => regs.pc.wrapping_add(2),
            Self::One => {
                regs.pc = regs.pc.wrapping_add(2);
                regs.pc.wrapping_add(2)
            }
        }
    }

    /// Fold the fetched word into the pipeline registers.
    pub(crate) fn apply(self, regs: &mut Registers, word: u16) {
        match self {
            Self::Ird => {
                regs.ir = word;
                regs.ird = word;
            }
            Self::Irc => {
                regs.irc = word;
            }
            Self::One => {
                regs.ir = regs.irc;
                regs.ird = regs.irc;
                regs.irc = word;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_prefetch_shifts_the_pipeline() {
        let mut regs = Registers::new();
        regs.pc = 0x1000;
        regs.ird = 0x4E71;
        regs.irc = 0x5280;

        let addr = PrefetchKind::One.start(&mut regs);
        assert_eq!(addr, 0x1004);
        assert_eq!(regs.pc, 0x1002);

        PrefetchKind::One.apply(&mut regs, 0xABCD);
        assert_eq!(regs.ir, 0x5280);
        assert_eq!(regs.ird, 0x5280);
        assert_eq!(regs.irc, 0xABCD);
    }

    #[test]
    fn refill_reads_target_and_target_plus_two() {
        let mut regs = Registers::new();
        regs.pc = 0x2000;

        assert_eq!(PrefetchKind::Ird.start(&mut regs), 0x2000);
        assert_eq!(PrefetchKind::Irc.start(&mut regs), 0x2002);
        assert_eq!(regs.pc, 0x2000);

        PrefetchKind::Ird.apply(&mut regs, 0x1111);
        PrefetchKind::Irc.apply(&mut regs, 0x2222);
        assert_eq!(regs.ird, 0x1111);
        assert_eq!(regs.irc, 0x2222);
    }
}
