//! The pin-level surface of the processor: control lines, address and data
//! latches, and the interrupt priority input. External components observe and
//! drive the CPU exclusively through this state.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusLine {
    /// Address strobe.
    As,
    /// Upper data strobe (even byte lane).
    Uds,
    /// Lower data strobe (odd byte lane).
    Lds,
    /// Read (set) / write (clear).
    Rw,
    /// Data transfer acknowledge, asserted once the addressed device responds.
    Dtack,
    /// Bus request from an external master.
    Br,
    /// Bus grant back to the external master.
    Bg,
    /// Bus error.
    Berr,
    Halt,
    /// Valid peripheral address; requests autovectored interrupt acknowledge.
    Vpa,
}

impl BusLine {
    fn mask(self) -> u16 {
        1 << match self {
            Self::As => 0,
            Self::Uds => 1,
            Self::Lds => 2,
            Self::Rw => 3,
            Self::Dtack => 4,
            Self::Br => 5,
            Self::Bg => 6,
            Self::Berr => 7,
            Self::Halt => 8,
            Self::Vpa => 9,
        }
    }
}

/// Address space driven on the function-code pins during a bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AddrSpace {
    Data,
    Program,
    /// CPU space; only interrupt acknowledge cycles use it.
    Cpu,
}

impl AddrSpace {
    /// FC2..FC0 for this space under the given privilege level.
    #[must_use]
    pub fn func_codes(self, supervisor: bool) -> u8 {
        match self {
            Self::Cpu => 0b111,
            Self::Data => 0b001 | (u8::from(supervisor) << 2),
            Self::Program => 0b010 | (u8::from(supervisor) << 2),
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct CpuBus {
    lines: u16,
    address: u32,
    data: u16,
    func_codes: u8,
    ipl: u8,
}

impl CpuBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_set(&self, line: BusLine) -> bool {
        self.lines & line.mask() != 0
    }

    pub fn set(&mut self, line: BusLine) {
        self.lines |= line.mask();
    }

    pub fn clear(&mut self, line: BusLine) {
        self.lines &= !line.mask();
    }

    #[must_use]
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    #[must_use]
    pub fn data(&self) -> u16 {
        self.data
    }

    pub fn set_data(&mut self, data: u16) {
        self.data = data;
    }

    #[must_use]
    pub fn func_codes(&self) -> u8 {
        self.func_codes
    }

    pub fn set_func_codes(&mut self, func_codes: u8) {
        self.func_codes = func_codes & 0x7;
    }

    /// Interrupt priority level currently driven on IPL2..IPL0.
    #[must_use]
    pub fn interrupt_priority(&self) -> u8 {
        self.ipl
    }

    pub fn set_interrupt_priority(&mut self, ipl: u8) {
        self.ipl = ipl & 0x7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_independent() {
        let mut bus = CpuBus::new();
        bus.set(BusLine::As);
        bus.set(BusLine::Uds);
        assert!(bus.is_set(BusLine::As));
        assert!(bus.is_set(BusLine::Uds));
        assert!(!bus.is_set(BusLine::Lds));

        bus.clear(BusLine::As);
        assert!(!bus.is_set(BusLine::As));
        assert!(bus.is_set(BusLine::Uds));
    }

    #[test]
    fn function_codes() {
        assert_eq!(AddrSpace::Data.func_codes(false), 0b001);
        assert_eq!(AddrSpace::Data.func_codes(true), 0b101);
        assert_eq!(AddrSpace::Program.func_codes(false), 0b010);
        assert_eq!(AddrSpace::Program.func_codes(true), 0b110);
        assert_eq!(AddrSpace::Cpu.func_codes(true), 0b111);
    }
}
