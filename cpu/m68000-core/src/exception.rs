//! Pending-exception bookkeeping. Risers and the bus manager record
//! exceptions here; the exception unit drains them one at a time.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ExceptionType {
    Reset,
    BusError,
    AddressError,
    IllegalInstruction,
    Privilege,
    Trace,
    Interrupt,
    Trap,
    DivideByZero,
    Chk,
    TrapV,
    LineA,
    LineF,
}

/// Everything the address/bus error stack frame needs about the faulted
/// access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct AccessFault {
    pub address: u32,
    pub func_codes: u8,
    /// Set for reads, clear for writes.
    pub read: bool,
    /// Set when the fault was raised on an instruction-space access.
    pub instruction: bool,
    pub pc: u32,
}

/// At most one instance of each exception kind can be pending at a time;
/// raising an already-pending kind replaces its operand record.
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct ExceptionManager {
    raised: u16,
    address_error: AccessFault,
    bus_error: AccessFault,
    trap_vector: u8,
    interrupt_priority: u8,
}

impl ExceptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(ex: ExceptionType) -> u16 {
        1 << ex as u16
    }

    pub fn rise(&mut self, ex: ExceptionType) {
        self.raised |= Self::bit(ex);
    }

    pub fn rise_address_error(&mut self, fault: AccessFault) {
        self.address_error = fault;
        self.rise(ExceptionType::AddressError);
    }

    pub fn rise_bus_error(&mut self, fault: AccessFault) {
        self.bus_error = fault;
        self.rise(ExceptionType::BusError);
    }

    pub fn rise_trap(&mut self, vector: u8) {
        self.trap_vector = vector;
        self.rise(ExceptionType::Trap);
    }

    pub fn rise_interrupt(&mut self, ipl: u8) {
        self.interrupt_priority = ipl & 0x7;
        self.rise(ExceptionType::Interrupt);
    }

    #[must_use]
    pub fn is_raised(&self, ex: ExceptionType) -> bool {
        self.raised & Self::bit(ex) != 0
    }

    #[must_use]
    pub fn any_raised(&self) -> bool {
        self.raised != 0
    }

    pub fn accept(&mut self, ex: ExceptionType) {
        self.raised &= !Self::bit(ex);
    }

    pub fn accept_address_error(&mut self) -> AccessFault {
        self.accept(ExceptionType::AddressError);
        self.address_error
    }

    pub fn accept_bus_error(&mut self) -> AccessFault {
        self.accept(ExceptionType::BusError);
        self.bus_error
    }

    pub fn accept_trap(&mut self) -> u8 {
        self.accept(ExceptionType::Trap);
        self.trap_vector
    }

    pub fn accept_interrupt(&mut self) -> u8 {
        self.accept(ExceptionType::Interrupt);
        self.interrupt_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rise_and_accept() {
        let mut exman = ExceptionManager::new();
        assert!(!exman.any_raised());

        exman.rise_trap(32);
        exman.rise(ExceptionType::Trace);
        assert!(exman.is_raised(ExceptionType::Trap));
        assert!(exman.is_raised(ExceptionType::Trace));

        assert_eq!(exman.accept_trap(), 32);
        assert!(!exman.is_raised(ExceptionType::Trap));
        assert!(exman.is_raised(ExceptionType::Trace));
    }

    #[test]
    fn address_error_record_round_trips() {
        let mut exman = ExceptionManager::new();
        let fault = AccessFault {
            address: 0x1001,
            func_codes: 0b101,
            read: false,
            instruction: false,
            pc: 0x400,
        };
        exman.rise_address_error(fault);
        assert_eq!(exman.accept_address_error(), fault);
    }
}
