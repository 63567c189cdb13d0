//! External interfaces: memory the CPU talks to through the bus manager, and
//! the device that answers interrupt acknowledge cycles.

/// Asynchronous memory seen from the bus manager. A transaction starts with
/// one of the `init_*` calls and is finished once `is_idle` reports true; the
/// read value is then available in the corresponding latch. A memory that
/// never becomes idle holds DTACK deasserted forever and stalls the CPU,
/// matching the real bus protocol.
pub trait MemoryInterface {
    fn init_read_byte(&mut self, address: u32);

    fn init_read_word(&mut self, address: u32);

    fn init_write_byte(&mut self, address: u32, value: u8);

    fn init_write_word(&mut self, address: u32, value: u16);

    fn is_idle(&self) -> bool;

    fn latched_byte(&self) -> u8;

    fn latched_word(&self) -> u16;

    fn max_address(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    /// Device supplies the vector number and DTACK.
    Vectored,
    /// Device asserts VPA; the CPU derives the vector from the priority level.
    Autovectored,
    /// Device asserts BERR; the spurious interrupt vector is taken.
    Spurious,
}

/// The party that answers interrupt acknowledge bus cycles.
pub trait InterruptingDevice {
    fn init_interrupt_ack(&mut self, ipl: u8);

    fn is_idle(&self) -> bool;

    fn vector_number(&self) -> u8;

    fn interrupt_type(&self) -> InterruptType;
}

/// Default interrupting device: always answers with VPA, so every interrupt
/// is autovectored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutovectoredDevice {
    ipl: u8,
}

/// Vector number of autovector level 1; level N maps to `AUTOVECTOR_BASE + N - 1`.
pub const AUTOVECTOR_BASE: u8 = 25;

/// Vector number taken when the acknowledge cycle ends in a bus error.
pub const SPURIOUS_INTERRUPT_VECTOR: u8 = 24;

impl AutovectoredDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterruptingDevice for AutovectoredDevice {
    fn init_interrupt_ack(&mut self, ipl: u8) {
        self.ipl = ipl & 0x7;
    }

    fn is_idle(&self) -> bool {
        true
    }

    fn vector_number(&self) -> u8 {
        AUTOVECTOR_BASE + self.ipl.saturating_sub(1)
    }

    fn interrupt_type(&self) -> InterruptType {
        InterruptType::Autovectored
    }
}
