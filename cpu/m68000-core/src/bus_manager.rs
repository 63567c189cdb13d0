//! Pin-level bus cycle executor. Exactly one bus cycle runs at a time; each
//! CPU tick advances the current cycle by one phase. Faults (bus error,
//! odd-address word access) are checked before the strobes go out and land in
//! the exception manager, never in the caller's lap.

use crate::bus::{AddrSpace, BusLine, CpuBus};
use crate::error::{CpuError, CpuResult};
use crate::exception::{AccessFault, ExceptionManager};
use crate::registers::{Registers, StatusRegister};
use crate::traits::{
    AUTOVECTOR_BASE, InterruptType, InterruptingDevice, MemoryInterface, SPURIOUS_INTERRUPT_VECTOR,
};
use bincode::{Decode, Encode};

/// In-model replacement for a read-modify-write callback; the only RMW user
/// on the 68000 is TAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ModifyOp {
    Tas,
}

impl ModifyOp {
    pub(crate) fn apply(self, value: u8, sr: &mut StatusRegister) -> u8 {
        match self {
            Self::Tas => {
                sr.negative = value & 0x80 != 0;
                sr.zero = value == 0;
                sr.overflow = false;
                sr.carry = false;
                value | 0x80
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum Phase {
    AddrSetup,
    Strobe,
    WaitDtack,
    Teardown,
}

impl Phase {
    fn advance(self) -> Self {
        match self {
            Self::AddrSetup => Self::Strobe,
            Self::Strobe => Self::WaitDtack,
            Self::WaitDtack | Self::Teardown => Self::Teardown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum CycleState {
    Idle,
    Read(Phase),
    Write(Phase),
    RmwRead(Phase),
    RmwIdle,
    RmwModify,
    RmwWrite(Phase),
    IntAck(Phase),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct BusManager {
    state: CycleState,
    address: u32,
    byte_op: bool,
    data_to_write: u16,
    space: AddrSpace,
    ipl: u8,
    modify: Option<ModifyOp>,
    transfer_started: bool,
    latched: u16,
    vector: Option<u8>,
}

impl BusManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CycleState::Idle,
            address: 0,
            byte_op: false,
            data_to_write: 0,
            space: AddrSpace::Data,
            ipl: 0,
            modify: None,
            transfer_started: false,
            latched: 0,
            vector: None,
        }
    }

    pub fn reset(&mut self, bus: &mut CpuBus) {
        self.state = CycleState::Idle;
        self.modify = None;
        self.transfer_started = false;
        self.vector = None;
        clear_bus(bus);
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == CycleState::Idle
    }

    fn check_idle(&self) -> CpuResult<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(CpuError::Internal("bus manager cannot perform an operation while busy"))
        }
    }

    pub fn latched_byte(&self) -> CpuResult<u8> {
        self.check_idle()?;
        if !self.byte_op {
            return Err(CpuError::Internal("no byte is latched"));
        }
        Ok(self.latched as u8)
    }

    pub fn latched_word(&self) -> CpuResult<u16> {
        self.check_idle()?;
        if self.byte_op {
            return Err(CpuError::Internal("no word is latched"));
        }
        Ok(self.latched)
    }

    pub fn vector_number(&self) -> CpuResult<u8> {
        self.check_idle()?;
        self.vector.ok_or(CpuError::Internal("no interrupt vector is latched"))
    }

    /* bus arbitration */

    #[must_use]
    pub fn bus_granted(&self, bus: &CpuBus) -> bool {
        bus.is_set(BusLine::Bg)
    }

    pub fn request_bus(&mut self, bus: &mut CpuBus) -> CpuResult<()> {
        if bus.is_set(BusLine::Br) || bus.is_set(BusLine::Bg) {
            return Err(CpuError::Internal("bus already requested or granted"));
        }
        bus.set(BusLine::Br);
        Ok(())
    }

    pub fn release_bus(&mut self, bus: &mut CpuBus) -> CpuResult<()> {
        self.check_idle()?;
        if !bus.is_set(BusLine::Br) || !bus.is_set(BusLine::Bg) {
            return Err(CpuError::Internal("releasing a bus that was not granted"));
        }
        bus.clear(BusLine::Br);
        Ok(())
    }

    fn arbitrate(&self, bus: &mut CpuBus) {
        if bus.is_set(BusLine::Br) && !bus.is_set(BusLine::Bg) {
            bus.set(BusLine::Bg);
        } else if bus.is_set(BusLine::Bg) && !bus.is_set(BusLine::Br) {
            bus.clear(BusLine::Bg);
        }
    }

    /* cycle initiation */

    pub fn init_read_byte(&mut self, address: u32, space: AddrSpace) -> CpuResult<()> {
        self.init_read(address, space, true)
    }

    pub fn init_read_word(&mut self, address: u32, space: AddrSpace) -> CpuResult<()> {
        self.init_read(address, space, false)
    }

    fn init_read(&mut self, address: u32, space: AddrSpace, byte_op: bool) -> CpuResult<()> {
        self.check_idle()?;
        self.address = address;
        self.space = space;
        self.byte_op = byte_op;
        self.transfer_started = false;
        self.state = CycleState::Read(Phase::AddrSetup);
        Ok(())
    }

    pub fn init_write_byte(&mut self, address: u32, value: u8) -> CpuResult<()> {
        self.init_write(address, value.into(), true)
    }

    pub fn init_write_word(&mut self, address: u32, value: u16) -> CpuResult<()> {
        self.init_write(address, value, false)
    }

    fn init_write(&mut self, address: u32, value: u16, byte_op: bool) -> CpuResult<()> {
        self.check_idle()?;
        self.address = address;
        self.space = AddrSpace::Data;
        self.byte_op = byte_op;
        self.data_to_write = value;
        self.transfer_started = false;
        self.state = CycleState::Write(Phase::AddrSetup);
        Ok(())
    }

    /// Byte-sized read, internal modify, write back, all under a single
    /// address strobe.
    pub fn init_read_modify_write(&mut self, address: u32, modify: ModifyOp) -> CpuResult<()> {
        self.check_idle()?;
        self.address = address;
        self.space = AddrSpace::Data;
        self.byte_op = true;
        self.modify = Some(modify);
        self.transfer_started = false;
        self.state = CycleState::RmwRead(Phase::AddrSetup);
        Ok(())
    }

    pub fn init_interrupt_ack(&mut self, ipl: u8) -> CpuResult<()> {
        self.check_idle()?;
        self.ipl = ipl & 0x7;
        self.space = AddrSpace::Cpu;
        self.byte_op = false;
        self.transfer_started = false;
        self.vector = None;
        self.state = CycleState::IntAck(Phase::AddrSetup);
        Ok(())
    }

    /// Advance the current bus cycle by one phase. Returns `true` on the tick
    /// the cycle completes so the caller can route the completion.
    pub fn cycle<M: MemoryInterface, D: InterruptingDevice>(
        &mut self,
        bus: &mut CpuBus,
        regs: &mut Registers,
        exman: &mut ExceptionManager,
        memory: &mut M,
        device: &mut D,
    ) -> CpuResult<bool> {
        match self.state {
            CycleState::Idle => {
                self.arbitrate(bus);
                Ok(false)
            }

            CycleState::Read(phase) | CycleState::RmwRead(phase) => {
                let rmw = matches!(self.state, CycleState::RmwRead(_));
                match phase {
                    Phase::AddrSetup => {
                        if self.check_faults(bus, regs, exman, true)? {
                            return Ok(false);
                        }
                        bus.set_func_codes(self.space.func_codes(regs.sr.supervisor));
                        bus.set(BusLine::Rw);
                        bus.set_address(self.address);
                        self.advance();
                    }
                    Phase::Strobe => {
                        bus.set(BusLine::As);
                        self.set_data_strobes(bus);
                        self.advance();
                    }
                    Phase::WaitDtack => {
                        if !self.transfer_started {
                            if self.byte_op {
                                memory.init_read_byte(bus.address());
                            } else {
                                memory.init_read_word(bus.address());
                            }
                            self.transfer_started = true;
                        }
                        if memory.is_idle() {
                            self.latched = if self.byte_op {
                                memory.latched_byte().into()
                            } else {
                                memory.latched_word()
                            };
                            self.drive_data_bus(bus, self.latched);
                            bus.set(BusLine::Dtack);
                            self.advance();
                        }
                    }
                    Phase::Teardown => {
                        clear_bus(bus);
                        if rmw {
                            // AS stays asserted through the whole RMW cycle
                            bus.set(BusLine::As);
                            self.state = CycleState::RmwIdle;
                        } else {
                            return Ok(self.complete(bus));
                        }
                    }
                }
                Ok(false)
            }

            CycleState::RmwIdle => {
                self.state = CycleState::RmwModify;
                Ok(false)
            }

            CycleState::RmwModify => {
                let modify =
                    self.modify.take().ok_or(CpuError::Internal("rmw cycle without a modify op"))?;
                self.data_to_write = modify.apply(self.latched as u8, &mut regs.sr).into();
                self.transfer_started = false;
                self.state = CycleState::RmwWrite(Phase::AddrSetup);
                Ok(false)
            }

            CycleState::Write(phase) | CycleState::RmwWrite(phase) => {
                match phase {
                    Phase::AddrSetup => {
                        if self.check_faults(bus, regs, exman, false)? {
                            return Ok(false);
                        }
                        bus.set_func_codes(self.space.func_codes(regs.sr.supervisor));
                        bus.set(BusLine::Rw);
                        bus.set_address(self.address);
                        self.advance();
                    }
                    Phase::Strobe => {
                        bus.set(BusLine::As);
                        bus.clear(BusLine::Rw);
                        self.drive_data_bus(bus, self.data_to_write);
                        self.advance();
                    }
                    Phase::WaitDtack => {
                        if !self.transfer_started {
                            self.set_data_strobes(bus);
                            if self.byte_op {
                                memory.init_write_byte(bus.address(), self.data_to_write as u8);
                            } else {
                                memory.init_write_word(bus.address(), self.data_to_write);
                            }
                            self.transfer_started = true;
                        }
                        if memory.is_idle() {
                            bus.set(BusLine::Dtack);
                            self.advance();
                        }
                    }
                    Phase::Teardown => {
                        clear_bus(bus);
                        bus.set(BusLine::Rw);
                        return Ok(self.complete(bus));
                    }
                }
                Ok(false)
            }

            CycleState::IntAck(phase) => {
                match phase {
                    Phase::AddrSetup => {
                        bus.set_func_codes(self.space.func_codes(regs.sr.supervisor));
                        bus.set_address(0xFFFF_FFF8 | u32::from(self.ipl));
                        self.advance();
                    }
                    Phase::Strobe => {
                        bus.set(BusLine::As);
                        bus.set(BusLine::Uds);
                        bus.set(BusLine::Lds);
                        self.advance();
                    }
                    Phase::WaitDtack => {
                        if !self.transfer_started {
                            device.init_interrupt_ack(self.ipl);
                            self.transfer_started = true;
                        }
                        if device.is_idle() {
                            let vector = match device.interrupt_type() {
                                InterruptType::Vectored => {
                                    bus.set(BusLine::Dtack);
                                    let vector = device.vector_number();
                                    bus.set_data(vector.into());
                                    vector
                                }
                                InterruptType::Autovectored => {
                                    bus.set(BusLine::Vpa);
                                    AUTOVECTOR_BASE + self.ipl.saturating_sub(1)
                                }
                                InterruptType::Spurious => {
                                    bus.set(BusLine::Berr);
                                    SPURIOUS_INTERRUPT_VECTOR
                                }
                            };
                            self.vector = Some(vector);
                            self.advance();
                        }
                    }
                    Phase::Teardown => {
                        clear_bus(bus);
                        return Ok(self.complete(bus));
                    }
                }
                Ok(false)
            }
        }
    }

    fn advance(&mut self) {
        self.state = match self.state {
            CycleState::Read(phase) => CycleState::Read(phase.advance()),
            CycleState::Write(phase) => CycleState::Write(phase.advance()),
            CycleState::RmwRead(phase) => CycleState::RmwRead(phase.advance()),
            CycleState::RmwWrite(phase) => CycleState::RmwWrite(phase.advance()),
            CycleState::IntAck(phase) => CycleState::IntAck(phase.advance()),
            state => state,
        };
    }

    fn complete(&mut self, bus: &mut CpuBus) -> bool {
        self.state = CycleState::Idle;
        self.arbitrate(bus);
        true
    }

    /* bus helpers */

    fn address_even(&self) -> bool {
        self.address % 2 == 0
    }

    fn set_data_strobes(&self, bus: &mut CpuBus) {
        if self.byte_op {
            bus.set(if self.address_even() { BusLine::Uds } else { BusLine::Lds });
        } else {
            bus.set(BusLine::Uds);
            bus.set(BusLine::Lds);
        }
    }

    fn drive_data_bus(&self, bus: &mut CpuBus, data: u16) {
        let data = if self.byte_op {
            if self.address_even() {
                (data << 8) | (bus.data() & 0x00FF)
            } else {
                (bus.data() & 0xFF00) | (data & 0x00FF)
            }
        } else {
            data
        };
        bus.set_data(data);
    }

    /* fault checks, performed before the strobes of every new cycle */

    fn check_faults(
        &mut self,
        bus: &mut CpuBus,
        regs: &Registers,
        exman: &mut ExceptionManager,
        read: bool,
    ) -> CpuResult<bool> {
        let bus_error = bus.is_set(BusLine::Berr) && !bus.is_set(BusLine::Halt);
        let address_error = !self.byte_op && !self.address_even();

        if !bus_error && !address_error {
            return Ok(false);
        }

        if self.bus_granted(bus) {
            // The CPU needs mastership to build the exception frame; a fault
            // raised while an external master holds the bus is unrecoverable.
            return Err(CpuError::Internal("access fault while the bus is granted away"));
        }

        let fault = AccessFault {
            address: self.address,
            func_codes: self.space.func_codes(regs.sr.supervisor),
            read,
            instruction: !bus_error && self.space == AddrSpace::Program,
            pc: regs.pc,
        };

        if bus_error {
            log::debug!("bus error on {:06X} (read={read})", self.address);
            exman.rise_bus_error(fault);
        } else {
            log::debug!("address error on {:06X} (read={read})", self.address);
            exman.rise_address_error(fault);
        }

        self.reset(bus);
        Ok(true)
    }
}

impl Default for BusManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop every line the bus manager drives during a cycle. BR/BG carry the
/// arbitration state and IPL carries a possibly pending interrupt, so those
/// survive.
fn clear_bus(bus: &mut CpuBus) {
    bus.clear(BusLine::As);
    bus.clear(BusLine::Uds);
    bus.clear(BusLine::Lds);
    bus.clear(BusLine::Dtack);
    bus.clear(BusLine::Berr);
    bus.clear(BusLine::Vpa);
    bus.set_func_codes(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LinearMemory;
    use crate::traits::AutovectoredDevice;

    struct Harness {
        busm: BusManager,
        bus: CpuBus,
        regs: Registers,
        exman: ExceptionManager,
        memory: LinearMemory,
        device: AutovectoredDevice,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                busm: BusManager::new(),
                bus: CpuBus::new(),
                regs: Registers::new(),
                exman: ExceptionManager::new(),
                memory: LinearMemory::new(0x1_0000),
                device: AutovectoredDevice::new(),
            }
        }

        fn tick(&mut self) -> bool {
            self.busm
                .cycle(
                    &mut self.bus,
                    &mut self.regs,
                    &mut self.exman,
                    &mut self.memory,
                    &mut self.device,
                )
                .unwrap()
        }

        fn run_to_completion(&mut self) -> u32 {
            for ticks in 1..=32 {
                if self.tick() {
                    return ticks;
                }
            }
            panic!("bus cycle never completed");
        }
    }

    #[test]
    fn word_read_takes_four_ticks() {
        let mut h = Harness::new();
        h.memory.write_word(0x1000, 0xCAFE);
        h.busm.init_read_word(0x1000, AddrSpace::Data).unwrap();

        assert_eq!(h.run_to_completion(), 4);
        assert!(h.busm.is_idle());
        assert_eq!(h.busm.latched_word().unwrap(), 0xCAFE);
    }

    #[test]
    fn byte_write_lands_in_memory() {
        let mut h = Harness::new();
        h.busm.init_write_byte(0x2001, 0xAB).unwrap();
        assert_eq!(h.run_to_completion(), 4);
        assert_eq!(h.memory.read_byte(0x2001), 0xAB);
    }

    #[test]
    fn strobes_follow_byte_lane() {
        let mut h = Harness::new();
        h.busm.init_read_byte(0x1001, AddrSpace::Data).unwrap();
        h.tick();
        h.tick();
        assert!(h.bus.is_set(BusLine::Lds));
        assert!(!h.bus.is_set(BusLine::Uds));
    }

    #[test]
    fn starting_while_busy_is_an_internal_error() {
        let mut h = Harness::new();
        h.busm.init_read_word(0x1000, AddrSpace::Data).unwrap();
        assert!(h.busm.init_read_word(0x1002, AddrSpace::Data).is_err());
        assert!(h.busm.latched_word().is_err());
    }

    #[test]
    fn odd_word_access_raises_address_error_without_memory_traffic() {
        let mut h = Harness::new();
        h.regs.pc = 0x0400;
        h.busm.init_write_word(0x1001, 0xBEEF).unwrap();
        h.tick();

        assert!(h.busm.is_idle());
        assert!(h.exman.is_raised(crate::exception::ExceptionType::AddressError));
        let fault = h.exman.accept_address_error();
        assert_eq!(fault.address, 0x1001);
        assert!(!fault.read);
        assert_eq!(fault.pc, 0x0400);
        // nothing was written
        assert_eq!(h.memory.read_word(0x1000), 0);
    }

    #[test]
    fn berr_raises_bus_error() {
        let mut h = Harness::new();
        h.bus.set(BusLine::Berr);
        h.busm.init_read_word(0x1000, AddrSpace::Program).unwrap();
        h.tick();

        assert!(h.busm.is_idle());
        assert!(h.exman.is_raised(crate::exception::ExceptionType::BusError));
    }

    #[test]
    fn rmw_runs_uninterrupted_and_applies_tas() {
        let mut h = Harness::new();
        h.memory.write_byte(0x3000, 0x41);
        h.busm.init_read_modify_write(0x3000, ModifyOp::Tas).unwrap();

        let ticks = h.run_to_completion();
        assert_eq!(ticks, 10);
        assert_eq!(h.memory.read_byte(0x3000), 0xC1);
        assert!(!h.regs.sr.zero);
        assert!(!h.regs.sr.negative);
    }

    #[test]
    fn interrupt_ack_latches_autovector() {
        let mut h = Harness::new();
        h.busm.init_interrupt_ack(4).unwrap();
        h.run_to_completion();
        assert_eq!(h.busm.vector_number().unwrap(), AUTOVECTOR_BASE + 3);
    }

    #[test]
    fn bus_grant_handshake() {
        let mut h = Harness::new();
        h.busm.request_bus(&mut h.bus).unwrap();
        assert!(h.busm.request_bus(&mut h.bus).is_err());

        h.tick();
        assert!(h.busm.bus_granted(&h.bus));

        h.busm.release_bus(&mut h.bus).unwrap();
        h.tick();
        assert!(!h.busm.bus_granted(&h.bus));
    }
}
