//! CPU top level: owns every component and advances the whole model by one
//! master-bus cycle per `cycle()` call. Tick order is fixed: interrupt
//! riser, then exactly one of the exception or instruction units, then the
//! scheduler, then the bus manager, then the boundary bookkeeping.

use crate::bus::{AddrSpace, CpuBus};
use crate::bus_manager::BusManager;
use crate::ea::EaDecoder;
use crate::error::{CpuError, CpuResult};
use crate::exception::{ExceptionManager, ExceptionType};
use crate::exception_unit::ExceptionUnit;
use crate::instructions::{ExecCtx, InstructionUnit};
use crate::registers::Registers;
use crate::scheduler::BusScheduler;
use crate::traits::{InterruptingDevice, MemoryInterface};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Encode, Decode)]
pub struct M68000 {
    regs: Registers,
    bus: CpuBus,
    busm: BusManager,
    scheduler: BusScheduler,
    ea: EaDecoder,
    exman: ExceptionManager,
    inst: InstructionUnit,
    excp: ExceptionUnit,
    /// Previous IPL input, for the level-7 edge detector.
    last_ipl: u8,
    /// An access fault escaped while its own exception frame was being
    /// built; the processor stops dead until reset.
    halted: bool,
    in_fault_entry: bool,
}

impl M68000 {
    /// A freshly constructed CPU already has the reset exception pending;
    /// the first ticks fetch SSP and PC from the vector table.
    #[must_use]
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::new(),
            bus: CpuBus::new(),
            busm: BusManager::new(),
            scheduler: BusScheduler::new(),
            ea: EaDecoder::new(),
            exman: ExceptionManager::new(),
            inst: InstructionUnit::new(),
            excp: ExceptionUnit::new(),
            last_ipl: 0,
            halted: false,
            in_fault_entry: false,
        };
        cpu.reset();
        cpu
    }

    pub fn reset(&mut self) {
        self.halted = false;
        self.in_fault_entry = false;
        self.exman.rise(ExceptionType::Reset);
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.busm.is_idle()
            && self.scheduler.is_idle()
            && self.inst.is_idle()
            && !self.excp.is_active()
            && !self.exman.any_raised()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True while the processor is parked by a STOP instruction.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inst.is_stopped()
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    #[must_use]
    pub fn bus(&self) -> &CpuBus {
        &self.bus
    }

    /// Drive the IPL input lines.
    pub fn set_interrupt(&mut self, priority: u8) -> CpuResult<()> {
        if priority > 7 {
            return Err(CpuError::Internal("interrupt priority above 7"));
        }
        self.bus.set_interrupt_priority(priority);
        Ok(())
    }

    /// Advance the model by one master-bus cycle.
    pub fn cycle<M: MemoryInterface, D: InterruptingDevice>(
        &mut self,
        memory: &mut M,
        device: &mut D,
    ) -> CpuResult<()> {
        if self.halted {
            return Ok(());
        }

        self.interrupt_riser();

        let at_boundary =
            (self.inst.is_idle() || self.inst.is_stopped()) && self.scheduler.is_idle();
        let exception_cycle =
            self.excp.is_active() || ExceptionUnit::has_work(&self.exman, at_boundary);

        if exception_cycle {
            if !self.excp.is_active() {
                if self.in_fault_entry
                    && (self.exman.is_raised(ExceptionType::AddressError)
                        || self.exman.is_raised(ExceptionType::BusError))
                {
                    // fault while stacking a fault frame: dead processor
                    log::error!("double access fault; halting");
                    self.halted = true;
                    return Ok(());
                }

                // abort hook: flush whatever the instruction unit had going
                self.inst.reset();
                self.scheduler.reset();
                self.ea.reset();

                self.excp.accept(&mut self.exman)?;
                self.in_fault_entry = matches!(
                    self.excp.current(),
                    ExceptionType::AddressError | ExceptionType::BusError
                );
            }

            let mut ctx = ExecCtx {
                regs: &mut self.regs,
                scheduler: &mut self.scheduler,
                ea: &mut self.ea,
                exman: &mut self.exman,
            };
            self.excp.cycle(&mut ctx)?;
        } else {
            let mut ctx = ExecCtx {
                regs: &mut self.regs,
                scheduler: &mut self.scheduler,
                ea: &mut self.ea,
                exman: &mut self.exman,
            };
            self.inst.cycle(&mut ctx)?;
        }

        self.scheduler.cycle(&mut self.regs, &mut self.busm, &self.bus)?;

        let completed = self.busm.cycle(
            &mut self.bus,
            &mut self.regs,
            &mut self.exman,
            memory,
            device,
        )?;
        if completed {
            self.scheduler.on_bus_complete(&mut self.regs, &self.busm, &mut self.ea)?;
        }

        self.post_cycle();
        Ok(())
    }

    fn post_cycle(&mut self) {
        let drained = self.scheduler.is_idle() && self.busm.is_idle();

        if self.in_fault_entry && !self.excp.is_active() && drained {
            self.in_fault_entry = false;
        }

        if self.inst.trace_pending()
            && drained
            && (self.inst.is_idle() || self.inst.is_stopped())
            && !self.excp.is_active()
        {
            self.inst.clear_trace_pending();
            self.exman.rise(ExceptionType::Trace);
        }
    }

    /// Raise an interrupt exception when the IPL input exceeds the mask;
    /// level 7 is edge triggered and pierces the mask.
    fn interrupt_riser(&mut self) {
        let ipl = self.bus.interrupt_priority();
        let pending = if ipl == 7 {
            self.last_ipl != 7
        } else {
            ipl > self.regs.sr.interrupt_mask
        };
        if pending && !self.exman.is_raised(ExceptionType::Interrupt) {
            self.exman.rise_interrupt(ipl);
        }
        self.last_ipl = ipl;
    }

    /* external bus mastership; usable once the bus has been granted */

    pub fn request_bus(&mut self) -> CpuResult<()> {
        self.busm.request_bus(&mut self.bus)
    }

    pub fn release_bus(&mut self) -> CpuResult<()> {
        self.busm.release_bus(&mut self.bus)
    }

    #[must_use]
    pub fn bus_granted(&self) -> bool {
        self.busm.bus_granted(&self.bus)
    }

    #[must_use]
    pub fn bus_is_idle(&self) -> bool {
        self.busm.is_idle()
    }

    pub fn init_read_byte(&mut self, address: u32, space: AddrSpace) -> CpuResult<()> {
        self.busm.init_read_byte(address, space)
    }

    pub fn init_read_word(&mut self, address: u32, space: AddrSpace) -> CpuResult<()> {
        self.busm.init_read_word(address, space)
    }

    pub fn init_write_byte(&mut self, address: u32, value: u8) -> CpuResult<()> {
        self.busm.init_write_byte(address, value)
    }

    pub fn init_write_word(&mut self, address: u32, value: u16) -> CpuResult<()> {
        self.busm.init_write_word(address, value)
    }

    pub fn latched_byte(&self) -> CpuResult<u8> {
        self.busm.latched_byte()
    }

    pub fn latched_word(&self) -> CpuResult<u16> {
        self.busm.latched_word()
    }
}

impl Default for M68000 {
    fn default() -> Self {
        Self::new()
    }
}
