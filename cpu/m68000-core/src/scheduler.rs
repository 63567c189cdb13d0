//! Cooperative micro-op queue between the instruction/exception units and the
//! bus manager. Units enqueue typed operations synchronously; the queue
//! drains one bus cycle at a time, with cycle-free register side effects
//! applied between bus operations.
//!
//! Completion intents are carried as [`OnComplete`] tags instead of stored
//! closures; the tag is interpreted when the bus manager reports the cycle
//! finished.

use crate::bus::{AddrSpace, CpuBus};
use crate::bus_manager::{BusManager, ModifyOp};
use crate::ea::EaDecoder;
use crate::error::{CpuError, CpuResult};
use crate::num::U32Ext;
use crate::prefetch::PrefetchKind;
use crate::registers::Registers;
use crate::size::OpSize;
use bincode::{Decode, Encode};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ReadImmFlag {
    /// Consume IRC and pipeline a replacement, advancing PC.
    DoPrefetch,
    /// Leave the pipeline alone; only a long operand costs a bus cycle.
    NoPrefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum WriteOrder {
    LswFirst,
    MswFirst,
}

/// What to do with the accumulator when a scheduled bus operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum OnComplete {
    None,
    LoadPc,
    LoadSsp,
    SetSr,
    SetCcr,
    LoadAddrReg { reg: u8 },
    /// MOVEM load; `index` 0-7 names D0-D7, 8-15 names A0-A7. Word loads
    /// sign extend into the full register.
    MovemReg { index: u8, size: OpSize },
    /// MOVEP byte gather into the staging buffer at the given shift.
    GatherByte { shift: u8 },
    EaAddress,
    EaOperand,
    EaImmediate,
}

/// Cycle-free register side effect, applied in queue order between bus
/// operations. Values are computed when the instruction handler schedules
/// the op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum CallOp {
    SetPc(u32),
    WriteAddrLong { reg: u8, value: u32 },
}

impl CallOp {
    fn apply(self, regs: &mut Registers) {
        match self {
            Self::SetPc(value) => regs.pc = value,
            Self::WriteAddrLong { reg, value } => regs.set_a(reg, value, OpSize::LongWord),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum Operation {
    Read { addr: u32, size: OpSize, space: AddrSpace, tag: OnComplete },
    ReadImm { size: OpSize, flag: ReadImmFlag, tag: OnComplete },
    Write { addr: u32, data: u16, byte_op: bool },
    Rmw { addr: u32, modify: ModifyOp },
    IntAck { ipl: u8 },
    Prefetch(PrefetchKind),
    Wait { cycles: u8 },
    Call(CallOp),
    IncAddrReg { reg: u8, size: OpSize },
    DecAddrReg { reg: u8, size: OpSize },
    Push { data: u16, offset: i32 },
}

impl Operation {
    fn is_bus_op(self) -> bool {
        !matches!(
            self,
            Self::Wait { .. } | Self::Call(_) | Self::IncAddrReg { .. } | Self::DecAddrReg { .. }
        )
    }

    fn is_cycle_free(self) -> bool {
        matches!(self, Self::Call(_) | Self::IncAddrReg { .. } | Self::DecAddrReg { .. })
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct BusScheduler {
    queue: VecDeque<Operation>,
    current: Option<Operation>,
    wait_cycles: u8,
    data: u32,
    gathered: u32,
    int_vector: Option<u8>,
}

impl BusScheduler {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            wait_cycles: 0,
            data: 0,
            gathered: 0,
            int_vector: None,
        }
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.current = None;
        self.wait_cycles = 0;
        self.int_vector = None;
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }

    /// Latched result of the most recent read-like operation. For long
    /// operands the high word arrives first.
    pub fn data(&self) -> u32 {
        self.data
    }

    /// MOVEP staging buffer filled by `GatherByte` tags.
    pub fn gathered(&self) -> u32 {
        self.gathered
    }

    pub fn clear_gathered(&mut self) {
        self.gathered = 0;
    }

    pub fn take_int_vector(&mut self) -> Option<u8> {
        self.int_vector.take()
    }

    /* enqueue interface */

    pub fn read(&mut self, addr: u32, size: OpSize, space: AddrSpace, tag: OnComplete) {
        match size {
            OpSize::Byte | OpSize::Word => {
                self.queue.push_back(Operation::Read { addr, size, space, tag });
            }
            OpSize::LongWord => {
                // two word cycles; the tag fires once the low word is in
                self.queue.push_back(Operation::Read {
                    addr,
                    size,
                    space,
                    tag: OnComplete::None,
                });
                self.queue.push_back(Operation::Read {
                    addr: addr.wrapping_add(2),
                    size,
                    space,
                    tag,
                });
            }
        }
    }

    /// Read the immediate operand stream following the current opcode. A
    /// byte/word immediate with `NoPrefetch` costs nothing and is returned
    /// directly; every other combination is queued and `None` comes back.
    pub fn read_imm(
        &mut self,
        regs: &Registers,
        size: OpSize,
        flag: ReadImmFlag,
        tag: OnComplete,
    ) -> Option<u32> {
        match (size, flag) {
            (OpSize::Byte, ReadImmFlag::NoPrefetch) => Some((regs.irc & 0xFF).into()),
            (OpSize::Word, ReadImmFlag::NoPrefetch) => Some(regs.irc.into()),
            (OpSize::Byte | OpSize::Word, ReadImmFlag::DoPrefetch) => {
                self.queue.push_back(Operation::ReadImm { size, flag, tag });
                None
            }
            (OpSize::LongWord, ReadImmFlag::DoPrefetch) => {
                self.queue.push_back(Operation::ReadImm { size, flag, tag: OnComplete::None });
                self.queue.push_back(Operation::ReadImm { size, flag, tag });
                None
            }
            (OpSize::LongWord, ReadImmFlag::NoPrefetch) => {
                self.queue.push_back(Operation::ReadImm { size, flag, tag });
                None
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32, size: OpSize, order: WriteOrder) {
        match size {
            OpSize::Byte => {
                self.queue.push_back(Operation::Write { addr, data: data as u16, byte_op: true });
            }
            OpSize::Word => {
                self.queue.push_back(Operation::Write { addr, data: data as u16, byte_op: false });
            }
            OpSize::LongWord => {
                let lsw = Operation::Write {
                    addr: addr.wrapping_add(2),
                    data: data.lsw(),
                    byte_op: false,
                };
                let msw = Operation::Write { addr, data: data.msw(), byte_op: false };
                match order {
                    WriteOrder::LswFirst => {
                        self.queue.push_back(lsw);
                        self.queue.push_back(msw);
                    }
                    WriteOrder::MswFirst => {
                        self.queue.push_back(msw);
                        self.queue.push_back(lsw);
                    }
                }
            }
        }
    }

    pub fn rmw(&mut self, addr: u32, modify: ModifyOp) {
        self.queue.push_back(Operation::Rmw { addr, modify });
    }

    pub fn int_ack(&mut self, ipl: u8) {
        self.queue.push_back(Operation::IntAck { ipl });
    }

    pub fn prefetch_ird(&mut self) {
        self.queue.push_back(Operation::Prefetch(PrefetchKind::Ird));
    }

    pub fn prefetch_irc(&mut self) {
        self.queue.push_back(Operation::Prefetch(PrefetchKind::Irc));
    }

    pub fn prefetch_one(&mut self) {
        self.queue.push_back(Operation::Prefetch(PrefetchKind::One));
    }

    pub fn prefetch_two(&mut self) {
        self.prefetch_ird();
        self.prefetch_irc();
    }

    pub fn wait(&mut self, cycles: u8) {
        if cycles > 0 {
            self.queue.push_back(Operation::Wait { cycles });
        }
    }

    pub fn call(&mut self, op: CallOp) {
        self.queue.push_back(Operation::Call(op));
    }

    pub fn inc_addr_reg(&mut self, reg: u8, size: OpSize) {
        self.queue.push_back(Operation::IncAddrReg { reg, size });
    }

    pub fn dec_addr_reg(&mut self, reg: u8, size: OpSize) {
        self.queue.push_back(Operation::DecAddrReg { reg, size });
    }

    /// Decrement A7 and write at `A7 + offset`; the offset allows the
    /// out-of-order double-word pushes exception frames need.
    pub fn push(&mut self, data: u32, size: OpSize, order: WriteOrder) {
        match size {
            OpSize::Byte | OpSize::Word => {
                self.queue.push_back(Operation::Push { data: data as u16, offset: 0 });
            }
            OpSize::LongWord => match order {
                WriteOrder::LswFirst => {
                    self.queue.push_back(Operation::Push { data: data.lsw(), offset: 0 });
                    self.queue.push_back(Operation::Push { data: data.msw(), offset: 0 });
                }
                WriteOrder::MswFirst => {
                    self.queue.push_back(Operation::Push { data: data.msw(), offset: -2 });
                    self.queue.push_back(Operation::Push { data: data.lsw(), offset: 2 });
                }
            },
        }
    }

    /* execution */

    pub fn cycle(
        &mut self,
        regs: &mut Registers,
        busm: &mut BusManager,
        bus: &CpuBus,
    ) -> CpuResult<()> {
        if self.current.is_some() {
            if self.wait_cycles > 0 {
                self.wait_cycles -= 1;
                if self.wait_cycles == 0 {
                    self.current = None;
                    self.run_cycle_free(regs);
                }
            }
            return Ok(());
        }

        self.run_cycle_free(regs);

        let Some(&front) = self.queue.front() else { return Ok(()) };

        // the CPU is the lowest-priority bus master; hold off while an
        // external party owns the bus or a foreign cycle is still running
        if front.is_bus_op() && (busm.bus_granted(bus) || !busm.is_idle()) {
            return Ok(());
        }

        let op = self.queue.pop_front().expect("queue front was just observed");
        self.start_operation(op, regs, busm)
    }

    fn start_operation(
        &mut self,
        op: Operation,
        regs: &mut Registers,
        busm: &mut BusManager,
    ) -> CpuResult<()> {
        match op {
            Operation::Read { addr, size, space, .. } => {
                if size == OpSize::Byte {
                    busm.init_read_byte(addr, space)?;
                } else {
                    busm.init_read_word(addr, space)?;
                }
            }

            Operation::ReadImm { size, flag, .. } => {
                match size {
                    OpSize::Byte => self.data = (regs.irc & 0xFF).into(),
                    OpSize::Word => self.data = regs.irc.into(),
                    OpSize::LongWord => self.data = (self.data << 16) | u32::from(regs.irc),
                }
                match flag {
                    ReadImmFlag::DoPrefetch => {
                        regs.pc = regs.pc.wrapping_add(2);
                        busm.init_read_word(regs.pc.wrapping_add(2), AddrSpace::Program)?;
                    }
                    ReadImmFlag::NoPrefetch => {
                        // long operand only; the low word still has to come in
                        busm.init_read_word(regs.pc.wrapping_add(4), AddrSpace::Program)?;
                    }
                }
            }

            Operation::Write { addr, data, byte_op } => {
                if byte_op {
                    busm.init_write_byte(addr, data as u8)?;
                } else {
                    busm.init_write_word(addr, data)?;
                }
            }

            Operation::Rmw { addr, modify } => busm.init_read_modify_write(addr, modify)?,

            Operation::IntAck { ipl } => busm.init_interrupt_ack(ipl)?,

            Operation::Prefetch(kind) => {
                let addr = kind.start(regs);
                busm.init_read_word(addr, AddrSpace::Program)?;
            }

            Operation::Push { data, offset } => {
                regs.dec_addr(7, OpSize::Word);
                busm.init_write_word(regs.sp().wrapping_add_signed(offset), data)?;
            }

            Operation::Wait { cycles } => {
                self.wait_cycles = cycles - 1;
                if self.wait_cycles == 0 {
                    self.run_cycle_free(regs);
                    return Ok(());
                }
            }

            Operation::Call(_) | Operation::IncAddrReg { .. } | Operation::DecAddrReg { .. } => {
                return Err(CpuError::Internal("cycle-free operation reached the bus path"));
            }
        }

        self.current = Some(op);
        Ok(())
    }

    fn run_cycle_free(&mut self, regs: &mut Registers) {
        while let Some(&front) = self.queue.front() {
            if !front.is_cycle_free() {
                return;
            }
            match front {
                Operation::Call(call) => call.apply(regs),
                Operation::IncAddrReg { reg, size } => regs.inc_addr(reg, size),
                Operation::DecAddrReg { reg, size } => regs.dec_addr(reg, size),
                _ => unreachable!("front was checked to be cycle-free"),
            }
            self.queue.pop_front();
        }
    }

    /// Routed by the CPU top on the tick the bus manager finishes a cycle.
    /// Completions of externally initiated cycles (test harness bus
    /// mastership) have no current op and are ignored.
    pub fn on_bus_complete(
        &mut self,
        regs: &mut Registers,
        busm: &BusManager,
        ea: &mut EaDecoder,
    ) -> CpuResult<()> {
        let Some(op) = self.current.take() else { return Ok(()) };

        match op {
            Operation::Read { size, tag, .. } => {
                self.latch(busm, size)?;
                self.dispatch(tag, regs, ea)?;
            }

            Operation::ReadImm { flag, tag, .. } => {
                match flag {
                    ReadImmFlag::DoPrefetch => regs.irc = busm.latched_word()?,
                    ReadImmFlag::NoPrefetch => {
                        self.data = (self.data << 16) | u32::from(busm.latched_word()?);
                    }
                }
                self.dispatch(tag, regs, ea)?;
            }

            Operation::Write { .. } | Operation::Push { .. } | Operation::Rmw { .. } => {}

            Operation::IntAck { .. } => self.int_vector = Some(busm.vector_number()?),

            Operation::Prefetch(kind) => kind.apply(regs, busm.latched_word()?),

            Operation::Wait { .. }
            | Operation::Call(_)
            | Operation::IncAddrReg { .. }
            | Operation::DecAddrReg { .. } => {
                return Err(CpuError::Internal("non-bus operation completed a bus cycle"));
            }
        }

        self.run_cycle_free(regs);
        Ok(())
    }

    fn latch(&mut self, busm: &BusManager, size: OpSize) -> CpuResult<()> {
        self.data = match size {
            OpSize::Byte => busm.latched_byte()?.into(),
            OpSize::Word => busm.latched_word()?.into(),
            OpSize::LongWord => (self.data << 16) | u32::from(busm.latched_word()?),
        };
        Ok(())
    }

    fn dispatch(
        &mut self,
        tag: OnComplete,
        regs: &mut Registers,
        ea: &mut EaDecoder,
    ) -> CpuResult<()> {
        match tag {
            OnComplete::None => {}
            OnComplete::LoadPc => regs.pc = self.data,
            OnComplete::LoadSsp => regs.ssp = self.data,
            OnComplete::SetSr => regs.set_status(self.data as u16),
            OnComplete::SetCcr => regs.sr.set_ccr(self.data as u8),
            OnComplete::LoadAddrReg { reg } => regs.set_a(reg, self.data, OpSize::LongWord),
            OnComplete::MovemReg { index, size } => {
                let value = size.sign_extend(self.data);
                if index < 8 {
                    regs.set_d(index, value, OpSize::LongWord);
                } else {
                    regs.set_a(index - 8, value, OpSize::LongWord);
                }
            }
            OnComplete::GatherByte { shift } => {
                self.gathered =
                    (self.gathered & !(0xFF << shift)) | ((self.data & 0xFF) << shift);
            }
            OnComplete::EaAddress => {
                if let Some(read) = ea.on_address(self.data) {
                    let (addr, size) = read;
                    self.read(addr, size, AddrSpace::Data, OnComplete::EaOperand);
                }
            }
            OnComplete::EaOperand => ea.on_operand_value(self.data),
            OnComplete::EaImmediate => ea.on_immediate(self.data),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionManager;
    use crate::memory::LinearMemory;
    use crate::traits::AutovectoredDevice;

    struct Harness {
        scheduler: BusScheduler,
        busm: BusManager,
        bus: CpuBus,
        regs: Registers,
        ea: EaDecoder,
        exman: ExceptionManager,
        memory: LinearMemory,
        device: AutovectoredDevice,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                scheduler: BusScheduler::new(),
                busm: BusManager::new(),
                bus: CpuBus::new(),
                regs: Registers::new(),
                ea: EaDecoder::new(),
                exman: ExceptionManager::new(),
                memory: LinearMemory::new(0x1_0000),
                device: AutovectoredDevice::new(),
            }
        }

        fn tick(&mut self) {
            self.scheduler.cycle(&mut self.regs, &mut self.busm, &self.bus).unwrap();
            let completed = self
                .busm
                .cycle(
                    &mut self.bus,
                    &mut self.regs,
                    &mut self.exman,
                    &mut self.memory,
                    &mut self.device,
                )
                .unwrap();
            if completed {
                self.scheduler
                    .on_bus_complete(&mut self.regs, &self.busm, &mut self.ea)
                    .unwrap();
            }
        }

        fn run_until_idle(&mut self) -> u32 {
            for ticks in 1..=256 {
                self.tick();
                if self.scheduler.is_idle() && self.busm.is_idle() {
                    return ticks;
                }
            }
            panic!("scheduler never drained");
        }
    }

    #[test]
    fn long_read_assembles_high_word_first() {
        let mut h = Harness::new();
        h.memory.write_long_word(0x4000, 0xDEAD_BEEF);
        h.scheduler.read(0x4000, OpSize::LongWord, AddrSpace::Data, OnComplete::None);

        let ticks = h.run_until_idle();
        assert_eq!(ticks, 8);
        assert_eq!(h.scheduler.data(), 0xDEAD_BEEF);
    }

    #[test]
    fn long_write_order_is_controllable() {
        let mut h = Harness::new();
        h.scheduler.write(0x4000, 0x1122_3344, OpSize::LongWord, WriteOrder::LswFirst);
        h.run_until_idle();
        assert_eq!(h.memory.read_long_word(0x4000), 0x1122_3344);

        h.scheduler.write(0x5000, 0xAABB_CCDD, OpSize::LongWord, WriteOrder::MswFirst);
        h.run_until_idle();
        assert_eq!(h.memory.read_long_word(0x5000), 0xAABB_CCDD);
    }

    #[test]
    fn push_and_pop_round_trip_restores_a7() {
        let mut h = Harness::new();
        h.regs.ssp = 0x8000;
        h.scheduler.push(0xCAFE_F00D, OpSize::LongWord, WriteOrder::MswFirst);
        h.run_until_idle();
        assert_eq!(h.regs.ssp, 0x7FFC);
        assert_eq!(h.memory.read_long_word(0x7FFC), 0xCAFE_F00D);

        h.scheduler.read(h.regs.sp(), OpSize::LongWord, AddrSpace::Data, OnComplete::None);
        h.regs.ssp += 4;
        h.run_until_idle();
        assert_eq!(h.scheduler.data(), 0xCAFE_F00D);
        assert_eq!(h.regs.ssp, 0x8000);
    }

    #[test]
    fn wait_counts_ticks_without_bus_traffic() {
        let mut h = Harness::new();
        h.scheduler.wait(3);
        assert!(!h.scheduler.is_idle());
        assert_eq!(h.run_until_idle(), 3);
    }

    #[test]
    fn cycle_free_ops_drain_in_order() {
        let mut h = Harness::new();
        h.regs.set_a(2, 0x1000, OpSize::LongWord);
        h.scheduler.inc_addr_reg(2, OpSize::Word);
        h.scheduler.call(CallOp::WriteAddrLong { reg: 3, value: 0x55 });
        h.scheduler.dec_addr_reg(2, OpSize::Byte);

        h.tick();
        assert!(h.scheduler.is_idle());
        assert_eq!(h.regs.a(2), 0x1001);
        assert_eq!(h.regs.a(3), 0x55);
    }

    #[test]
    fn bus_ops_stall_while_bus_is_granted() {
        let mut h = Harness::new();
        h.busm.request_bus(&mut h.bus).unwrap();
        h.tick();
        assert!(h.busm.bus_granted(&h.bus));

        h.scheduler.read(0x4000, OpSize::Word, AddrSpace::Data, OnComplete::None);
        for _ in 0..8 {
            h.tick();
        }
        assert!(!h.scheduler.is_idle());
        assert!(h.busm.is_idle());

        h.busm.release_bus(&mut h.bus).unwrap();
        h.run_until_idle();
        assert!(h.scheduler.is_idle());
    }

    #[test]
    fn read_imm_with_prefetch_consumes_irc_and_advances_pc() {
        let mut h = Harness::new();
        h.regs.pc = 0x1000;
        h.regs.irc = 0x1234;
        h.memory.write_word(0x1004, 0x5678);

        h.scheduler.read_imm(&h.regs, OpSize::Word, ReadImmFlag::DoPrefetch, OnComplete::None);
        h.run_until_idle();

        assert_eq!(h.scheduler.data(), 0x1234);
        assert_eq!(h.regs.pc, 0x1002);
        assert_eq!(h.regs.irc, 0x5678);
    }

    #[test]
    fn read_imm_without_prefetch_is_cycle_free_for_words() {
        let mut h = Harness::new();
        h.regs.irc = 0xBEEF;
        let value = h.scheduler.read_imm(
            &h.regs,
            OpSize::Word,
            ReadImmFlag::NoPrefetch,
            OnComplete::None,
        );
        assert_eq!(value, Some(0xBEEF));
        assert!(h.scheduler.is_idle());
    }
}
