//! Shared test bench: a CPU wired to recording memory, booted through the
//! real reset exception.

use m68000_core::{AutovectoredDevice, LinearMemory, M68000, MemoryInterface};

pub const RESET_SSP: u32 = 0x8000;
pub const RESET_PC: u32 = 0x1000;

/// Memory that records every transaction the bus manager starts.
pub struct TraceMemory {
    pub ram: LinearMemory,
    pub reads: Vec<u32>,
    pub writes: Vec<(u32, u16)>,
    /// Extra ticks before DTACK; 0 models zero-wait-state memory.
    pub wait_states: u32,
    busy_for: u32,
}

impl TraceMemory {
    pub fn new() -> Self {
        Self {
            ram: LinearMemory::new(0x1_0000),
            reads: Vec::new(),
            writes: Vec::new(),
            wait_states: 0,
            busy_for: 0,
        }
    }
}

impl MemoryInterface for TraceMemory {
    fn init_read_byte(&mut self, address: u32) {
        self.reads.push(address);
        self.busy_for = self.wait_states;
        self.ram.init_read_byte(address);
    }

    fn init_read_word(&mut self, address: u32) {
        self.reads.push(address);
        self.busy_for = self.wait_states;
        self.ram.init_read_word(address);
    }

    fn init_write_byte(&mut self, address: u32, value: u8) {
        self.writes.push((address, value.into()));
        self.busy_for = self.wait_states;
        self.ram.init_write_byte(address, value);
    }

    fn init_write_word(&mut self, address: u32, value: u16) {
        self.writes.push((address, value));
        self.busy_for = self.wait_states;
        self.ram.init_write_word(address, value);
    }

    fn is_idle(&self) -> bool {
        self.busy_for == 0
    }

    fn latched_byte(&self) -> u8 {
        self.ram.latched_byte()
    }

    fn latched_word(&self) -> u16 {
        self.ram.latched_word()
    }

    fn max_address(&self) -> u32 {
        self.ram.max_address()
    }
}

pub struct TestBench {
    pub cpu: M68000,
    pub memory: TraceMemory,
    pub device: AutovectoredDevice,
}

impl TestBench {
    /// Vector table with SSP/PC reset vectors plus a program image at
    /// [`RESET_PC`], booted through the real reset exception.
    pub fn with_program(program: &[u16]) -> Self {
        let mut memory = TraceMemory::new();
        memory.ram.write_long_word(0x0, RESET_SSP);
        memory.ram.write_long_word(0x4, RESET_PC);
        memory.ram.load_words(RESET_PC, program);

        let mut bench = Self { cpu: M68000::new(), memory, device: AutovectoredDevice::new() };
        bench.run_until_idle(200);
        bench.memory.reads.clear();
        bench.memory.writes.clear();
        bench
    }

    pub fn tick(&mut self) {
        if self.memory.busy_for > 0 {
            self.memory.busy_for -= 1;
        }
        self.cpu.cycle(&mut self.memory, &mut self.device).expect("tick failed");
    }

    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    pub fn run_until_idle(&mut self, limit: u32) -> u32 {
        for ticks in 1..=limit {
            self.tick();
            if self.cpu.is_idle() {
                return ticks;
            }
        }
        panic!("CPU did not come back to idle within {limit} ticks");
    }

    /// Execute exactly one instruction (including any exception processing
    /// it triggers) and return how many ticks it took.
    pub fn step_instruction(&mut self) -> u32 {
        self.run_until_idle(4096)
    }
}
