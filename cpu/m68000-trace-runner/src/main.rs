//! Minimal host harness: load a flat big-endian memory image (vector table
//! included), construct the CPU and tick it, optionally dumping bus activity
//! per cycle. Handy for eyeballing instruction timing against hardware
//! references:
//!
//! ```text
//! RUST_LOG=trace m68000-trace-runner -f image.bin --cycles 2000
//! ```

use clap::Parser;
use env_logger::Env;
use m68000_core::{AutovectoredDevice, BusLine, CpuBus, LinearMemory, M68000};
use std::fs;
use std::process;

#[derive(Parser)]
struct Args {
    /// Flat memory image, loaded at address 0
    #[arg(short = 'f', long)]
    file_path: String,

    /// Number of bus cycles to run
    #[arg(long, default_value_t = 10_000)]
    cycles: u64,

    /// Memory size in bytes; the image must fit
    #[arg(long, default_value_t = 0x0100_0000)]
    memory_size: usize,

    /// Raise this interrupt priority after --interrupt-after cycles
    #[arg(long)]
    interrupt: Option<u8>,

    #[arg(long, default_value_t = 0)]
    interrupt_after: u64,

    /// Log every bus cycle instead of instruction-level tracing only
    #[arg(long)]
    trace_bus: bool,
}

fn bus_snapshot(bus: &CpuBus) -> String {
    let line = |l, name: &str| if bus.is_set(l) { name.to_uppercase() } else { name.to_lowercase() };
    format!(
        "addr={:06X} data={:04X} fc={:03b} {} {} {} {} {}",
        bus.address() & 0x00FF_FFFF,
        bus.data(),
        bus.func_codes(),
        line(BusLine::As, "as"),
        line(BusLine::Uds, "uds"),
        line(BusLine::Lds, "lds"),
        line(BusLine::Rw, "rw"),
        line(BusLine::Dtack, "dtack"),
    )
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let image = match fs::read(&args.file_path) {
        Ok(image) => image,
        Err(err) => {
            log::error!("cannot read {}: {err}", args.file_path);
            process::exit(1);
        }
    };
    if image.len() > args.memory_size {
        log::error!("image ({} bytes) does not fit in memory", image.len());
        process::exit(1);
    }

    let mut memory = LinearMemory::new(args.memory_size);
    memory.load(0, &image);

    let mut device = AutovectoredDevice::new();
    let mut cpu = M68000::new();

    for cycle in 0..args.cycles {
        if let Some(priority) = args.interrupt {
            if cycle == args.interrupt_after {
                if let Err(err) = cpu.set_interrupt(priority) {
                    log::error!("{err}");
                    process::exit(1);
                }
            }
        }

        if let Err(err) = cpu.cycle(&mut memory, &mut device) {
            log::error!("tick {cycle}: {err}");
            process::exit(1);
        }

        if args.trace_bus {
            log::info!("{cycle:>8}: {}", bus_snapshot(cpu.bus()));
        }

        if cpu.is_halted() {
            log::warn!("CPU halted after {cycle} cycles");
            break;
        }
    }

    let regs = cpu.registers();
    log::info!("PC={:08X} SR={:04X} USP={:08X} SSP={:08X}", regs.pc, regs.status(), regs.usp, regs.ssp);
    for reg in 0..8u8 {
        log::info!("D{reg}={:08X} A{reg}={:08X}", regs.d(reg), regs.a(reg));
    }
}
