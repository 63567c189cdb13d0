//! End-to-end scenarios driven through the public API: full instructions
//! executing against memory with observable bus traffic.

mod common;

use common::{RESET_PC, RESET_SSP, TestBench};
use m68000_core::{AddrSpace, OpSize};

#[test]
fn reset_loads_ssp_and_pc_from_vector_table() {
    let bench = TestBench::with_program(&[0x4E71]);

    let regs = bench.cpu.registers();
    assert_eq!(regs.ssp, RESET_SSP);
    assert_eq!(regs.pc, RESET_PC);
    assert!(regs.sr.supervisor);
    assert!(!regs.sr.trace);
    assert_eq!(regs.sr.interrupt_mask, 7);
    // pipeline is primed with the first opcode
    assert_eq!(regs.ird, 0x4E71);
}

#[test]
fn nop_takes_four_cycles() {
    let mut bench = TestBench::with_program(&[0x4E71, 0x4E71, 0x4E71]);
    assert_eq!(bench.step_instruction(), 4);
    assert_eq!(bench.step_instruction(), 4);
    assert_eq!(bench.cpu.registers().pc, RESET_PC + 4);
}

#[test]
fn move_long_immediate_to_d0() {
    // MOVE.L #$12345678, D0
    let mut bench = TestBench::with_program(&[0x203C, 0x1234, 0x5678, 0x4E71, 0x4E71]);

    let ticks = bench.step_instruction();
    assert_eq!(ticks, 12);

    let regs = bench.cpu.registers();
    assert_eq!(regs.d(0), 0x1234_5678);
    assert_eq!(regs.pc, 0x1006);

    let sr = regs.sr;
    assert!(!sr.negative && !sr.zero && !sr.overflow && !sr.carry);

    // the two trailing prefetch words come from 0x1006 and 0x1008
    assert_eq!(bench.memory.reads, vec![0x1004, 0x1006, 0x1008]);
}

#[test]
fn add_word_overflow_flags() {
    // MOVE.L #$7FFF, D0; MOVE.L #1, D1; ADD.W D1, D0
    let mut bench = TestBench::with_program(&[
        0x203C, 0x0000, 0x7FFF, // MOVE.L #$7FFF, D0
        0x223C, 0x0000, 0x0001, // MOVE.L #1, D1
        0xD041, // ADD.W D1, D0
        0x4E71,
    ]);
    bench.step_instruction();
    bench.step_instruction();
    let ticks = bench.step_instruction();
    assert_eq!(ticks, 4);

    let regs = bench.cpu.registers();
    assert_eq!(regs.d(0), 0x8000);
    assert!(regs.sr.overflow);
    assert!(regs.sr.negative);
    assert!(!regs.sr.zero);
    assert!(!regs.sr.carry);
    assert!(!regs.sr.extend);
}

#[test]
fn odd_word_write_takes_the_address_error_vector() {
    // handler at 0x2000 via vector 3 (0x0C)
    let mut bench = TestBench::with_program(&[
        0x3079, 0x0000, 0x3000, // MOVEA.W ($3000).L, A0  (loads 0x1001)
        0x3080, // MOVE.W D0, (A0)
        0x4E71,
    ]);
    bench.memory.ram.write_long_word(0x0C, 0x2000);
    bench.memory.ram.write_word(0x3000, 0x1001);
    bench.memory.ram.write_word(0x2000, 0x4E71);

    bench.step_instruction();
    let ssp_before = bench.cpu.registers().ssp;
    bench.step_instruction();

    let regs = bench.cpu.registers();
    // handler entered through vector 0x0C
    assert_eq!(regs.pc, 0x2000);
    assert!(regs.sr.supervisor);

    // seven words pushed
    assert_eq!(regs.ssp, ssp_before - 14);
    let frame = regs.ssp;
    let status = bench.memory.ram.read_word(frame);
    let fault_address = bench.memory.ram.read_long_word(frame + 2);
    let opcode = bench.memory.ram.read_word(frame + 6);

    assert_eq!(fault_address, 0x1001);
    assert_eq!(opcode, 0x3080);
    // write access, data space, supervisor: R/W clear, FC = 101
    assert_eq!(status & 0b10111, 0b00101);

    // the faulted store never reached memory
    assert!(!bench.memory.writes.iter().any(|&(addr, _)| addr == 0x1000 || addr == 0x1001));
}

#[test]
fn bus_arbitration_stalls_cpu_cycles() {
    let mut bench = TestBench::with_program(&[
        0x203C, 0x1234, 0x5678, // MOVE.L #…, D0
        0x4E71, 0x4E71, 0x4E71,
    ]);

    // let the MOVE get into its immediate reads, then request the bus
    bench.run(2);
    bench.cpu.request_bus().unwrap();

    // grant happens at the next idle bus state
    let mut granted_after = None;
    for ticks in 1..=16 {
        bench.tick();
        if bench.cpu.bus_granted() {
            granted_after = Some(ticks);
            break;
        }
    }
    let granted_after = granted_after.expect("bus was never granted");
    assert!(granted_after <= 8, "grant took {granted_after} ticks");

    // while granted: no new CPU reads start, and the external master can
    // drive its own cycles through the pins
    let reads_before = bench.memory.reads.len();
    bench.run(12);
    assert_eq!(bench.memory.reads.len(), reads_before);

    bench.cpu.init_read_word(0x0006, AddrSpace::Data).unwrap();
    bench.run(8);
    assert_eq!(bench.cpu.latched_word().unwrap(), RESET_PC as u16);

    // release: the CPU resumes exactly where it stalled
    bench.cpu.release_bus().unwrap();
    bench.run_until_idle(64);
    assert_eq!(bench.cpu.registers().d(0), 0x1234_5678);
}

#[test]
fn autovectored_interrupt_is_taken_at_instruction_boundary() {
    let mut bench = TestBench::with_program(&[0x4E71, 0x4E71, 0x4E71, 0x4E71]);
    // handler for autovector level 4 (vector 28 at 0x70)
    bench.memory.ram.write_long_word(0x70, 0x4000);
    bench.memory.ram.write_word(0x4000, 0x4E71);

    bench.cpu.registers_mut().sr.interrupt_mask = 3;
    let ssp_before = bench.cpu.registers().ssp;

    // raise the level while the first NOP is already executing
    bench.tick();
    bench.cpu.set_interrupt(4).unwrap();
    bench.step_instruction();

    let regs = bench.cpu.registers();
    assert_eq!(regs.pc, 0x4000);
    assert_eq!(regs.sr.interrupt_mask, 4);
    assert!(regs.sr.supervisor);

    // three-word frame: SR then PC, with the pre-interrupt values
    assert_eq!(regs.ssp, ssp_before - 6);
    let pushed_sr = bench.memory.ram.read_word(regs.ssp);
    let pushed_pc = bench.memory.ram.read_long_word(regs.ssp + 2);
    assert_eq!(pushed_sr & 0x0700, 0x0300);
    assert_eq!(pushed_pc, RESET_PC + 2);
}

#[test]
fn interrupt_below_mask_is_ignored() {
    let mut bench = TestBench::with_program(&[0x4E71, 0x4E71, 0x4E71]);
    bench.cpu.registers_mut().sr.interrupt_mask = 5;

    bench.cpu.set_interrupt(4).unwrap();
    bench.step_instruction();
    assert_eq!(bench.cpu.registers().pc, RESET_PC + 2);
}

#[test]
fn trap_pushes_frame_and_vectors() {
    let mut bench = TestBench::with_program(&[0x4E45, 0x4E71]); // TRAP #5
    bench.memory.ram.write_long_word((32 + 5) * 4, 0x5000);
    bench.memory.ram.write_word(0x5000, 0x4E71);

    let ssp_before = bench.cpu.registers().ssp;
    bench.step_instruction();

    let regs = bench.cpu.registers();
    assert_eq!(regs.pc, 0x5000);
    assert_eq!(regs.ssp, ssp_before - 6);
    assert_eq!(bench.memory.ram.read_long_word(regs.ssp + 2), RESET_PC + 2);
}

#[test]
fn rte_returns_from_trap() {
    let mut bench = TestBench::with_program(&[0x4E45, 0x4E71, 0x4E71]); // TRAP #5
    bench.memory.ram.write_long_word((32 + 5) * 4, 0x5000);
    bench.memory.ram.write_word(0x5000, 0x4E73); // RTE

    bench.step_instruction(); // trap entry
    bench.step_instruction(); // RTE

    let regs = bench.cpu.registers();
    assert_eq!(regs.pc, RESET_PC + 2);
    assert_eq!(regs.ssp, RESET_SSP);
}

#[test]
fn movem_round_trips_registers_through_memory() {
    // MOVEM.L D0-D2/A0, -(A7); MOVEM.L (A7)+, D0-D2/A0
    let mut bench = TestBench::with_program(&[
        0x48E7, 0xE080, // MOVEM.L D0-D2/A0, -(A7)  (predec mask: D0..A0)
        0x4CDF, 0x0107, // MOVEM.L (A7)+, D0-D2/A0
        0x4E71,
    ]);

    {
        let regs = bench.cpu.registers_mut();
        regs.set_d(0, 0x00D0_00D0, OpSize::LongWord);
        regs.set_d(1, 0x00D1_00D1, OpSize::LongWord);
        regs.set_d(2, 0x00D2_00D2, OpSize::LongWord);
        regs.set_a(0, 0x00A0_00A0, OpSize::LongWord);
    }
    let ssp_before = bench.cpu.registers().ssp;

    bench.step_instruction();
    assert_eq!(bench.cpu.registers().ssp, ssp_before - 16);

    {
        let regs = bench.cpu.registers_mut();
        regs.set_d(0, 0, OpSize::LongWord);
        regs.set_d(1, 0, OpSize::LongWord);
        regs.set_d(2, 0, OpSize::LongWord);
        regs.set_a(0, 0, OpSize::LongWord);
    }

    bench.step_instruction();
    let regs = bench.cpu.registers();
    assert_eq!(regs.ssp, ssp_before);
    assert_eq!(regs.d(0), 0x00D0_00D0);
    assert_eq!(regs.d(1), 0x00D1_00D1);
    assert_eq!(regs.d(2), 0x00D2_00D2);
    assert_eq!(regs.a(0), 0x00A0_00A0);
}

#[test]
fn dbra_loops_the_documented_number_of_times() {
    // MOVEQ #3, D0; loop: DBRA D0, loop; NOP
    let mut bench = TestBench::with_program(&[0x7003, 0x51C8, 0xFFFE, 0x4E71]);
    bench.step_instruction(); // MOVEQ

    for _ in 0..3 {
        let ticks = bench.step_instruction();
        assert_eq!(ticks, 10); // branch taken
        assert_eq!(bench.cpu.registers().pc, RESET_PC + 2);
    }

    let ticks = bench.step_instruction();
    assert_eq!(ticks, 14); // counter expired, fall through
    assert_eq!(bench.cpu.registers().pc, RESET_PC + 6);
    assert_eq!(bench.cpu.registers().d(0) & 0xFFFF, 0xFFFF);
}

#[test]
fn jsr_rts_round_trip() {
    // JSR ($2000).W; NOP ... sub: RTS
    let mut bench = TestBench::with_program(&[0x4EB8, 0x2000, 0x4E71]);
    bench.memory.ram.write_word(0x2000, 0x4E75); // RTS

    let ssp_before = bench.cpu.registers().ssp;
    bench.step_instruction();
    assert_eq!(bench.cpu.registers().pc, 0x2000);
    assert_eq!(bench.cpu.registers().ssp, ssp_before - 4);
    assert_eq!(bench.memory.ram.read_long_word(ssp_before - 4), RESET_PC + 4);

    bench.step_instruction();
    assert_eq!(bench.cpu.registers().pc, RESET_PC + 4);
    assert_eq!(bench.cpu.registers().ssp, ssp_before);
}

#[test]
fn stop_parks_until_interrupt() {
    // STOP #$2300 (supervisor, mask 3)
    let mut bench = TestBench::with_program(&[0x4E72, 0x2300, 0x4E71]);
    bench.memory.ram.write_long_word(0x74, 0x4000); // autovector level 5
    bench.memory.ram.write_word(0x4000, 0x4E71);

    bench.run(8);
    assert!(bench.cpu.is_stopped());
    assert_eq!(bench.cpu.registers().sr.interrupt_mask, 3);

    // stays parked with no bus traffic
    let reads_before = bench.memory.reads.len();
    bench.run(20);
    assert!(bench.cpu.is_stopped());
    assert_eq!(bench.memory.reads.len(), reads_before);

    bench.cpu.set_interrupt(5).unwrap();
    bench.run_until_idle(256);
    assert!(!bench.cpu.is_stopped());
    assert_eq!(bench.cpu.registers().pc, 0x4000);
    // the pushed return address points past the STOP
    let regs = bench.cpu.registers();
    assert_eq!(bench.memory.ram.read_long_word(regs.ssp + 2), RESET_PC + 4);
}

#[test]
fn trace_fires_after_each_instruction() {
    let mut bench = TestBench::with_program(&[0x4E71, 0x4E71]);
    bench.memory.ram.write_long_word(0x24, 0x6000); // trace vector
    bench.memory.ram.write_word(0x6000, 0x4E71);

    bench.cpu.registers_mut().sr.trace = true;
    bench.step_instruction();

    let regs = bench.cpu.registers();
    assert_eq!(regs.pc, 0x6000);
    assert!(!regs.sr.trace);
    // stacked PC points at the instruction after the traced NOP
    assert_eq!(bench.memory.ram.read_long_word(regs.ssp + 2), RESET_PC + 2);
}

#[test]
fn privilege_violation_from_user_mode() {
    // MOVE #$2700, SR from user mode
    let mut bench = TestBench::with_program(&[0x46FC, 0x2700, 0x4E71]);
    bench.memory.ram.write_long_word(0x20, 0x7000); // privilege vector
    bench.memory.ram.write_word(0x7000, 0x4E71);

    bench.cpu.registers_mut().sr.supervisor = false;
    bench.cpu.registers_mut().usp = 0x6000;

    bench.step_instruction();
    let regs = bench.cpu.registers();
    assert_eq!(regs.pc, 0x7000);
    assert!(regs.sr.supervisor);
    // the violating instruction's own address is stacked, on the supervisor
    // stack
    assert_eq!(bench.memory.ram.read_long_word(regs.ssp + 2), RESET_PC);
    assert_eq!(regs.usp, 0x6000);
}

#[test]
fn divide_by_zero_traps_through_vector_five() {
    // MOVEQ #0, D1; DIVU D1, D0
    let mut bench = TestBench::with_program(&[0x7200, 0x80C1, 0x4E71]);
    bench.memory.ram.write_long_word(0x14, 0x3000);
    bench.memory.ram.write_word(0x3000, 0x4E71);

    bench.step_instruction();
    bench.step_instruction();
    assert_eq!(bench.cpu.registers().pc, 0x3000);
}

#[test]
fn tas_is_one_uninterrupted_read_modify_write() {
    // LEA ($3000).W, A0; TAS (A0)
    let mut bench = TestBench::with_program(&[0x41F8, 0x3000, 0x4AD0, 0x4E71]);
    bench.memory.ram.write_byte(0x3000, 0x00);

    bench.step_instruction();
    let ticks = bench.step_instruction();
    assert_eq!(ticks, 14);
    assert_eq!(bench.memory.ram.read_byte(0x3000), 0x80);
    assert!(bench.cpu.registers().sr.zero);
}
