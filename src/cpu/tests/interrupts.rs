//! Interrupt, NMI, HALT and R register tests

use super::*;
use crate::cpu::flags;

#[test]
fn test_interrupt_rejected_with_iff1_clear() {
    let (mut cpu, mut bus) = setup(&[0x00]);
    cpu.iff1 = false;
    assert!(!cpu.maskable_interrupt(&mut bus));
    assert_eq!(cpu.pc, 0x8000);
}

#[test]
fn test_im1_interrupt() {
    let (mut cpu, mut bus) = setup(&[0x00]);
    cpu.iff1 = true;
    cpu.iff2 = true;
    cpu.im = InterruptMode::Mode1;
    let before = bus.tstates;
    assert!(cpu.maskable_interrupt(&mut bus));
    assert_eq!(cpu.pc, 0x0038);
    assert!(!cpu.iff1);
    assert!(!cpu.iff2);
    assert_eq!(bus.tstates - before, 13);
    // Old PC pushed
    assert_eq!(bus.read_internal(0xFEFE), 0x00);
    assert_eq!(bus.read_internal(0xFEFF), 0x80);
}

#[test]
fn test_im2_interrupt_e3() {
    // E3: I=0x80, vector bytes at 0x80FF/0x8100 send PC to 0x1234
    let (mut cpu, mut bus) = setup(&[]);
    cpu.pc = 0x1234;
    cpu.i = 0x80;
    cpu.iff1 = true;
    cpu.iff2 = true;
    cpu.im = InterruptMode::Mode2;
    bus.write_internal(0x80FF, 0x34);
    bus.write_internal(0x8100, 0x12);

    let before = bus.tstates;
    assert!(cpu.maskable_interrupt(&mut bus));
    assert_eq!(cpu.pc, 0x1234);
    assert!(!cpu.iff1);
    assert!(!cpu.iff2);
    assert_eq!(bus.tstates - before, 19);
    // Old PC 0x1234 on the stack
    assert_eq!(bus.read_internal(0xFEFE), 0x34);
    assert_eq!(bus.read_internal(0xFEFF), 0x12);
}

#[test]
fn test_im0_timing() {
    let (mut cpu, mut bus) = setup(&[]);
    cpu.iff1 = true;
    cpu.im = InterruptMode::Mode0;
    let before = bus.tstates;
    cpu.maskable_interrupt(&mut bus);
    assert_eq!(cpu.pc, 0x0038);
    assert_eq!(bus.tstates - before, 12);
}

#[test]
fn test_interrupt_exits_halt() {
    let (mut cpu, mut bus) = setup(&[0x76]);
    cpu.iff1 = true;
    cpu.im = InterruptMode::Mode1;
    cpu.step(&mut bus);
    assert!(cpu.halted);
    assert_eq!(cpu.pc, 0x8000);

    assert!(cpu.maskable_interrupt(&mut bus));
    assert!(!cpu.halted);
    // PC advanced past the HALT before the push
    assert_eq!(bus.read_internal(0xFEFE), 0x01);
    assert_eq!(bus.read_internal(0xFEFF), 0x80);
    assert_eq!(cpu.pc, 0x0038);
}

#[test]
fn test_nmi_preserves_iff1() {
    let (mut cpu, mut bus) = setup(&[0x00]);
    cpu.iff1 = true;
    cpu.iff2 = true;
    let before = bus.tstates;
    cpu.nmi(&mut bus);
    assert_eq!(cpu.pc, 0x0066);
    assert!(cpu.iff1);
    assert!(cpu.iff2);
    assert_eq!(bus.tstates - before, 11);
}

#[test]
fn test_ei_defers_one_instruction() {
    let (mut cpu, mut bus) = setup(&[0xFB, 0x00, 0x00]);
    cpu.step(&mut bus); // ei
    assert!(cpu.iff1);
    assert!(!cpu.accepts_interrupt());
    assert!(!cpu.maskable_interrupt(&mut bus));

    cpu.step(&mut bus); // the instruction after ei runs first
    assert!(cpu.accepts_interrupt());
    assert!(cpu.maskable_interrupt(&mut bus));
}

#[test]
fn test_di() {
    let (mut cpu, mut bus) = setup(&[0xF3]);
    cpu.iff1 = true;
    cpu.iff2 = true;
    cpu.step(&mut bus);
    assert!(!cpu.iff1);
    assert!(!cpu.iff2);
}

#[test]
fn test_retn_restores_iff1() {
    let (mut cpu, mut bus) = setup(&[0xED, 0x45]);
    cpu.iff1 = false;
    cpu.iff2 = true;
    cpu.sp = 0x9000;
    bus.write_internal(0x9000, 0x21);
    bus.write_internal(0x9001, 0x43);
    assert_eq!(step_timed(&mut cpu, &mut bus), 14);
    assert!(cpu.iff1);
    assert_eq!(cpu.pc, 0x4321);
}

#[test]
fn test_r_counts_m1_and_prefix_fetches() {
    // Property: R increments n+1 times for n prefix bytes, bit 7 kept
    let (mut cpu, mut bus) = setup(&[
        0x00, // nop: +1
        0xCB, 0x00, // rlc b: +2
        0xDD, 0x7E, 0x00, // ld a,(ix+0): +2
        0xED, 0x44, // neg: +2
        0xDD, 0xCB, 0x00, 0x06, // rlc (ix+0): +2
    ]);
    cpu.ix = 0x9000;
    cpu.r = 0x80; // bit 7 latched high

    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x81);
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x83);
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x85);
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x87);
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x89);
}

#[test]
fn test_r_wraps_within_7_bits() {
    let (mut cpu, mut bus) = setup(&[0x00, 0x00]);
    cpu.r = 0xFF;
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x80);
    cpu.step(&mut bus);
    assert_eq!(cpu.r, 0x81);
}

#[test]
fn test_unapplied_prefix_counts_one_refresh() {
    // DD before an unaffected opcode: the prefix alone bumps R once
    let (mut cpu, mut bus) = setup(&[0xDD, 0x3E, 0x01]);
    cpu.r = 0;
    cpu.step(&mut bus); // prefix NOP
    assert_eq!(cpu.r, 1);
    cpu.step(&mut bus); // ld a,n
    assert_eq!(cpu.r, 2);
}

#[test]
fn test_ld_r_a_sets_bit7() {
    let (mut cpu, mut bus) = setup(&[0xED, 0x4F, 0x00]);
    cpu.a = 0xFF;
    cpu.step(&mut bus); // ld r,a
    assert_eq!(cpu.r, 0xFF);
    cpu.step(&mut bus); // nop keeps the latch
    assert_eq!(cpu.r, 0x80);
}

#[test]
fn test_ld_a_r_flags() {
    let (mut cpu, mut bus) = setup(&[0xED, 0x5F]);
    cpu.r = 0x00;
    cpu.iff2 = true;
    cpu.f = flags::C;
    cpu.step(&mut bus);
    // R was bumped twice by the two fetches before the copy
    assert_eq!(cpu.a, 0x02);
    assert_ne!(cpu.f & flags::PV, 0);
    assert_ne!(cpu.f & flags::C, 0);
}
