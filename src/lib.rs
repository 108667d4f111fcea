//! ZX Spectrum Emulator Core
//!
//! A platform-agnostic emulator core for the ZX Spectrum family (48K,
//! 128K, +2/+2A/+3, Timex TC2048/TC2068/TS2068, Pentagon, Scorpion) and
//! their common expansion hardware. Original Z80 machine code runs
//! against an emulated memory map, ULA, peripherals and storage media
//! with cycle-level timing, so software written for the real hardware
//! runs unmodified.
//!
//! # Architecture
//!
//! - `cpu`: Z80 interpreter with exact T-state accounting
//! - `memory`: banked, contended, per-page-writable address space
//! - `bus`: memory and port routing, contention, floating bus
//! - `peripherals`: the port-mapped device registry (ULA, AY, Kempston,
//!   SCLD, DivIDE, Interface I, Interface II, +D, Beta 128)
//! - `scheduler`: the tstate-ordered event queue driving the run loop
//! - `machine`: per-model timing and hardware descriptions
//! - `tape`: TAP/TZX block engine feeding the EAR input
//! - `disk` / `ide`: WD1770 floppy controller and the DivIDE's ATA
//!   channel
//! - `media`: cartridge image formats (.DCK, .MDR)
//! - `debugger`: breakpoints, condition expressions, disassembler
//! - `snapshot`: machine-independent state records
//! - `emu`: the orchestrator tying it all together
//!
//! # Memory map (CPU view, 8 x 8 KiB slots)
//!
//! | Slots | Typical contents                                   |
//! |-------|----------------------------------------------------|
//! | 0-1   | ROM, or a ROMCS override (DivIDE, +D, IF1, IF2...) |
//! | 2-3   | Screen RAM (page 5), contended                     |
//! | 4-5   | RAM page 2                                         |
//! | 6-7   | RAM page 0, or the page selected by port 0x7FFD    |

pub mod bus;
pub mod cpu;
pub mod debugger;
pub mod disk;
pub mod emu;
pub mod ide;
pub mod machine;
pub mod media;
pub mod memory;
pub mod peripherals;
pub mod scheduler;
pub mod snapshot;
pub mod tape;

pub use emu::{DiskInterface, Emu, StopReason};
pub use machine::Model;
