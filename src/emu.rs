//! Emulator orchestrator
//!
//! Owns the CPU, bus and tape engine and drives the per-frame run loop:
//! execute instructions until the next scheduled event, consult the
//! paging hooks and the debugger around each M1 fetch, drain due events,
//! and deliver the frame interrupt inside its acceptance window. All
//! host-facing operations (keys, media, snapshots, reset) happen between
//! instructions; the core never blocks.

use crate::bus::{page_event, page_event_tag, Bus};
use crate::cpu::{Cpu, InterruptMode};
use crate::debugger::{
    disasm, BreakpointKind, BreakpointLife, BreakpointTarget, CheckValue, Mode,
};
use crate::disk::image::{DiskImage, DiskError};
use crate::machine::{Model, Paging};
use crate::media::dck::{self, DckError};
use crate::media::mdr::{MdrCartridge, MdrError};
use crate::peripherals::kempston::JoystickInput;
use crate::peripherals::ula::Key;
use crate::peripherals::{divide, if1, plusd};
use crate::scheduler::EventKind;
use crate::snapshot::{AySnap, DivIdeSnap, PlusDSnap, ScldSnap, Snap, SnapError};
use crate::tape::tap::{self, TapError};
use crate::tape::tzx::{self, TzxError};
use crate::tape::{EdgeFlags, Tape};

/// Why the run loop returned to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A full frame completed
    FrameComplete,
    /// A breakpoint moved the debugger to halted
    DebuggerHalted,
    /// The host's stop flag was seen
    HostStop,
}

/// Disk interfaces a disk image can be inserted into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskInterface {
    PlusD,
    Beta128,
}

/// RZX playback drives frame ends by instruction count instead of the
/// tstate clock; the file I/O around it lives in the host
#[derive(Debug, Default)]
struct RzxPlayback {
    active: bool,
    /// Instructions in the current playback frame
    frame_instructions: u32,
    /// Instructions executed so far this frame
    executed: u32,
}

pub struct Emu {
    pub cpu: Cpu,
    pub bus: Bus,
    tape: Option<Tape>,
    tape_playing: bool,
    /// Frame interrupt raised but not yet delivered
    interrupt_pending: bool,
    /// Host stop flag, polled before each instruction
    stop_requested: bool,
    rzx: RzxPlayback,
    /// Scanline the display engine has been advanced to
    pub current_scanline: u32,
    frames: u64,
}

impl Emu {
    pub fn new(model: Model) -> Self {
        let bus = Bus::new(model);
        let mut emu = Emu {
            cpu: Cpu::new(),
            bus,
            tape: None,
            tape_playing: false,
            interrupt_pending: false,
            stop_requested: false,
            rzx: RzxPlayback::default(),
            current_scanline: 0,
            frames: 0,
        };
        emu.cpu.reset();
        emu.schedule_frame_start();
        emu
    }

    pub fn model(&self) -> Model {
        self.bus.spec.model
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Schedule the events every frame begins with
    fn schedule_frame_start(&mut self) {
        let frame_len = self.bus.spec.tstates_per_frame;
        self.bus.events.add(frame_len, EventKind::Frame, 0);

        if let Some(base) = self.bus.spec.contention_base {
            self.bus.events.add(base, EventKind::Line, 0);
        }

        for tstates in self.bus.debugger.time_breakpoints(frame_len) {
            self.bus
                .events
                .add(tstates, EventKind::DebuggerTime, tstates);
        }
    }

    // ========== Reset and host lines ==========

    /// Soft or hard reset. A hard reset clears RAM and every sticky
    /// latch (paging lock, DivIDE MAPRAM).
    pub fn reset(&mut self, hard_reset: bool) {
        self.cpu.reset();
        self.bus.reset(hard_reset);
        self.interrupt_pending = false;
        self.tape_playing = false;
        self.current_scanline = 0;
        self.schedule_frame_start();
        self.schedule_plusd_index();
    }

    /// Deliver an NMI at the next instruction boundary
    pub fn nmi(&mut self) {
        self.bus.events.add(self.bus.tstates, EventKind::Nmi, 0);
    }

    /// Ask the run loop to yield before the next instruction
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn set_key(&mut self, key: Key, down: bool) {
        self.bus.peripherals.ula.set_key(key, down);
    }

    pub fn set_joystick(&mut self, input: JoystickInput, pressed: bool) {
        self.bus.peripherals.kempston.set(input, pressed);
    }

    // ========== The run loop ==========

    /// Run until the frame completes, a breakpoint halts, or the host
    /// stop flag is seen
    pub fn run_frame(&mut self) -> StopReason {
        self.stop_requested = false;
        loop {
            while self.bus.tstates < self.bus.events.next_event_tstates() {
                if self.stop_requested {
                    return StopReason::HostStop;
                }
                if self.bus.debugger.halted() {
                    return StopReason::DebuggerHalted;
                }

                if self.interrupt_pending {
                    self.try_deliver_interrupt();
                }

                // RZX playback ends the frame by instruction count
                if self.rzx.active && self.rzx.executed >= self.rzx.frame_instructions {
                    let now = self.bus.tstates;
                    self.bus.events.cancel_kind(EventKind::Frame);
                    self.bus.events.add(now, EventKind::Frame, 0);
                    break;
                }

                if !self.step_instruction() {
                    return StopReason::DebuggerHalted;
                }
            }

            if self.drain_events() {
                return StopReason::FrameComplete;
            }
        }
    }

    /// Execute exactly one instruction with all hooks, regardless of
    /// debugger mode; the debugger stays halted afterwards
    pub fn single_step(&mut self) {
        let was_halted = self.bus.debugger.halted();
        if self.interrupt_pending {
            self.try_deliver_interrupt();
        }
        self.step_one();
        self.drain_events();
        if was_halted {
            self.bus.debugger.halt();
        }
    }

    /// Step over the instruction at PC: a one-shot breakpoint after its
    /// disassembled length, then resume
    pub fn step_over(&mut self) {
        let length = disasm::instruction_length(&self.bus.memory, self.cpu.pc);
        let target = self.cpu.pc.wrapping_add(length);
        self.bus.debugger.add(
            BreakpointKind::Execute,
            BreakpointTarget::Address {
                page: None,
                offset: target,
            },
            0,
            BreakpointLife::OneShot,
            None,
            None,
        );
        self.bus.debugger.run();
    }

    /// Resume after a halt
    pub fn debugger_run(&mut self) {
        self.bus.debugger.run();
    }

    /// One instruction through the hook chain. Returns false when the
    /// execute breakpoint check halted instead of executing.
    fn step_instruction(&mut self) -> bool {
        if self.bus.debugger.mode() != Mode::Inactive {
            self.bus.debugger.regs = self.cpu.registers();
            let pc = self.cpu.pc;
            let debugger = &mut self.bus.debugger;
            if debugger.check(
                BreakpointKind::Execute,
                CheckValue::Address(pc),
                &self.bus.memory,
            ) {
                return false;
            }
        }
        self.step_one();
        true
    }

    fn step_one(&mut self) {
        let pc = self.cpu.pc;
        self.pre_fetch_hooks(pc);

        self.cpu.step_with(&mut self.bus, |bus, fetched_pc| {
            if bus.peripherals.if1.enabled && if1::is_unpage_hook(fetched_pc) {
                bus.if1_page(false);
            }
            if bus.peripherals.divide.enabled {
                if divide::is_automap_exit(fetched_pc) {
                    bus.divide_set_automap(false);
                } else if divide::is_automap_entry(fetched_pc)
                    && fetched_pc & 0xFF00 != 0x3D00
                {
                    // The TR-DOS window is handled by the early hook
                    bus.divide_set_automap(true);
                }
            }
        });

        self.rzx.executed = self.rzx.executed.wrapping_add(1);
    }

    /// Hooks consulted before the opcode fetch
    fn pre_fetch_hooks(&mut self, pc: u16) {
        // TR-DOS pages in over 0x3Dxx with the BASIC ROM selected and
        // back out on any fetch above the ROM area
        if self.bus.peripherals.beta128.available() {
            let basic_rom = match self.bus.spec.paging {
                Paging::None => true,
                _ => self.bus.peripherals.paging.last_7ffd & 0x10 != 0,
            };
            if self.bus.peripherals.beta128.paged() {
                if basic_rom && pc >= 0x4000 {
                    self.bus.beta128_page(false);
                }
            } else if pc & 0xFF00 == 0x3D00 && basic_rom {
                self.bus.beta128_page(true);
            }
        }

        if self.bus.peripherals.plusd.enabled && plusd::is_page_hook(pc) {
            self.bus.plusd_page(true);
        }

        if self.bus.peripherals.if1.enabled && if1::is_page_hook(pc) {
            self.bus.if1_page(true);
        }

        // DivIDE maps the TR-DOS window ahead of the fetch
        if self.bus.peripherals.divide.enabled && pc & 0xFF00 == 0x3D00 {
            self.bus.divide_set_automap(true);
        }
    }

    /// Deliver the pending frame interrupt if the window still allows.
    /// The Timex DEC interrupt-disable bit holds it pending: clearing
    /// the bit inside the window raises the interrupt late.
    fn try_deliver_interrupt(&mut self) {
        if self.bus.tstates >= self.bus.spec.interrupt_length {
            self.interrupt_pending = false;
            return;
        }
        if self.bus.spec.timex && self.bus.peripherals.scld.interrupt_disabled() {
            return;
        }
        if self.cpu.maskable_interrupt(&mut self.bus) {
            self.interrupt_pending = false;
        } else if !self.cpu.iff1 {
            // Not taken and never will be this frame
            self.interrupt_pending = false;
        }
    }

    /// Dispatch everything due; true when a frame boundary was crossed
    fn drain_events(&mut self) -> bool {
        let mut frame_done = false;
        while let Some(event) = self.bus.events.pop_due(self.bus.tstates) {
            match event.kind {
                EventKind::Frame => {
                    self.end_frame();
                    frame_done = true;
                }
                EventKind::Line => {
                    self.current_scanline = event.payload;
                    let next = event.payload + 1;
                    if next < self.bus.spec.display_lines {
                        let at = event.tstates + self.bus.spec.line_tstates;
                        self.bus.events.add(at, EventKind::Line, next);
                    }
                }
                EventKind::TapeEdge => self.tape_edge(),
                EventKind::Nmi => self.cpu.nmi(&mut self.bus),
                EventKind::IndexPulse => {
                    let next_ms = self.bus.peripherals.plusd.index_event();
                    let at = self.bus.after_ms(next_ms);
                    self.bus
                        .events
                        .add(at, EventKind::IndexPulse, page_event::PLUSD);
                }
                EventKind::CmdDone => match event.payload {
                    page_event::BETA128 => self.bus.peripherals.beta128.cmd_done(),
                    _ => self.bus.peripherals.plusd.cmd_done(),
                },
                EventKind::DebuggerTime => {
                    let debugger = &mut self.bus.debugger;
                    debugger.check(
                        BreakpointKind::Time,
                        CheckValue::Time(event.payload),
                        &self.bus.memory,
                    );
                }
                EventKind::Page | EventKind::Unpage => {
                    let detail = if event.kind == EventKind::Page {
                        "page"
                    } else {
                        "unpage"
                    };
                    let debugger = &mut self.bus.debugger;
                    debugger.check(
                        BreakpointKind::Event,
                        CheckValue::Event {
                            kind: page_event_tag(event.payload),
                            detail,
                        },
                        &self.bus.memory,
                    );
                }
                EventKind::Null => {}
            }
        }
        frame_done
    }

    /// Frame boundary: raise the interrupt, rebase every counter by one
    /// frame length, reschedule the recurring events
    fn end_frame(&mut self) {
        self.interrupt_pending = true;
        self.frames += 1;
        self.rzx.executed = 0;

        // An instruction-counted (RZX) frame can end before the tstate
        // frame length; rebase by what actually elapsed so the counters
        // never go negative
        let frame_len = self.bus.spec.tstates_per_frame.min(self.bus.tstates);
        self.bus.tstates -= frame_len;
        self.bus.events.rebase(frame_len);

        self.schedule_frame_start();
    }

    // ========== RZX playback hook ==========

    /// Begin instruction-counted playback; the host feeds one frame's
    /// count at a time
    pub fn rzx_start_frame(&mut self, instructions: u32) {
        self.rzx = RzxPlayback {
            active: true,
            frame_instructions: instructions,
            executed: 0,
        };
    }

    pub fn rzx_stop(&mut self) {
        self.rzx = RzxPlayback::default();
    }

    // ========== Tape ==========

    /// Insert a parsed tape; any previous tape is replaced
    pub fn insert_tape(&mut self, tape: Tape) {
        self.tape = Some(tape);
        self.tape_playing = false;
    }

    /// Insert from a .TAP image; failure leaves the previous tape alone
    pub fn insert_tap(&mut self, buffer: &[u8]) -> Result<(), TapError> {
        let tape = tap::read(buffer)?;
        self.insert_tape(tape);
        Ok(())
    }

    /// Insert from a .TZX image; failure leaves the previous tape alone
    pub fn insert_tzx(&mut self, buffer: &[u8]) -> Result<(), TzxError> {
        let tape = tzx::read(buffer)?;
        self.insert_tape(tape);
        Ok(())
    }

    pub fn eject_tape(&mut self) -> Option<Tape> {
        self.tape_stop();
        self.tape.take()
    }

    pub fn tape(&self) -> Option<&Tape> {
        self.tape.as_ref()
    }

    /// Start the tape: the first edge is scheduled immediately
    pub fn tape_play(&mut self) {
        if self.tape.is_none() || self.tape_playing {
            return;
        }
        self.tape_playing = true;
        let now = self.bus.tstates;
        self.bus.events.add(now, EventKind::TapeEdge, 0);
    }

    pub fn tape_stop(&mut self) {
        self.tape_playing = false;
        self.bus.events.cancel_kind(EventKind::TapeEdge);
    }

    pub fn tape_playing(&self) -> bool {
        self.tape_playing
    }

    /// A TapeEdge event matured: toggle the EAR line and schedule the
    /// next edge. Zero-length edges (meta blocks) chain within the call.
    fn tape_edge(&mut self) {
        if !self.tape_playing {
            return;
        }
        let cycles_per_ms = self.bus.spec.cycles_per_ms();
        let stop_if_48k =
            self.bus.spec.is_48k_for_tape() || self.bus.peripherals.paging.locked;

        let tape = match self.tape.as_mut() {
            Some(tape) => tape,
            None => return,
        };

        loop {
            let (tstates, flags) = tape.next_edge(cycles_per_ms);
            self.bus.peripherals.ula.ear_in = !self.bus.peripherals.ula.ear_in;

            if flags.contains(EdgeFlags::STOP)
                || (flags.contains(EdgeFlags::STOP_IF_48K) && stop_if_48k)
            {
                self.tape_playing = false;
                return;
            }
            if tstates > 0 {
                let at = self.bus.tstates + tstates;
                self.bus.events.add(at, EventKind::TapeEdge, 0);
                return;
            }
        }
    }

    // ========== Disks, cartridges, IDE ==========

    fn schedule_plusd_index(&mut self) {
        if self.bus.peripherals.plusd.enabled
            && !self.bus.events.has_kind(EventKind::IndexPulse)
        {
            let now = self.bus.tstates;
            self.bus
                .events
                .add(now, EventKind::IndexPulse, page_event::PLUSD);
        }
    }

    /// Attach the +D (ROM image required before it pages)
    pub fn enable_plusd(&mut self, rom: &[u8]) {
        self.bus.peripherals.plusd.enabled = true;
        let memory = &mut self.bus.memory;
        self.bus.peripherals.plusd.load_rom(memory, rom);
        self.schedule_plusd_index();
    }

    /// Attach the Interface I with its shadow ROM
    pub fn enable_if1(&mut self, rom: &[u8]) {
        self.bus.peripherals.if1.enabled = true;
        let memory = &mut self.bus.memory;
        self.bus.peripherals.if1.load_rom(memory, rom);
    }

    /// Attach the DivIDE with its EPROM contents
    pub fn enable_divide(&mut self, eprom: &[u8]) {
        self.bus.peripherals.divide.enabled = true;
        let memory = &mut self.bus.memory;
        self.bus.peripherals.divide.load_eprom(memory, eprom);
    }

    /// Attach the Beta 128 with the TR-DOS ROM
    pub fn enable_beta128(&mut self, rom: &[u8]) {
        self.bus.peripherals.beta128.enabled = true;
        let memory = &mut self.bus.memory;
        self.bus.peripherals.beta128.load_rom(memory, rom);
    }

    /// Insert a raw disk image; failure leaves the drive as it was
    pub fn insert_disk(
        &mut self,
        interface: DiskInterface,
        drive: usize,
        image: &[u8],
    ) -> Result<(), DiskError> {
        let disk = DiskImage::from_bytes(image)?;
        match interface {
            DiskInterface::PlusD => self.bus.peripherals.plusd.insert_disk(drive, disk),
            DiskInterface::Beta128 => self.bus.peripherals.beta128.insert_disk(drive, disk),
        }
        Ok(())
    }

    pub fn eject_disk(&mut self, interface: DiskInterface, drive: usize) -> Option<DiskImage> {
        match interface {
            DiskInterface::PlusD => self.bus.peripherals.plusd.eject_disk(drive),
            DiskInterface::Beta128 => self.bus.peripherals.beta128.eject_disk(drive),
        }
    }

    /// Insert a microdrive cartridge; failure leaves the drive as it was
    pub fn insert_mdr(&mut self, drive: usize, image: &[u8]) -> Result<(), MdrError> {
        let cartridge = MdrCartridge::from_bytes(image)?;
        self.bus.peripherals.if1.insert_cartridge(drive, cartridge);
        Ok(())
    }

    pub fn eject_mdr(&mut self, drive: usize) -> Option<MdrCartridge> {
        self.bus.peripherals.if1.eject_cartridge(drive)
    }

    /// Insert an IF2 ROM cartridge; it pages immediately
    pub fn insert_if2(&mut self, rom: &[u8]) {
        let memory = &mut self.bus.memory;
        self.bus.peripherals.if2.insert(memory, rom);
        self.bus.memory_map();
    }

    pub fn eject_if2(&mut self) {
        self.bus.peripherals.if2.eject();
        self.bus.memory_map();
    }

    /// Load a Timex .DCK cartridge; failure leaves the banks untouched
    pub fn insert_dck(&mut self, image: &[u8]) -> Result<(), DckError> {
        dck::read(&mut self.bus.memory, image)?;
        self.bus.memory_map();
        Ok(())
    }

    /// Insert an IDE disk image behind the DivIDE
    pub fn insert_ide(&mut self, image: Vec<u8>) -> Result<(), crate::ide::IdeError> {
        self.bus.ide.insert(image)
    }

    /// Load a system ROM image
    pub fn load_rom(&mut self, rom: usize, data: &[u8]) {
        self.bus.memory.load_rom(rom, data);
        self.bus.memory_map();
    }

    // ========== Snapshots ==========

    /// Export the machine state; performed with the CPU paused
    pub fn to_snap(&self) -> Snap {
        let p = &self.bus.peripherals;
        let spec = &self.bus.spec;

        let mut ram_pages = Vec::with_capacity(spec.ram_pages);
        for page in 0..spec.ram_pages {
            ram_pages.push((page as u8, self.bus.memory.ram_page_bytes(page)));
        }

        Snap {
            model: spec.model,
            registers: self.cpu.registers(),
            iff1: self.cpu.iff1,
            iff2: self.cpu.iff2,
            im: match self.cpu.im {
                InterruptMode::Mode0 => 0,
                InterruptMode::Mode1 => 1,
                InterruptMode::Mode2 => 2,
            },
            halted: self.cpu.halted,
            tstates: self.bus.tstates,
            border: p.ula.border,
            last_7ffd: p.paging.last_7ffd,
            last_1ffd: p.paging.last_1ffd,
            paging_locked: p.paging.locked,
            ram_pages,
            ay: spec.has_ay.then(|| AySnap {
                selected: p.ay.selected(),
                registers: *p.ay.registers(),
            }),
            scld: spec.timex.then(|| ScldSnap {
                hsr: p.scld.hsr,
                dec: p.scld.dec,
            }),
            divide: p.divide.enabled.then(|| DivIdeSnap {
                control: p.divide.control_byte(),
                paged: p.divide.active(),
                eprom_writeprotect: p.divide.wp,
                eprom: self.bus.memory.page(p.divide.eprom_page()).to_vec(),
                ram: (0..crate::peripherals::divide::RAM_BANKS)
                    .map(|bank| self.bus.memory.page(p.divide.ram_bank(bank)).to_vec())
                    .collect(),
            }),
            plusd: p.plusd.enabled.then(|| PlusDSnap {
                paged: p.plusd.paged(),
                control: p.plusd.control_register,
                track: p.plusd.fdc.track_register,
                sector: p.plusd.fdc.sector_register,
                data: p.plusd.fdc.data_register,
                direction: p.plusd.fdc.direction,
                ram: self.bus.memory.page(p.plusd.ram_page()).to_vec(),
            }),
            if2_rom: p.if2.rom_bytes(&self.bus.memory),
        }
    }

    /// Import a snapshot. Validation happens before any state changes:
    /// on error the machine is exactly as it was before the call.
    pub fn from_snap(&mut self, snap: &Snap) -> Result<(), SnapError> {
        snap.validate(self.bus.spec.model, self.bus.spec.ram_pages)?;

        self.cpu.set_registers(&snap.registers);
        self.cpu.iff1 = snap.iff1;
        self.cpu.iff2 = snap.iff2;
        self.cpu.im = match snap.im {
            0 => InterruptMode::Mode0,
            1 => InterruptMode::Mode1,
            _ => InterruptMode::Mode2,
        };
        self.cpu.halted = snap.halted;
        self.bus.tstates = snap.tstates;

        self.bus.peripherals.ula.border = snap.border & 0x07;
        self.bus.peripherals.paging.last_7ffd = snap.last_7ffd;
        self.bus.peripherals.paging.last_1ffd = snap.last_1ffd;
        self.bus.peripherals.paging.locked = snap.paging_locked;

        for (page, data) in &snap.ram_pages {
            self.bus.memory.set_ram_page_bytes(*page as usize, data);
        }

        if let Some(ay) = &snap.ay {
            self.bus.peripherals.ay.set_registers(&ay.registers, ay.selected);
        }

        if let Some(scld) = &snap.scld {
            self.bus.peripherals.scld.hsr = scld.hsr;
            self.bus.peripherals.scld.dec = scld.dec;
        }

        if let Some(divide_snap) = &snap.divide {
            let p = &mut self.bus.peripherals.divide;
            p.enabled = true;
            p.wp = divide_snap.eprom_writeprotect;
            p.control_write_internal(divide_snap.control);
            p.set_automap(divide_snap.paged);
            let eprom = p.eprom_page();
            let n = divide_snap.eprom.len().min(crate::memory::PAGE_SIZE);
            self.bus.memory.page_mut(eprom)[..n].copy_from_slice(&divide_snap.eprom[..n]);
            for (bank, data) in divide_snap.ram.iter().enumerate() {
                let page = self.bus.peripherals.divide.ram_bank(bank);
                let n = data.len().min(crate::memory::PAGE_SIZE);
                self.bus.memory.page_mut(page)[..n].copy_from_slice(&data[..n]);
            }
        }

        if let Some(plusd_snap) = &snap.plusd {
            let p = &mut self.bus.peripherals.plusd;
            p.enabled = true;
            p.fdc.track_register = plusd_snap.track;
            p.fdc.sector_register = plusd_snap.sector;
            p.fdc.data_register = plusd_snap.data;
            p.fdc.direction = plusd_snap.direction;
            p.cn_write(plusd_snap.control);
            if plusd_snap.paged {
                p.page();
            } else {
                p.unpage();
            }
            let ram = p.ram_page();
            let n = plusd_snap.ram.len().min(crate::memory::PAGE_SIZE);
            self.bus.memory.page_mut(ram)[..n].copy_from_slice(&plusd_snap.ram[..n]);
        }

        if let Some(rom) = &snap.if2_rom {
            let memory = &mut self.bus.memory;
            self.bus.peripherals.if2.insert(memory, rom);
        }

        self.bus.memory_map();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::TapeBlock;
    use pretty_assertions::assert_eq;

    fn emu_with_program(program: &[u8]) -> Emu {
        let mut emu = Emu::new(Model::Spectrum48);
        for (i, &byte) in program.iter().enumerate() {
            emu.bus.write_internal(0x8000 + i as u16, byte);
        }
        emu.cpu.pc = 0x8000;
        emu
    }

    #[test]
    fn test_run_frame_advances_time() {
        let mut emu = emu_with_program(&[0x00, 0x18, 0xFD]); // nop; jr -3
        assert_eq!(emu.run_frame(), StopReason::FrameComplete);
        assert_eq!(emu.frames(), 1);
        // The counter rebases at the frame boundary
        assert!(emu.bus.tstates < emu.bus.spec.tstates_per_frame);
    }

    #[test]
    fn test_halt_survives_frame_and_interrupt_resumes() {
        // ei; halt; then spin
        let mut emu = emu_with_program(&[0xFB, 0x76, 0x18, 0xFE]);
        emu.cpu.im = InterruptMode::Mode1;
        assert_eq!(emu.run_frame(), StopReason::FrameComplete);
        // The frame interrupt wakes HALT and calls 0x0038
        emu.run_frame();
        assert!(!emu.cpu.halted);
        assert!(!emu.cpu.iff1);
    }

    #[test]
    fn test_im2_vector_dispatch() {
        // The IM2 vector comes from (I<<8)|0xFF; point it into RAM
        let mut emu = emu_with_program(&[0xFB, 0x76]);
        emu.cpu.im = InterruptMode::Mode2;
        emu.cpu.i = 0x90;
        emu.bus.write_internal(0x90FF, 0x34);
        emu.bus.write_internal(0x9100, 0x12);
        emu.bus.debugger.add(
            BreakpointKind::Execute,
            BreakpointTarget::Address {
                page: None,
                offset: 0x1234,
            },
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        emu.run_frame();
        assert_eq!(emu.run_frame(), StopReason::DebuggerHalted);
        assert_eq!(emu.cpu.pc, 0x1234);
        assert!(!emu.cpu.iff1);
        assert!(!emu.cpu.iff2);
    }

    #[test]
    fn test_debugger_breakpoint_stops_loop() {
        let mut emu = emu_with_program(&[0x00, 0x00, 0x00, 0x18, 0xFB]);
        emu.bus.debugger.add(
            BreakpointKind::Execute,
            BreakpointTarget::Address {
                page: None,
                offset: 0x8002,
            },
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert_eq!(emu.run_frame(), StopReason::DebuggerHalted);
        assert_eq!(emu.cpu.pc, 0x8002);

        // Single-step executes exactly one instruction
        emu.single_step();
        assert_eq!(emu.cpu.pc, 0x8003);
    }

    #[test]
    fn test_step_over_call() {
        // call 0x9000; nop ... at 0x9000: ret
        let mut emu = emu_with_program(&[0xCD, 0x00, 0x90, 0x00]);
        emu.bus.write_internal(0x9000, 0xC9);
        emu.cpu.sp = 0xFF00;
        emu.step_over();
        emu.run_frame();
        assert_eq!(emu.cpu.pc, 0x8003);
    }

    #[test]
    fn test_tape_edge_toggles_ear() {
        let mut emu = emu_with_program(&[0x18, 0xFE]);
        emu.insert_tape(Tape::new(vec![TapeBlock::PureTone {
            pulse_length: 1000,
            pulses: 100,
        }]));
        emu.tape_play();
        let before = emu.bus.peripherals.ula.ear_in;
        emu.run_frame();
        // Dozens of edges happened during the frame
        let _ = before;
        assert!(emu.tape_playing());
    }

    #[test]
    fn test_tape_stop48_on_48k() {
        let mut emu = emu_with_program(&[0x18, 0xFE]);
        emu.insert_tape(Tape::new(vec![TapeBlock::Stop48]));
        emu.tape_play();
        emu.run_frame();
        assert!(!emu.tape_playing());
    }

    #[test]
    fn test_rzx_instruction_counted_frame() {
        let mut emu = emu_with_program(&[0x00, 0x18, 0xFD]);
        emu.rzx_start_frame(10);
        assert_eq!(emu.run_frame(), StopReason::FrameComplete);
        // The frame ended by instruction count, far before the tstate
        // frame length
        assert!(emu.bus.tstates < 1000);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut emu = Emu::new(Model::Spectrum128);
        emu.bus.write_port_internal(0x7FFD, 0x0B); // page 3, screen 7
        emu.bus.write_internal(0xC000, 0x42);
        emu.cpu.pc = 0x4321;
        emu.cpu.a = 0x99;
        emu.cpu.sp = 0x8000;

        let snap = emu.to_snap();

        let mut other = Emu::new(Model::Spectrum128);
        other.from_snap(&snap).unwrap();
        assert_eq!(other.cpu.pc, 0x4321);
        assert_eq!(other.cpu.a, 0x99);
        assert_eq!(other.bus.peripherals.paging.last_7ffd, 0x0B);
        assert_eq!(other.bus.read_internal(0xC000), 0x42);
        assert_eq!(other.bus.memory.current_screen, 7);

        let round = other.to_snap();
        assert_eq!(round, snap);
    }

    #[test]
    fn test_snapshot_load_failure_leaves_state() {
        let mut emu = Emu::new(Model::Spectrum48);
        emu.cpu.a = 0x55;
        let mut snap = Emu::new(Model::Spectrum128).to_snap();
        snap.registers.pc = 0x1234;
        assert!(emu.from_snap(&snap).is_err());
        // Nothing changed
        assert_eq!(emu.cpu.a, 0x55);
        assert_eq!(emu.cpu.pc, 0);
    }

    #[test]
    fn test_divide_automap_on_entry_fetch() {
        let mut emu = emu_with_program(&[0xFF]); // rst 0x38
        emu.enable_divide(&[0xC9; 0x2000]);
        emu.bus.peripherals.divide.wp = true;
        let bank = emu.bus.peripherals.divide.ram_bank(0);
        emu.bus.memory.page_mut(bank)[0] = 0x42;

        emu.single_step(); // rst 0x38
        assert_eq!(emu.cpu.pc, 0x0038);
        assert!(!emu.bus.peripherals.divide.active());

        // The M1 fetch of the entry point pages the interface in
        emu.single_step();
        assert!(emu.bus.peripherals.divide.active());
        assert_eq!(emu.bus.read_internal(0x2000), 0x42);
        // Slot 0 now reads the EPROM
        assert_eq!(emu.bus.read_internal(0x0100), 0xC9);
    }

    #[test]
    fn test_nmi_jumps_to_0066() {
        let mut emu = emu_with_program(&[0x00, 0x18, 0xFD]);
        emu.cpu.sp = 0xFF00;
        emu.cpu.iff1 = true;
        emu.nmi();
        emu.run_frame();
        // IFF1 untouched by the NMI
        assert!(emu.cpu.iff1);
    }
}
