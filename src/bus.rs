//! System bus
//!
//! Routes every CPU access: memory reads/writes through the eight-slot
//! page map with ULA contention, port I/O through the peripheral
//! registry with floating-bus fallback, and both past the debugger's
//! read/write/port breakpoints. The bus owns the tstate counter; every
//! access charges its cycles at the point of access.

use crate::debugger::{BreakpointKind, CheckValue, Debugger};
use crate::ide::{IdeChannel, IdeRegister};
use crate::machine::{FloatingBus, MachineSpec, Model, Paging};
use crate::memory::Memory;
use crate::peripherals::{DeviceId, Peripherals};
use crate::scheduler::{EventKind, Scheduler};

/// Payload tags for Page/Unpage events, naming the interface
pub mod page_event {
    pub const DIVIDE: u32 = 0;
    pub const PLUSD: u32 = 1;
    pub const IF1: u32 = 2;
    pub const BETA128: u32 = 3;
}

pub fn page_event_tag(payload: u32) -> &'static str {
    match payload {
        page_event::DIVIDE => "divide",
        page_event::PLUSD => "plusd",
        page_event::IF1 => "if1",
        _ => "beta128",
    }
}

/// +3 special all-RAM configurations, selected by bits 1-2 of 0x1FFD
const PLUS3_SPECIAL: [[usize; 4]; 4] = [[0, 1, 2, 3], [4, 5, 6, 7], [4, 5, 6, 3], [4, 7, 6, 3]];

pub struct Bus {
    pub spec: MachineSpec,
    pub memory: Memory,
    pub peripherals: Peripherals,
    pub ide: IdeChannel,
    pub events: Scheduler,
    pub debugger: Debugger,
    /// Tstates into the current frame
    pub tstates: u32,
}

impl Bus {
    pub fn new(model: Model) -> Self {
        let spec = MachineSpec::for_model(model);
        let mut memory = Memory::new();
        let peripherals = Peripherals::new(&spec, &mut memory);
        let mut bus = Bus {
            spec,
            memory,
            peripherals,
            ide: IdeChannel::new(),
            events: Scheduler::new(),
            debugger: Debugger::new(),
            tstates: 0,
        };
        bus.memory_map();
        bus
    }

    // ========== Contention ==========

    /// Charge `time` tstates for an access to `addr`, with the ULA delay
    /// first when the target page is contended
    #[inline]
    pub fn contend(&mut self, addr: u16, time: u32) {
        if self.memory.is_contended(addr) {
            self.tstates += self.spec.contention_delay(self.tstates);
        }
        self.tstates += time;
    }

    // ========== Memory access ==========

    /// CPU data read: breakpoints, contention, 3 tstates. A triggered
    /// breakpoint halts the debugger; the run loop notices at the next
    /// instruction boundary.
    pub fn read_byte(&mut self, addr: u16) -> u8 {
        if self.debugger.active() {
            self.debugger
                .check(BreakpointKind::Read, CheckValue::Address(addr), &self.memory);
        }
        self.contend(addr, 3);
        self.memory.read(addr)
    }

    /// CPU data write: breakpoints, contention, 3 tstates
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if self.debugger.active() {
            self.debugger.check(
                BreakpointKind::Write,
                CheckValue::Address(addr),
                &self.memory,
            );
        }
        self.contend(addr, 3);
        self.memory.write(addr, value);
    }

    /// M1 opcode fetch: contention plus the 4-tstate fetch, no read
    /// breakpoints (matching the hardware's opcode/data distinction)
    pub fn fetch_opcode(&mut self, pc: u16) -> u8 {
        self.contend(pc, 4);
        self.memory.read(pc)
    }

    /// Debugger/interrupt-push access: no breakpoints, no contention
    pub fn read_internal(&self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    pub fn write_internal(&mut self, addr: u16, value: u8) {
        self.memory.write(addr, value);
    }

    // ========== Port I/O ==========

    fn contend_port_early(&mut self, port: u16) {
        if self.memory.is_contended(port) {
            self.tstates += self.spec.contention_delay(self.tstates);
        }
        self.tstates += 1;
    }

    fn contend_port_late(&mut self, port: u16) {
        if self.spec.port_from_ula(port) {
            // One contended access covering the remaining three tstates
            self.tstates += self.spec.contention_delay(self.tstates);
            self.tstates += 2;
        } else if self.memory.is_contended(port) {
            // Three separately contended accesses
            for _ in 0..3 {
                self.tstates += self.spec.contention_delay(self.tstates);
                self.tstates += 1;
            }
            self.tstates -= 1;
        } else {
            self.tstates += 2;
        }
    }

    /// IN: full timing, breakpoints, floating bus for unattached ports
    pub fn read_port(&mut self, port: u16) -> u8 {
        self.contend_port_early(port);
        if self.debugger.active() {
            self.debugger.check(
                BreakpointKind::PortRead,
                CheckValue::Port(port),
                &self.memory,
            );
        }
        let value = self.read_port_internal(port);
        self.contend_port_late(port);
        self.tstates += 1;
        value
    }

    /// OUT: full timing and breakpoints
    pub fn write_port(&mut self, port: u16, value: u8) {
        self.contend_port_early(port);
        if self.debugger.active() {
            self.debugger.check(
                BreakpointKind::PortWrite,
                CheckValue::Port(port),
                &self.memory,
            );
        }
        self.write_port_internal(port, value);
        self.contend_port_late(port);
        self.tstates += 1;
    }

    fn matched_devices(&self, port: u16) -> ([Option<DeviceId>; 8], usize) {
        let mut matched = [None; 8];
        let mut count = 0;
        for device in self.peripherals.matches(port) {
            if count < matched.len() {
                matched[count] = Some(device);
                count += 1;
            }
        }
        (matched, count)
    }

    /// Port read without timing or breakpoints (debugger helper).
    /// Attached devices drive the bus open-collector; with none, the
    /// machine's floating bus supplies the byte.
    pub fn read_port_internal(&mut self, port: u16) -> u8 {
        let (matched, count) = self.matched_devices(port);
        let mut value = 0xFF;
        let mut attached = false;

        for device in matched.iter().take(count).flatten() {
            if let Some(driven) = self.device_read(*device, port) {
                value &= driven;
                attached = true;
            }
        }

        if attached {
            value
        } else {
            self.unattached_port()
        }
    }

    /// Port write without timing or breakpoints (debugger helper)
    pub fn write_port_internal(&mut self, port: u16, value: u8) {
        let (matched, count) = self.matched_devices(port);
        for device in matched.iter().take(count).flatten() {
            self.device_write(*device, port, value);
        }
    }

    fn ide_register(port: u16) -> IdeRegister {
        match port & 0xFF {
            0xA3 => IdeRegister::Data,
            0xA7 => IdeRegister::ErrorFeature,
            0xAB => IdeRegister::SectorCount,
            0xAF => IdeRegister::Sector,
            0xB3 => IdeRegister::CylinderLow,
            0xB7 => IdeRegister::CylinderHigh,
            0xBB => IdeRegister::HeadDrive,
            _ => IdeRegister::CommandStatus,
        }
    }

    fn device_read(&mut self, device: DeviceId, port: u16) -> Option<u8> {
        match device {
            DeviceId::Ula => Some(self.peripherals.ula.read(port)),
            DeviceId::Kempston => Some(self.peripherals.kempston.read()),
            DeviceId::AyRegister => Some(self.peripherals.ay.read_register()),
            DeviceId::AyData => None,
            DeviceId::Memory128 | DeviceId::MemoryPlus3 => None,
            DeviceId::ScldHsr => Some(self.peripherals.scld.hsr),
            DeviceId::ScldDec => Some(self.peripherals.scld.dec),
            DeviceId::DivIdeIde => Some(self.ide.read(Self::ide_register(port))),
            DeviceId::DivIdeControl => None,
            DeviceId::If1 => Some(self.peripherals.if1.port_in(port)),
            DeviceId::PlusDCommandStatus => Some(self.peripherals.plusd.sr_read()),
            DeviceId::PlusDTrack => Some(self.peripherals.plusd.fdc.tr_read()),
            DeviceId::PlusDSector => Some(self.peripherals.plusd.fdc.sec_read()),
            DeviceId::PlusDData => Some(self.peripherals.plusd.dr_read()),
            DeviceId::PlusDControl => None,
            DeviceId::PlusDPatch => {
                // Reading the patch port pages the +D in but does not
                // drive the bus
                self.plusd_page(true);
                None
            }
            DeviceId::PlusDPrinter => Some(self.peripherals.plusd.printer_read()),
            DeviceId::BetaCommandStatus => Some(self.peripherals.beta128.sr_read()),
            DeviceId::BetaTrack => Some(self.peripherals.beta128.fdc.tr_read()),
            DeviceId::BetaSector => Some(self.peripherals.beta128.fdc.sec_read()),
            DeviceId::BetaData => Some(self.peripherals.beta128.dr_read()),
            DeviceId::BetaSystem => Some(self.peripherals.beta128.system_read()),
        }
    }

    fn device_write(&mut self, device: DeviceId, port: u16, value: u8) {
        match device {
            DeviceId::Ula => self.peripherals.ula.write(value),
            DeviceId::Kempston => {}
            DeviceId::AyRegister => self.peripherals.ay.select_register(value),
            DeviceId::AyData => self.peripherals.ay.write_register(value),
            DeviceId::Memory128 => self.memory128_write(value),
            DeviceId::MemoryPlus3 => self.memory_plus3_write(value),
            DeviceId::ScldHsr => {
                self.peripherals.scld.hsr = value;
                self.memory_map();
            }
            DeviceId::ScldDec => {
                self.peripherals.scld.dec = value;
                self.memory_map();
            }
            DeviceId::DivIdeIde => self.ide.write(Self::ide_register(port), value),
            DeviceId::DivIdeControl => {
                let was_active = self.peripherals.divide.active();
                self.peripherals.divide.control_write(value);
                self.divide_track_paging(was_active);
            }
            DeviceId::If1 => self.peripherals.if1.port_out(port, value),
            DeviceId::PlusDCommandStatus => {
                if let Some(ms) = self.peripherals.plusd.cr_write(value) {
                    let at = self.after_ms(ms);
                    self.events.add(at, EventKind::CmdDone, page_event::PLUSD);
                }
            }
            DeviceId::PlusDTrack => self.peripherals.plusd.fdc.tr_write(value),
            DeviceId::PlusDSector => self.peripherals.plusd.fdc.sec_write(value),
            DeviceId::PlusDData => self.peripherals.plusd.dr_write(value),
            DeviceId::PlusDControl => self.peripherals.plusd.cn_write(value),
            DeviceId::PlusDPatch => self.plusd_page(false),
            DeviceId::PlusDPrinter => {}
            DeviceId::BetaCommandStatus => {
                if let Some(ms) = self.peripherals.beta128.cr_write(value) {
                    let at = self.after_ms(ms);
                    self.events.add(at, EventKind::CmdDone, page_event::BETA128);
                }
            }
            DeviceId::BetaTrack => self.peripherals.beta128.fdc.tr_write(value),
            DeviceId::BetaSector => self.peripherals.beta128.fdc.sec_write(value),
            DeviceId::BetaData => self.peripherals.beta128.dr_write(value),
            DeviceId::BetaSystem => self.peripherals.beta128.system_write(value),
        }
    }

    /// Tstate `ms` milliseconds from now
    pub fn after_ms(&self, ms: u32) -> u32 {
        self.tstates + ms * self.spec.cycles_per_ms()
    }

    // ========== Paging ports ==========

    fn memory128_write(&mut self, value: u8) {
        // Bit 5 locks paging until hard reset
        if self.peripherals.paging.locked {
            return;
        }
        self.peripherals.paging.last_7ffd = value;
        self.memory_map();
        self.peripherals.paging.locked = value & 0x20 != 0;
    }

    fn memory_plus3_write(&mut self, value: u8) {
        if self.peripherals.paging.locked {
            return;
        }
        self.peripherals.paging.last_1ffd = value;
        self.memory_map();
    }

    /// Page or unpage the +D and rebuild the map
    pub fn plusd_page(&mut self, page: bool) {
        if !self.peripherals.plusd.enabled {
            return;
        }
        let was = self.peripherals.plusd.paged();
        if page {
            self.peripherals.plusd.page();
        } else {
            self.peripherals.plusd.unpage();
        }
        if was != self.peripherals.plusd.paged() {
            let kind = if page {
                EventKind::Page
            } else {
                EventKind::Unpage
            };
            self.events.add(self.tstates, kind, page_event::PLUSD);
        }
        self.memory_map();
    }

    /// DivIDE automap notification from the opcode-fetch hooks
    pub fn divide_set_automap(&mut self, state: bool) {
        if !self.peripherals.divide.enabled {
            return;
        }
        let was_active = self.peripherals.divide.active();
        self.peripherals.divide.set_automap(state);
        self.divide_track_paging(was_active);
    }

    fn divide_track_paging(&mut self, was_active: bool) {
        let active = self.peripherals.divide.active();
        if active != was_active {
            let kind = if active {
                EventKind::Page
            } else {
                EventKind::Unpage
            };
            self.events.add(self.tstates, kind, page_event::DIVIDE);
        }
        self.memory_map();
    }

    pub fn if1_page(&mut self, page: bool) {
        if !self.peripherals.if1.enabled {
            return;
        }
        let was = self.peripherals.if1.paged();
        if page {
            self.peripherals.if1.page();
        } else {
            self.peripherals.if1.unpage();
        }
        if was != self.peripherals.if1.paged() {
            let kind = if page {
                EventKind::Page
            } else {
                EventKind::Unpage
            };
            self.events.add(self.tstates, kind, page_event::IF1);
        }
        self.memory_map();
    }

    pub fn beta128_page(&mut self, page: bool) {
        if !self.peripherals.beta128.available() {
            return;
        }
        let was = self.peripherals.beta128.paged();
        if page {
            self.peripherals.beta128.page();
        } else {
            self.peripherals.beta128.unpage();
        }
        if was != self.peripherals.beta128.paged() {
            let kind = if page {
                EventKind::Page
            } else {
                EventKind::Unpage
            };
            self.events.add(self.tstates, kind, page_event::BETA128);
        }
        self.memory_map();
    }

    // ========== Memory map composition ==========

    /// Rebuild the eight slots: machine base map, Timex DOCK/EXROM
    /// substitution, then at most one ROMCS override of slots 0-1
    pub fn memory_map(&mut self) {
        self.map_home();

        for slot in 0..8 {
            let view = self.memory.home[slot];
            self.memory.set_slot(slot, view);
        }

        if self.spec.timex {
            for slot in 0..8 {
                if self.peripherals.scld.chunk_alternate(slot) {
                    let view = if self.peripherals.scld.exrom_selected() {
                        self.memory.exrom[slot]
                    } else {
                        self.memory.dock[slot]
                    };
                    self.memory.set_slot(slot, view);
                }
            }
        }

        self.map_romcs();
    }

    fn map_home(&mut self) {
        let last_7ffd = self.peripherals.paging.last_7ffd;
        let last_1ffd = self.peripherals.paging.last_1ffd;

        match self.spec.paging {
            Paging::None => {
                self.memory.home_rom(0, 0);
                self.memory.home_ram(2, 5, self.spec.ram_page_contended(5));
                self.memory.home_ram(4, 2, self.spec.ram_page_contended(2));
                self.memory.home_ram(6, 0, self.spec.ram_page_contended(0));
            }
            Paging::Spec128 => {
                let page = (last_7ffd & 0x07) as usize;
                let rom = ((last_7ffd >> 4) & 1) as usize;
                self.memory.home_rom(0, rom);
                self.memory.home_ram(2, 5, self.spec.ram_page_contended(5));
                self.memory.home_ram(4, 2, self.spec.ram_page_contended(2));
                self.memory
                    .home_ram(6, page, self.spec.ram_page_contended(page));
                self.memory
                    .select_screen(if last_7ffd & 0x08 != 0 { 7 } else { 5 });
            }
            Paging::Plus3 => {
                if last_1ffd & 0x01 != 0 {
                    // Special all-RAM configurations
                    let config = PLUS3_SPECIAL[((last_1ffd >> 1) & 3) as usize];
                    for (slot, &page) in config.iter().enumerate() {
                        self.memory
                            .home_ram(slot * 2, page, self.spec.ram_page_contended(page));
                    }
                } else {
                    let page = (last_7ffd & 0x07) as usize;
                    let rom = (((last_7ffd >> 4) & 1) | ((last_1ffd >> 1) & 2)) as usize;
                    self.memory.home_rom(0, rom);
                    self.memory.home_ram(2, 5, self.spec.ram_page_contended(5));
                    self.memory.home_ram(4, 2, self.spec.ram_page_contended(2));
                    self.memory
                        .home_ram(6, page, self.spec.ram_page_contended(page));
                }
                self.memory
                    .select_screen(if last_7ffd & 0x08 != 0 { 7 } else { 5 });
            }
            Paging::Scorpion => {
                // Bit 4 of 0x1FFD selects the second 128K of RAM
                let page = (last_7ffd & 0x07) as usize | ((last_1ffd as usize & 0x10) >> 1);
                if last_1ffd & 0x01 != 0 {
                    self.memory.home_ram(0, 0, false);
                } else if last_1ffd & 0x02 != 0 {
                    // Service ROM
                    self.memory.home_rom(0, 2);
                } else {
                    let rom = ((last_7ffd >> 4) & 1) as usize;
                    self.memory.home_rom(0, rom);
                }
                self.memory.home_ram(2, 5, false);
                self.memory.home_ram(4, 2, false);
                self.memory.home_ram(6, page, false);
                self.memory
                    .select_screen(if last_7ffd & 0x08 != 0 { 7 } else { 5 });
            }
        }
    }

    /// Exactly one ROMCS source may drive slots 0-1 at a time
    fn map_romcs(&mut self) {
        if self.peripherals.divide.enabled && self.peripherals.divide.active() {
            let pages = self.peripherals.divide.romcs_pages();
            self.memory.set_slot(0, pages[0]);
            self.memory.set_slot(1, pages[1]);
        } else if let Some(pages) = self.peripherals.plusd.romcs_pages() {
            self.memory.set_slot(0, pages[0]);
            self.memory.set_slot(1, pages[1]);
        } else if let Some(pages) = self.peripherals.beta128.romcs_pages() {
            self.memory.set_slot(0, pages[0]);
            self.memory.set_slot(1, pages[1]);
        } else if let Some(page) = self.peripherals.if1.romcs_page() {
            self.memory.set_slot(0, page);
        } else if let Some(pages) = self.peripherals.if2.romcs_pages() {
            self.memory.set_slot(0, pages[0]);
            self.memory.set_slot(1, pages[1]);
        }
    }

    // ========== Floating bus ==========

    /// What an unattached port read returns: the byte the ULA is
    /// fetching from screen memory this tstate, or 0xFF outside the
    /// display (and on machines whose gate array does not leak it)
    pub fn unattached_port(&self) -> u8 {
        let base = match (self.spec.floating_bus, self.spec.contention_base) {
            (FloatingBus::Sinclair, Some(base)) => base,
            _ => return 0xFF,
        };
        if self.tstates < base {
            return 0xFF;
        }
        let since = self.tstates - base;
        let line = since / self.spec.line_tstates;
        let col = since % self.spec.line_tstates;
        if line >= self.spec.display_lines || col >= 128 {
            return 0xFF;
        }

        // Each eight tstates the ULA fetches two display and two
        // attribute bytes for a pair of character columns
        let column = ((col >> 3) * 2) as usize;
        let data_offset = |column: usize| -> usize {
            (((line as usize) & 0xC0) << 5)
                | (((line as usize) & 0x07) << 8)
                | (((line as usize) & 0x38) << 2)
                | column
        };
        let attr_offset =
            |column: usize| -> usize { 0x1800 + ((line as usize) >> 3) * 32 + column };

        match col & 7 {
            0 => self.memory.screen_byte(data_offset(column)),
            1 => self.memory.screen_byte(attr_offset(column)),
            2 => self.memory.screen_byte(data_offset(column + 1)),
            3 => self.memory.screen_byte(attr_offset(column + 1)),
            _ => 0xFF,
        }
    }

    // ========== Reset ==========

    pub fn reset(&mut self, hard_reset: bool) {
        self.tstates = 0;
        self.events.clear();
        let memory = &mut self.memory;
        self.peripherals.reset(hard_reset, memory);
        if hard_reset {
            self.memory.clear_ram();
        }
        self.memory_map();
    }
}
