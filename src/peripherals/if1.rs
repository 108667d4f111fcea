//! Interface I and its microdrives
//!
//! The IF1 shadow ROM (8 KiB) pages over slot 0 when the ROM hooks at
//! 0x0008 or 0x1708 are fetched and pages out again at 0x0700. Ports are
//! decoded from address bits 3 and 4: microdrive data, control and
//! network/RS232.
//!
//! Up to eight microdrives hang off the control register's motor chain: a
//! falling edge on the comms-clock bit shifts the chain one position and
//! loads the inverted comms-data bit into drive 1's motor.

use crate::media::mdr::{MdrCartridge, CARTRIDGE_LEN};
use crate::memory::{Memory, MemorySource, PageId, PageView, PAGE_SIZE};

/// Decoded IF1 port groups (address bits 3-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum If1Port {
    /// Microdrive head data
    Mdr,
    /// Microdrive/RS232 control and status
    Control,
    /// Network / RS232 data
    Network,
    Unknown,
}

pub fn decode_port(port: u16) -> If1Port {
    match port & 0x0018 {
        0x0000 => If1Port::Mdr,
        0x0008 => If1Port::Control,
        0x0010 => If1Port::Network,
        _ => If1Port::Unknown,
    }
}

/// Gap/sync run lengths presented on the control port
const GAP_RUN: u8 = 15;

/// One microdrive unit
pub struct Microdrive {
    pub cartridge: Option<MdrCartridge>,
    pub motor_on: bool,
    head_pos: usize,
    /// Bytes moved past the head since the last control-port access
    transferred: usize,
    /// Block length the head is currently over (15 header / 528 data)
    max_bytes: usize,
    gap: u8,
    nogap: u8,
    last: u8,
}

impl Microdrive {
    fn new() -> Self {
        Microdrive {
            cartridge: None,
            motor_on: false,
            head_pos: 0,
            transferred: 0,
            max_bytes: GAP_RUN as usize,
            gap: GAP_RUN,
            nogap: GAP_RUN,
            last: 0xFF,
        }
    }

    fn running(&self) -> bool {
        self.motor_on && self.cartridge.is_some()
    }

    fn increment_head(&mut self) {
        self.head_pos += 1;
        if self.head_pos >= CARTRIDGE_LEN {
            self.head_pos = 0;
        }
    }

    /// Put the head at the start of a block and reset the byte counter
    fn restart(&mut self) {
        while self.head_pos % 543 != 0 && self.head_pos % 543 != 15 {
            self.increment_head();
        }
        self.transferred = 0;
        self.max_bytes = if self.head_pos % 543 == 0 { 15 } else { 528 };
    }
}

/// IF1 ULA line state
#[derive(Debug, Default)]
pub struct If1Ula {
    pub comms_data: bool,
    pub comms_clk: bool,
    pub cts: bool,
    pub wait: bool,
    pub busy: bool,
    pub dtr: bool,
    pub rx: bool,
}

pub struct If1 {
    pub enabled: bool,
    paged: bool,
    pub drives: [Microdrive; 8],
    pub ula: If1Ula,
    rom: Option<PageId>,
}

impl If1 {
    pub fn new() -> Self {
        If1 {
            enabled: false,
            paged: false,
            drives: core::array::from_fn(|_| Microdrive::new()),
            ula: If1Ula::default(),
            rom: None,
        }
    }

    pub fn reset(&mut self) {
        self.paged = false;
        for drive in &mut self.drives {
            drive.motor_on = false;
            drive.head_pos = 0;
            drive.gap = GAP_RUN;
            drive.nogap = GAP_RUN;
        }
        self.ula = If1Ula::default();
    }

    /// Load the 8 KiB shadow ROM
    pub fn load_rom(&mut self, memory: &mut Memory, data: &[u8]) {
        let page = self.rom.unwrap_or_else(|| memory.alloc_page(0xFF));
        let buf = memory.page_mut(page);
        buf.fill(0xFF);
        let n = data.len().min(PAGE_SIZE);
        buf[..n].copy_from_slice(&data[..n]);
        self.rom = Some(page);
    }

    pub fn paged(&self) -> bool {
        self.paged
    }

    pub fn page(&mut self) {
        if self.enabled && self.rom.is_some() {
            self.paged = true;
        }
    }

    pub fn unpage(&mut self) {
        self.paged = false;
    }

    /// Slot-0 override while the shadow ROM is paged
    pub fn romcs_page(&self) -> Option<PageView> {
        if !self.paged {
            return None;
        }
        self.rom.map(|page| PageView {
            page,
            writable: false,
            contended: false,
            source: MemorySource::Romcs,
            page_num: 0,
            offset: 0,
        })
    }

    pub fn insert_cartridge(&mut self, drive: usize, cartridge: MdrCartridge) {
        self.drives[drive & 7].cartridge = Some(cartridge);
    }

    pub fn eject_cartridge(&mut self, drive: usize) -> Option<MdrCartridge> {
        self.drives[drive & 7].cartridge.take()
    }

    /// IN on any IF1 port
    pub fn port_in(&mut self, port: u16) -> u8 {
        let mut value = 0xFF;
        match decode_port(port) {
            If1Port::Mdr => {
                for drive in self.drives.iter_mut().filter(|d| d.running()) {
                    if drive.transferred < drive.max_bytes {
                        let cartridge = drive.cartridge.as_ref().unwrap();
                        drive.last = cartridge.read(drive.head_pos);
                        drive.increment_head();
                    }
                    drive.transferred += 1;
                    value &= drive.last;
                }
            }
            If1Port::Control => {
                for drive in self.drives.iter_mut().filter(|d| d.running()) {
                    if drive.gap > 0 {
                        // GAP and SYNC read high
                        drive.gap -= 1;
                    } else {
                        value &= 0xF9;
                        if drive.nogap > 0 {
                            drive.nogap -= 1;
                        } else {
                            drive.gap = GAP_RUN;
                            drive.nogap = GAP_RUN;
                        }
                    }
                    if drive.cartridge.as_ref().unwrap().write_protect {
                        value &= 0xFE;
                    }
                }
                if !self.ula.dtr {
                    value &= 0xF7;
                }
                if !self.ula.busy {
                    value &= 0xEF;
                }
                self.restart_drives();
            }
            If1Port::Network => {
                // Serial and network lines idle without a host transport
                self.restart_drives();
            }
            If1Port::Unknown => {}
        }
        value
    }

    /// OUT on any IF1 port
    pub fn port_out(&mut self, port: u16, value: u8) {
        match decode_port(port) {
            If1Port::Mdr => {
                for drive in self.drives.iter_mut().filter(|d| d.running()) {
                    // The ULA swallows the 12-byte preamble before data
                    if drive.transferred > 11 && drive.transferred < drive.max_bytes + 12 {
                        let head_pos = drive.head_pos;
                        drive.cartridge.as_mut().unwrap().write(head_pos, value);
                        drive.increment_head();
                    }
                    drive.transferred += 1;
                }
            }
            If1Port::Control => {
                // Falling comms-clock edge rotates the motor chain
                if value & 0x02 == 0 && self.ula.comms_clk {
                    for m in (1..8).rev() {
                        self.drives[m].motor_on = self.drives[m - 1].motor_on;
                    }
                    self.drives[0].motor_on = value & 0x01 == 0;
                }
                self.ula.cts = value & 0x10 != 0;
                self.ula.wait = value & 0x20 != 0;
                self.ula.comms_data = value & 0x01 != 0;
                self.ula.comms_clk = value & 0x02 != 0;
                self.restart_drives();
            }
            If1Port::Network => {
                self.ula.rx = value & 0x01 != 0;
                self.restart_drives();
            }
            If1Port::Unknown => {}
        }
    }

    fn restart_drives(&mut self) {
        for drive in &mut self.drives {
            drive.restart();
        }
    }

    /// Index of the running drive, if exactly one motor is on
    pub fn selected_drive(&self) -> Option<usize> {
        let mut selected = None;
        for (m, drive) in self.drives.iter().enumerate() {
            if drive.motor_on {
                if selected.is_some() {
                    return None;
                }
                selected = Some(m);
            }
        }
        selected
    }
}

impl Default for If1 {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an M1 fetch of `pc` pages the IF1 shadow ROM in
pub fn is_page_hook(pc: u16) -> bool {
    pc == 0x0008 || pc == 0x1708
}

/// Whether an M1 fetch of `pc` pages the IF1 shadow ROM out
pub fn is_unpage_hook(pc: u16) -> bool {
    pc == 0x0700
}
