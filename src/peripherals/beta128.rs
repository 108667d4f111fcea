//! Beta 128 disk interface (TR-DOS)
//!
//! A WD1793 at ports 0x1F/0x3F/0x5F/0x7F with the system register at
//! 0xFF handling drive select, side select and density. The TR-DOS ROM
//! pages over slots 0 and 1 while the CPU executes inside 0x3Dxx with the
//! BASIC ROM selected, and pages out on any fetch at or above 0x4000.
//! Built in on the Pentagon and Scorpion, optional elsewhere.

use crate::disk::image::DiskImage;
use crate::disk::wd1770::{WdDrive, WdFdc, WdType};
use crate::memory::{Memory, MemorySource, PageId, PageView, PAGE_SIZE};

pub const NUM_DRIVES: usize = 4;

/// System register bits (port 0xFF)
pub mod system {
    /// Drive select field
    pub const DRIVE_MASK: u8 = 0x03;
    /// Held low to reset the FDC
    pub const RESET: u8 = 0x04;
    /// Head select, inverted (0 = side 1)
    pub const SIDE: u8 = 0x10;
    /// FM/MFM select
    pub const DENSITY: u8 = 0x40;
}

pub struct Beta128 {
    pub enabled: bool,
    paged: bool,
    pub fdc: WdFdc,
    pub drives: [WdDrive; NUM_DRIVES],
    current_drive: usize,
    pub system_register: u8,
    rom: Option<[PageId; 2]>,
}

impl Beta128 {
    pub fn new() -> Self {
        Beta128 {
            enabled: false,
            paged: false,
            fdc: WdFdc::new(WdType::Fd1793),
            drives: core::array::from_fn(|_| WdDrive::new()),
            current_drive: 0,
            system_register: 0,
            rom: None,
        }
    }

    pub fn reset(&mut self) {
        self.paged = false;
        self.current_drive = 0;
        self.system_register = 0;
        self.fdc.master_reset();
    }

    /// Load the 16 KiB TR-DOS ROM
    pub fn load_rom(&mut self, memory: &mut Memory, data: &[u8]) {
        let pages = self
            .rom
            .unwrap_or_else(|| [memory.alloc_page(0xFF), memory.alloc_page(0xFF)]);
        for (half, page) in pages.iter().enumerate() {
            let buf = memory.page_mut(*page);
            buf.fill(0xFF);
            let start = half * PAGE_SIZE;
            if data.len() > start {
                let n = (data.len() - start).min(PAGE_SIZE);
                buf[..n].copy_from_slice(&data[start..start + n]);
            }
        }
        self.rom = Some(pages);
    }

    pub fn available(&self) -> bool {
        self.enabled && self.rom.is_some()
    }

    pub fn paged(&self) -> bool {
        self.paged
    }

    pub fn page(&mut self) {
        if self.available() {
            self.paged = true;
        }
    }

    pub fn unpage(&mut self) {
        self.paged = false;
    }

    pub fn romcs_pages(&self) -> Option<[PageView; 2]> {
        if !self.paged {
            return None;
        }
        self.rom.map(|pages| {
            core::array::from_fn(|half| PageView {
                page: pages[half],
                writable: false,
                contended: false,
                source: MemorySource::Romcs,
                page_num: half as u8,
                offset: (half * PAGE_SIZE) as u16,
            })
        })
    }

    pub fn insert_disk(&mut self, drive: usize, disk: DiskImage) {
        self.drives[drive % NUM_DRIVES].disk = Some(disk);
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<DiskImage> {
        self.drives[drive % NUM_DRIVES].disk.take()
    }

    pub fn sr_read(&mut self) -> u8 {
        let drive = &self.drives[self.current_drive];
        self.fdc.sr_read(drive)
    }

    pub fn cr_write(&mut self, value: u8) -> Option<u32> {
        self.fdc.cr_write(&mut self.drives[self.current_drive], value)
    }

    pub fn dr_read(&mut self) -> u8 {
        self.fdc.dr_read(&mut self.drives[self.current_drive])
    }

    pub fn dr_write(&mut self, value: u8) {
        self.fdc.dr_write(&mut self.drives[self.current_drive], value);
    }

    pub fn cmd_done(&mut self) {
        self.fdc.cmd_done(&mut self.drives[self.current_drive]);
    }

    /// System register write (port 0xFF)
    pub fn system_write(&mut self, value: u8) {
        self.system_register = value;
        self.current_drive = (value & system::DRIVE_MASK) as usize;
        let side = if value & system::SIDE == 0 { 1 } else { 0 };
        for drive in &mut self.drives {
            drive.side = side;
        }
        self.fdc.dden = value & system::DENSITY == 0;
        if value & system::RESET == 0 {
            self.fdc.master_reset();
        }
    }

    /// System register read: INTRQ on bit 7, DRQ on bit 6
    pub fn system_read(&self) -> u8 {
        let mut value = 0x3F;
        if self.fdc.intrq {
            value |= 0x80;
        }
        if self.fdc.datarq {
            value |= 0x40;
        }
        value
    }
}

impl Default for Beta128 {
    fn default() -> Self {
        Self::new()
    }
}
