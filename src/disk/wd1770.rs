//! WD1770-family floppy disk controller
//!
//! Type I commands (RESTORE, SEEK, STEP and variants) move the head and
//! maintain the track register; Type II (READ/WRITE SECTOR) and Type III
//! (READ ADDRESS, READ TRACK, WRITE TRACK) search for address marks and
//! stream bytes through the data register under DRQ. Command phases
//! complete asynchronously: the caller schedules a CmdDone event after the
//! returned latency and calls [`WdFdc::cmd_done`] when it fires, so the
//! CPU-facing registers stay live while BUSY is set.

use bitflags::bitflags;

use crate::disk::image::DiskImage;

bitflags! {
    /// Status register. Bits 1 and 2 are INDEX/TRACK0 for Type I status
    /// and DRQ/LOST for Type II/III; bit 5 is SPINUP (Type I) or
    /// RECORDTYPE (Type II/III).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const MOTORON = 1 << 7;
        const WRPROT = 1 << 6;
        const SPINUP = 1 << 5;
        const RNF = 1 << 4;
        const CRCERR = 1 << 3;
        const LOST = 1 << 2;
        const IDX_DRQ = 1 << 1;
        const BUSY = 1 << 0;
    }
}

/// Controller variants; they differ in step rates and spin-up handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdType {
    Wd1770,
    Wd1772,
    Wd1773,
    Fd1793,
}

/// Command phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Seek,
    SeekDelay,
    Verify,
    Read,
    Write,
    ReadTrack,
    WriteTrack,
    ReadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusType {
    Type1,
    Type2,
}

/// One drive attached to the controller
pub struct WdDrive {
    pub disk: Option<DiskImage>,
    /// Physical head position
    pub track: u8,
    /// Selected side (from the interface's control register)
    pub side: u8,
    pub motor_on: bool,
    pub index_pulse: bool,
    /// Raise INTRQ on the next index-pulse falling edge
    pub index_interrupt: bool,
}

impl WdDrive {
    pub fn new() -> Self {
        WdDrive {
            disk: None,
            track: 0,
            side: 0,
            motor_on: false,
            index_pulse: false,
            index_interrupt: false,
        }
    }
}

impl Default for WdDrive {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-CCITT, polynomial 0x1021, as the controller computes over every
/// byte in the current address-mark window
pub fn crc_add(mut crc: u16, byte: u8) -> u16 {
    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ 0x1021;
        } else {
            crc <<= 1;
        }
    }
    crc
}

fn id_crc(track: u8, side: u8, sector: u8, length_code: u8) -> u16 {
    let mut crc = 0xCDB4; // CCITT preset after the three 0xA1 marks
    for byte in [0xFE, track, side, sector, length_code] {
        crc = crc_add(crc, byte);
    }
    crc
}

/// Disk revolution time at 300 rpm
const REV_MS: u32 = 200;

/// Revolutions searched before Record Not Found
const SEARCH_REVS: u32 = 5;

pub struct WdFdc {
    pub wd_type: WdType,
    /// 0 = spindlewards, 1 = rimwards
    pub direction: i8,
    /// SD/DD select (FM/MFM)
    pub dden: bool,
    pub intrq: bool,
    pub datarq: bool,
    pub head_load: bool,

    state: State,
    status_type: StatusType,

    pub command_register: u8,
    pub status_register: Status,
    pub track_register: u8,
    pub sector_register: u8,
    pub data_register: u8,
    /// CRC accumulated over the current address-mark window
    pub crc: u16,

    /// Byte stream for the active Type II/III transfer
    buffer: Vec<u8>,
    buffer_pos: usize,
    multisector: bool,
}

impl WdFdc {
    pub fn new(wd_type: WdType) -> Self {
        WdFdc {
            wd_type,
            direction: 1,
            dden: true,
            intrq: false,
            datarq: false,
            head_load: false,
            state: State::None,
            status_type: StatusType::Type1,
            command_register: 0,
            status_register: Status::empty(),
            track_register: 0,
            sector_register: 1,
            data_register: 0,
            crc: 0xFFFF,
            buffer: Vec::new(),
            buffer_pos: 0,
            multisector: false,
        }
    }

    /// Milliseconds per step for the command's rate field
    fn step_rate_ms(&self, command: u8) -> u32 {
        let rates: [u32; 4] = match self.wd_type {
            WdType::Wd1772 => [2, 3, 5, 6],
            _ => [6, 12, 20, 30],
        };
        rates[(command & 0x03) as usize]
    }

    pub fn master_reset(&mut self) {
        self.state = State::None;
        self.status_type = StatusType::Type1;
        self.status_register = Status::empty();
        self.command_register = 0;
        self.track_register = 0;
        self.sector_register = 1;
        self.data_register = 0;
        self.direction = 1;
        self.intrq = false;
        self.datarq = false;
        self.buffer.clear();
        self.buffer_pos = 0;
        self.multisector = false;
    }

    pub fn busy(&self) -> bool {
        self.status_register.contains(Status::BUSY)
    }

    /// Status register read; clears INTRQ
    pub fn sr_read(&mut self, drive: &WdDrive) -> u8 {
        self.intrq = false;

        let mut status = self.status_register;
        status.set(Status::MOTORON, drive.motor_on);

        if self.status_type == StatusType::Type1 {
            // Bits 1/2 are INDEX and TRACK0 in Type I status
            status.remove(Status::IDX_DRQ | Status::LOST);
            status.set(Status::IDX_DRQ, drive.index_pulse);
            status.set(Status::LOST, drive.track == 0);
            status.set(
                Status::WRPROT,
                drive.disk.as_ref().map_or(false, |d| d.write_protect),
            );
        }

        status.bits()
    }

    pub fn tr_read(&self) -> u8 {
        self.track_register
    }

    pub fn tr_write(&mut self, value: u8) {
        if !self.busy() {
            self.track_register = value;
        }
    }

    pub fn sec_read(&self) -> u8 {
        self.sector_register
    }

    pub fn sec_write(&mut self, value: u8) {
        if !self.busy() {
            self.sector_register = value;
        }
    }

    /// Command register write. Returns the latency in milliseconds after
    /// which the caller must deliver [`WdFdc::cmd_done`], if the command
    /// started an asynchronous phase.
    pub fn cr_write(&mut self, drive: &mut WdDrive, command: u8) -> Option<u32> {
        // Force interrupt is accepted even while busy
        if command & 0xF0 == 0xD0 {
            self.force_interrupt(drive, command);
            return None;
        }
        if self.busy() {
            return None;
        }

        self.command_register = command;
        self.intrq = false;
        drive.motor_on = true;

        match command >> 5 {
            // Type I: RESTORE / SEEK / STEP / STEP-IN / STEP-OUT
            0..=3 => Some(self.start_type1(drive, command)),
            // Type II: READ / WRITE SECTOR
            4 | 5 => self.start_type2(drive, command),
            // Type III: READ ADDRESS / READ TRACK / WRITE TRACK
            _ => self.start_type3(drive, command),
        }
    }

    fn start_type1(&mut self, drive: &mut WdDrive, command: u8) -> u32 {
        self.status_type = StatusType::Type1;
        self.status_register = Status::BUSY;
        self.state = State::Seek;
        self.datarq = false;

        let rate = self.step_rate_ms(command);
        let steps: u32;

        match command >> 4 {
            0x0 => {
                // RESTORE: home the head
                steps = drive.track.max(1) as u32;
                drive.track = 0;
                self.track_register = 0;
                self.direction = -1;
            }
            0x1 => {
                // SEEK: move until track register equals data register
                let from = self.track_register as i16;
                let to = self.data_register as i16;
                steps = (from - to).unsigned_abs() as u32;
                self.direction = if to < from { -1 } else { 1 };
                let physical = drive.track as i16 + (to - from);
                drive.track = physical.clamp(0, 83) as u8;
                self.track_register = self.data_register;
            }
            step => {
                // STEP (0x2/0x3), STEP-IN (0x4/0x5), STEP-OUT (0x6/0x7)
                match step {
                    0x4 | 0x5 => self.direction = 1,
                    0x6 | 0x7 => self.direction = -1,
                    _ => {}
                }
                steps = 1;
                let physical = drive.track as i16 + self.direction as i16;
                drive.track = physical.clamp(0, 83) as u8;
                // u flag: update the track register with the head
                if command & 0x10 != 0 {
                    self.track_register =
                        (self.track_register as i16 + self.direction as i16).clamp(0, 255) as u8;
                }
            }
        }

        steps.max(1) * rate
    }

    fn start_type2(&mut self, drive: &mut WdDrive, command: u8) -> Option<u32> {
        self.status_type = StatusType::Type2;
        self.datarq = false;
        self.multisector = command & 0x10 != 0;

        let writing = command & 0x20 != 0;
        if writing && drive.disk.as_ref().map_or(false, |d| d.write_protect) {
            self.status_register = Status::WRPROT;
            self.intrq = true;
            self.state = State::None;
            return None;
        }

        self.status_register = Status::BUSY;
        self.state = if writing { State::Write } else { State::Read };

        let found = drive.disk.as_ref().map_or(false, |disk| {
            disk.has_sector(drive.track, drive.side, self.sector_register)
        });
        if found {
            // ID search: model as a few milliseconds into the revolution
            Some(2)
        } else {
            Some(SEARCH_REVS * REV_MS)
        }
    }

    fn start_type3(&mut self, drive: &mut WdDrive, command: u8) -> Option<u32> {
        self.status_type = StatusType::Type2;
        self.datarq = false;
        self.status_register = Status::BUSY;

        match command >> 4 {
            0xC => {
                self.state = State::ReadId;
                if drive.disk.is_some() {
                    Some(2)
                } else {
                    Some(SEARCH_REVS * REV_MS)
                }
            }
            0xE => {
                self.state = State::ReadTrack;
                Some(2)
            }
            _ => {
                // WRITE TRACK
                if drive.disk.as_ref().map_or(true, |d| d.write_protect) {
                    self.status_register = Status::WRPROT;
                    self.intrq = true;
                    self.state = State::None;
                    return None;
                }
                self.state = State::WriteTrack;
                self.buffer.clear();
                self.buffer_pos = 0;
                self.datarq = true;
                self.status_register.insert(Status::IDX_DRQ);
                // One revolution accepts the raw track
                Some(REV_MS)
            }
        }
    }

    fn force_interrupt(&mut self, drive: &mut WdDrive, command: u8) {
        let was_busy = self.busy();
        self.state = State::None;
        self.status_register.remove(Status::BUSY);
        self.datarq = false;
        if !was_busy {
            self.status_type = StatusType::Type1;
        }
        if command & 0x04 != 0 {
            // Interrupt on next index pulse
            drive.index_interrupt = true;
        }
        if command & 0x08 != 0 {
            // Immediate interrupt
            self.intrq = true;
        }
    }

    /// Deliver a matured CmdDone event
    pub fn cmd_done(&mut self, drive: &mut WdDrive) {
        match self.state {
            State::None => {}

            State::Seek | State::SeekDelay | State::Verify => {
                self.status_register.remove(Status::BUSY);
                self.status_register.insert(Status::SPINUP);
                // V flag: verify the ID on the new track
                if self.command_register & 0x04 != 0 {
                    let ok = drive.disk.is_some() && self.track_register == drive.track;
                    self.status_register.set(Status::RNF, !ok);
                }
                self.state = State::None;
                self.intrq = true;
            }

            State::Read => {
                match self.sector_bytes(drive) {
                    Some(bytes) => {
                        self.buffer = bytes;
                        self.buffer_pos = 0;
                        self.datarq = true;
                        self.status_register.insert(Status::IDX_DRQ);
                    }
                    None => self.finish_rnf(),
                }
            }

            State::Write => {
                if drive.disk.as_ref().map_or(false, |disk| {
                    disk.has_sector(drive.track, drive.side, self.sector_register)
                }) {
                    let len = drive
                        .disk
                        .as_ref()
                        .map(|d| d.geometry().sector_size)
                        .unwrap_or(512);
                    self.buffer = Vec::with_capacity(len);
                    self.buffer_pos = len;
                    self.datarq = true;
                    self.status_register.insert(Status::IDX_DRQ);
                } else {
                    self.finish_rnf();
                }
            }

            State::ReadId => match self.read_id_bytes(drive) {
                Some(bytes) => {
                    // The ID's track address lands in the sector register
                    self.sector_register = drive.track;
                    self.buffer = bytes;
                    self.buffer_pos = 0;
                    self.datarq = true;
                    self.status_register.insert(Status::IDX_DRQ);
                }
                None => self.finish_rnf(),
            },

            State::ReadTrack => match self.raw_track_bytes(drive) {
                Some(bytes) => {
                    self.buffer = bytes;
                    self.buffer_pos = 0;
                    self.datarq = true;
                    self.status_register.insert(Status::IDX_DRQ);
                }
                None => self.finish_rnf(),
            },

            State::WriteTrack => {
                let written = std::mem::take(&mut self.buffer);
                self.format_from_raw(drive, &written);
                self.finish_ok();
            }
        }
    }

    fn sector_bytes(&self, drive: &WdDrive) -> Option<Vec<u8>> {
        let disk = drive.disk.as_ref()?;
        disk.sector(drive.track, drive.side, self.sector_register)
            .ok()
            .map(|s| s.to_vec())
    }

    fn read_id_bytes(&mut self, drive: &WdDrive) -> Option<Vec<u8>> {
        let disk = drive.disk.as_ref()?;
        let geometry = disk.geometry();
        if drive.track >= geometry.tracks {
            return None;
        }
        let crc = id_crc(
            drive.track,
            drive.side,
            geometry.first_sector,
            geometry.length_code(),
        );
        self.crc = crc;
        Some(vec![
            drive.track,
            drive.side,
            geometry.first_sector,
            geometry.length_code(),
            (crc >> 8) as u8,
            crc as u8,
        ])
    }

    /// Synthesize one revolution of raw MFM track data
    fn raw_track_bytes(&self, drive: &WdDrive) -> Option<Vec<u8>> {
        let disk = drive.disk.as_ref()?;
        let geometry = disk.geometry();
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0x4E; 10]);
        for n in 0..geometry.sectors_per_track {
            let sector = geometry.first_sector + n;
            let data = disk.sector(drive.track, drive.side, sector).ok()?;

            raw.extend_from_slice(&[0x00; 12]);
            raw.extend_from_slice(&[0xA1, 0xA1, 0xA1, 0xFE]);
            raw.extend_from_slice(&[
                drive.track,
                drive.side,
                sector,
                geometry.length_code(),
            ]);
            let crc = id_crc(drive.track, drive.side, sector, geometry.length_code());
            raw.extend_from_slice(&[(crc >> 8) as u8, crc as u8]);
            raw.extend_from_slice(&[0x4E; 22]);

            raw.extend_from_slice(&[0x00; 12]);
            raw.extend_from_slice(&[0xA1, 0xA1, 0xA1, 0xFB]);
            let mut crc = 0xCDB4;
            crc = crc_add(crc, 0xFB);
            for &byte in data {
                crc = crc_add(crc, byte);
            }
            raw.extend_from_slice(data);
            raw.extend_from_slice(&[(crc >> 8) as u8, crc as u8]);
            raw.extend_from_slice(&[0x4E; 24]);
        }
        Some(raw)
    }

    /// Interpret a written raw track: every 0xFE ID mark names a sector,
    /// the following 0xFB data mark carries its contents
    fn format_from_raw(&mut self, drive: &mut WdDrive, raw: &[u8]) {
        let disk = match drive.disk.as_mut() {
            Some(disk) => disk,
            None => return,
        };
        let sector_size = disk.geometry().sector_size;

        let mut i = 0;
        let mut current_id: Option<u8> = None;
        while i < raw.len() {
            match raw[i] {
                0xFE if i + 4 < raw.len() => {
                    current_id = Some(raw[i + 3]);
                    self.crc = id_crc(raw[i + 1], raw[i + 2], raw[i + 3], raw[i + 4]);
                    i += 5;
                }
                0xFB => {
                    if let Some(id) = current_id.take() {
                        let start = i + 1;
                        let end = (start + sector_size).min(raw.len());
                        if let Ok(sector) = disk.sector_mut(drive.track, drive.side, id) {
                            let n = end - start;
                            sector[..n].copy_from_slice(&raw[start..end]);
                            if n < sector_size {
                                sector[n..].fill(0);
                            }
                        }
                        i = end;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }
    }

    fn finish_rnf(&mut self) {
        self.status_register.remove(Status::BUSY | Status::IDX_DRQ);
        self.status_register.insert(Status::RNF);
        self.datarq = false;
        self.state = State::None;
        self.intrq = true;
    }

    fn finish_ok(&mut self) {
        self.status_register.remove(Status::BUSY | Status::IDX_DRQ);
        self.datarq = false;
        self.state = State::None;
        self.intrq = true;
    }

    /// Data register read; streams transfer bytes while DRQ is up
    pub fn dr_read(&mut self, drive: &mut WdDrive) -> u8 {
        if self.datarq && self.buffer_pos < self.buffer.len() {
            self.data_register = self.buffer[self.buffer_pos];
            self.buffer_pos += 1;

            if self.buffer_pos == self.buffer.len() {
                if self.state == State::Read && self.multisector {
                    self.sector_register = self.sector_register.wrapping_add(1);
                    match self.sector_bytes(drive) {
                        Some(bytes) => {
                            self.buffer = bytes;
                            self.buffer_pos = 0;
                        }
                        None => self.finish_ok(),
                    }
                } else {
                    self.finish_ok();
                }
            }
        }
        self.data_register
    }

    /// Data register write; streams sector/track bytes while DRQ is up
    pub fn dr_write(&mut self, drive: &mut WdDrive, value: u8) {
        self.data_register = value;
        if !self.datarq {
            return;
        }

        match self.state {
            State::Write => {
                self.buffer.push(value);
                if self.buffer.len() >= self.buffer_pos {
                    let data = std::mem::take(&mut self.buffer);
                    let sector_len = self.buffer_pos;
                    if let Some(disk) = drive.disk.as_mut() {
                        if let Ok(sector) =
                            disk.sector_mut(drive.track, drive.side, self.sector_register)
                        {
                            sector.copy_from_slice(&data[..sector_len]);
                        }
                    }
                    if self.multisector {
                        self.sector_register = self.sector_register.wrapping_add(1);
                        let exists = drive.disk.as_ref().map_or(false, |disk| {
                            disk.has_sector(drive.track, drive.side, self.sector_register)
                        });
                        if exists {
                            self.buffer = Vec::with_capacity(sector_len);
                        } else {
                            self.finish_ok();
                        }
                    } else {
                        self.finish_ok();
                    }
                }
            }
            State::WriteTrack => {
                self.buffer.push(value);
            }
            _ => {}
        }
    }

    /// Index pulse edge from the interface; on the falling edge a pending
    /// index interrupt raises INTRQ
    pub fn index_pulse(&mut self, drive: &mut WdDrive, level: bool) {
        drive.index_pulse = level;
        if !level && drive.index_interrupt {
            drive.index_interrupt = false;
            self.intrq = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fdc_with_disk() -> (WdFdc, WdDrive) {
        let mut drive = WdDrive::new();
        let mut disk = DiskImage::blank_mgt();
        disk.sector_mut(0, 0, 1).unwrap()[0] = 0xDE;
        disk.sector_mut(0, 0, 1).unwrap()[511] = 0xAD;
        disk.sector_mut(5, 0, 3).unwrap()[0] = 0x42;
        drive.disk = Some(disk);
        (WdFdc::new(WdType::Wd1770), drive)
    }

    #[test]
    fn test_restore_homes_head() {
        let (mut fdc, mut drive) = fdc_with_disk();
        drive.track = 42;
        let delay = fdc.cr_write(&mut drive, 0x00).unwrap();
        assert!(fdc.busy());
        assert_eq!(delay, 42 * 6);
        fdc.cmd_done(&mut drive);
        assert!(!fdc.busy());
        assert!(fdc.intrq);
        assert_eq!(drive.track, 0);
        assert_eq!(fdc.tr_read(), 0);
        // Type I status reports TRACK0 in bit 2
        assert_ne!(fdc.sr_read(&drive) & 0x04, 0);
    }

    #[test]
    fn test_seek() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.data_register = 5;
        let delay = fdc.cr_write(&mut drive, 0x10).unwrap();
        assert_eq!(delay, 5 * 6);
        fdc.cmd_done(&mut drive);
        assert_eq!(drive.track, 5);
        assert_eq!(fdc.tr_read(), 5);
    }

    #[test]
    fn test_step_in_updates_track_register() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.cr_write(&mut drive, 0x50).unwrap(); // STEP-IN with update
        fdc.cmd_done(&mut drive);
        assert_eq!(drive.track, 1);
        assert_eq!(fdc.tr_read(), 1);
    }

    #[test]
    fn test_read_sector() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.sec_write(1);
        let delay = fdc.cr_write(&mut drive, 0x80).unwrap();
        assert_eq!(delay, 2);
        fdc.cmd_done(&mut drive);
        assert!(fdc.datarq);

        assert_eq!(fdc.dr_read(&mut drive), 0xDE);
        for _ in 1..511 {
            fdc.dr_read(&mut drive);
        }
        assert_eq!(fdc.dr_read(&mut drive), 0xAD);
        assert!(!fdc.busy());
        assert!(fdc.intrq);
        assert!(!fdc.datarq);
    }

    #[test]
    fn test_read_missing_sector_rnf() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.sec_write(99);
        let delay = fdc.cr_write(&mut drive, 0x80).unwrap();
        assert_eq!(delay, SEARCH_REVS * REV_MS);
        fdc.cmd_done(&mut drive);
        assert!(!fdc.busy());
        assert_ne!(fdc.sr_read(&drive) & Status::RNF.bits(), 0);
    }

    #[test]
    fn test_write_sector() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.sec_write(2);
        fdc.cr_write(&mut drive, 0xA0).unwrap();
        fdc.cmd_done(&mut drive);
        assert!(fdc.datarq);
        for i in 0..512u32 {
            fdc.dr_write(&mut drive, i as u8);
        }
        assert!(!fdc.busy());
        let disk = drive.disk.as_ref().unwrap();
        assert_eq!(disk.sector(0, 0, 2).unwrap()[0], 0);
        assert_eq!(disk.sector(0, 0, 2).unwrap()[255], 255);
    }

    #[test]
    fn test_write_protect_refused() {
        let (mut fdc, mut drive) = fdc_with_disk();
        drive.disk.as_mut().unwrap().write_protect = true;
        assert!(fdc.cr_write(&mut drive, 0xA0).is_none());
        assert!(!fdc.busy());
        assert!(fdc.intrq);
        assert!(fdc.status_register.contains(Status::WRPROT));
    }

    #[test]
    fn test_read_address() {
        let (mut fdc, mut drive) = fdc_with_disk();
        drive.track = 5;
        fdc.cr_write(&mut drive, 0xC0).unwrap();
        fdc.cmd_done(&mut drive);

        assert_eq!(fdc.dr_read(&mut drive), 5); // track
        assert_eq!(fdc.dr_read(&mut drive), 0); // side
        assert_eq!(fdc.dr_read(&mut drive), 1); // first sector id
        assert_eq!(fdc.dr_read(&mut drive), 2); // 512-byte length code
        fdc.dr_read(&mut drive);
        fdc.dr_read(&mut drive);
        assert!(!fdc.busy());
        // The ID's track address lands in the sector register
        assert_eq!(fdc.sec_read(), 5);
    }

    #[test]
    fn test_force_interrupt_clears_busy() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.sec_write(1);
        fdc.cr_write(&mut drive, 0x80).unwrap();
        assert!(fdc.busy());
        fdc.cr_write(&mut drive, 0xD8);
        assert!(!fdc.busy());
        assert!(fdc.intrq);
    }

    #[test]
    fn test_write_track_formats() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.cr_write(&mut drive, 0xF0).unwrap();
        assert!(fdc.datarq);

        // Lay down one ID + data pair for sector 4
        for byte in [0x00u8, 0xA1, 0xA1, 0xA1, 0xFE, 0, 0, 4, 2, 0, 0] {
            fdc.dr_write(&mut drive, byte);
        }
        fdc.dr_write(&mut drive, 0xFB);
        for _ in 0..512 {
            fdc.dr_write(&mut drive, 0x77);
        }
        fdc.cmd_done(&mut drive);
        assert!(!fdc.busy());
        let disk = drive.disk.as_ref().unwrap();
        assert_eq!(disk.sector(0, 0, 4).unwrap()[0], 0x77);
        assert_eq!(disk.sector(0, 0, 4).unwrap()[511], 0x77);
    }

    #[test]
    fn test_crc_ccitt() {
        // CCITT with 0xFFFF preset over "123456789" gives 0x29B1
        let mut crc = 0xFFFF;
        for byte in b"123456789" {
            crc = crc_add(crc, *byte);
        }
        assert_eq!(crc, 0x29B1);
    }

    #[test]
    fn test_index_pulse_interrupt() {
        let (mut fdc, mut drive) = fdc_with_disk();
        fdc.cr_write(&mut drive, 0xD4); // force interrupt on index pulse
        assert!(drive.index_interrupt);
        fdc.index_pulse(&mut drive, true);
        assert!(!fdc.intrq);
        fdc.index_pulse(&mut drive, false);
        assert!(fdc.intrq);
    }
}
