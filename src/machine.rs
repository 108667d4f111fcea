//! Machine models and their timing data
//!
//! Each supported machine is described by a [`MachineSpec`]: frame length,
//! contention table, ULA port decoding, floating-bus behaviour, paging
//! style and fitted hardware. A [`MachineSpec`] is constant data;
//! everything that varies at runtime lives on the bus and peripherals.

/// The supported machine models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Spectrum48,
    Spectrum128,
    Plus2,
    Plus2A,
    Plus3,
    Tc2048,
    Tc2068,
    Ts2068,
    Pentagon,
    Scorpion,
}

/// How port reads with nothing attached resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatingBus {
    /// The byte the ULA is fetching from screen memory this tstate
    Sinclair,
    /// Always 0xFF
    None,
}

/// Which paging scheme the model's ports drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    /// No paging ports (16K/48K, Timex home bank)
    None,
    /// 0x7FFD only
    Spec128,
    /// 0x7FFD plus +2A/+3 0x1FFD with special all-RAM modes
    Plus3,
    /// 0x7FFD plus Scorpion 0x1FFD extensions
    Scorpion,
}

/// Constant description of one machine model
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub model: Model,
    /// Z80 clock in Hz
    pub processor_speed: u32,
    pub tstates_per_frame: u32,
    /// Maskable interrupt accepted within this many tstates of frame start
    pub interrupt_length: u32,
    /// First tstate at which the ULA contends the bus; `None` disables
    /// contention entirely (Pentagon/Scorpion)
    pub contention_base: Option<u32>,
    /// Tstates per scanline
    pub line_tstates: u32,
    /// Number of display scanlines
    pub display_lines: u32,
    pub floating_bus: FloatingBus,
    pub paging: Paging,
    /// Timex SCLD (DOCK/EXROM, HSR/DEC registers) fitted
    pub timex: bool,
    /// AY-3-8912 fitted as standard
    pub has_ay: bool,
    /// Kempston decodes the full low byte (TC2048) rather than bits 5-7
    pub kempston_full_decode: bool,
    /// ULA responds to every even port (mask 0x0001) vs full decode
    pub ula_full_decode: bool,
    /// TR-DOS (Beta 128) fitted as standard
    pub builtin_betadisk: bool,
    /// Number of 16 KiB ROMs the model carries
    pub rom_count: usize,
    /// Number of 16 KiB RAM pages fitted
    pub ram_pages: usize,
}

impl MachineSpec {
    pub fn for_model(model: Model) -> MachineSpec {
        match model {
            Model::Spectrum48 => MachineSpec {
                model,
                processor_speed: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_length: 32,
                contention_base: Some(14_335),
                line_tstates: 224,
                display_lines: 192,
                floating_bus: FloatingBus::Sinclair,
                paging: Paging::None,
                timex: false,
                has_ay: false,
                kempston_full_decode: false,
                ula_full_decode: false,
                builtin_betadisk: false,
                rom_count: 1,
                ram_pages: 8,
            },
            Model::Spectrum128 | Model::Plus2 => MachineSpec {
                model,
                processor_speed: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_length: 32,
                contention_base: Some(14_361),
                line_tstates: 228,
                display_lines: 192,
                floating_bus: FloatingBus::Sinclair,
                paging: Paging::Spec128,
                timex: false,
                has_ay: true,
                kempston_full_decode: false,
                ula_full_decode: false,
                builtin_betadisk: false,
                rom_count: 2,
                ram_pages: 8,
            },
            Model::Plus2A | Model::Plus3 => MachineSpec {
                model,
                processor_speed: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_length: 32,
                contention_base: Some(14_361),
                line_tstates: 228,
                display_lines: 192,
                // The +2A/+3 gate array does not leak the video byte
                floating_bus: FloatingBus::None,
                paging: Paging::Plus3,
                timex: false,
                has_ay: true,
                kempston_full_decode: false,
                ula_full_decode: false,
                builtin_betadisk: false,
                rom_count: 4,
                ram_pages: 8,
            },
            Model::Tc2048 => MachineSpec {
                model,
                processor_speed: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_length: 32,
                contention_base: Some(14_335),
                line_tstates: 224,
                display_lines: 192,
                floating_bus: FloatingBus::None,
                paging: Paging::None,
                timex: true,
                has_ay: false,
                kempston_full_decode: true,
                ula_full_decode: true,
                builtin_betadisk: false,
                rom_count: 1,
                ram_pages: 8,
            },
            Model::Tc2068 | Model::Ts2068 => MachineSpec {
                model,
                processor_speed: 3_500_000,
                // NTSC TS2068 runs 262 lines to the TC2068's 312
                tstates_per_frame: if model == Model::Ts2068 { 59_736 } else { 69_888 },
                interrupt_length: 32,
                contention_base: Some(14_335),
                line_tstates: 224,
                display_lines: 192,
                floating_bus: FloatingBus::None,
                paging: Paging::None,
                timex: true,
                has_ay: true,
                kempston_full_decode: true,
                ula_full_decode: true,
                builtin_betadisk: false,
                rom_count: 1,
                ram_pages: 8,
            },
            Model::Pentagon => MachineSpec {
                model,
                processor_speed: 3_500_000,
                tstates_per_frame: 71_680,
                interrupt_length: 32,
                contention_base: None,
                line_tstates: 224,
                display_lines: 192,
                floating_bus: FloatingBus::None,
                paging: Paging::Spec128,
                timex: false,
                has_ay: true,
                kempston_full_decode: false,
                ula_full_decode: false,
                builtin_betadisk: true,
                rom_count: 2,
                ram_pages: 8,
            },
            Model::Scorpion => MachineSpec {
                model,
                processor_speed: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_length: 32,
                contention_base: None,
                line_tstates: 224,
                display_lines: 192,
                floating_bus: FloatingBus::None,
                paging: Paging::Scorpion,
                timex: false,
                has_ay: true,
                kempston_full_decode: false,
                ula_full_decode: false,
                builtin_betadisk: true,
                rom_count: 4,
                ram_pages: 16,
            },
        }
    }

    /// Z80 cycles per millisecond, for tape pause conversion
    pub fn cycles_per_ms(&self) -> u32 {
        self.processor_speed / 1000
    }

    /// Whether `port` is decoded by the ULA, for port contention timing
    pub fn port_from_ula(&self, port: u16) -> bool {
        if self.ula_full_decode {
            // Ports F4 (HSR), FE (ULA) and FF (DEC) supplied by the SCLD/ULA
            matches!(port & 0xFF, 0xF4 | 0xFE | 0xFF)
        } else {
            port & 0x0001 == 0
        }
    }

    /// Whether 16 KiB RAM page `page` is contended on this model
    pub fn ram_page_contended(&self, page: usize) -> bool {
        if self.contention_base.is_none() {
            return false;
        }
        match self.paging {
            // Only the page fixed at 0x4000
            Paging::None => page == 5,
            // Odd pages on the 128K/+2
            Paging::Spec128 => page & 1 == 1,
            // Pages 4-7 on the +2A/+3 gate array
            Paging::Plus3 => (4..8).contains(&page),
            Paging::Scorpion => false,
        }
    }

    /// ULA delay for an access beginning at `tstates`, from the machine's
    /// contention table. The pattern is 6,5,4,3,2,1,0,0 across each eight
    /// tstates of the fetch area of every display line.
    pub fn contention_delay(&self, tstates: u32) -> u32 {
        const PATTERN: [u32; 8] = [6, 5, 4, 3, 2, 1, 0, 0];

        let base = match self.contention_base {
            Some(base) => base,
            None => return 0,
        };
        if tstates < base {
            return 0;
        }
        let since = tstates - base;
        let line = since / self.line_tstates;
        let col = since % self.line_tstates;
        if line >= self.display_lines || col >= 128 {
            return 0;
        }
        PATTERN[(col & 7) as usize]
    }

    /// True for models whose tape STOP-IF-48K blocks stop the tape
    pub fn is_48k_for_tape(&self) -> bool {
        matches!(
            self.model,
            Model::Spectrum48 | Model::Tc2048 | Model::Tc2068 | Model::Ts2068
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lengths() {
        assert_eq!(
            MachineSpec::for_model(Model::Spectrum48).tstates_per_frame,
            69_888
        );
        assert_eq!(
            MachineSpec::for_model(Model::Spectrum128).tstates_per_frame,
            70_908
        );
        assert_eq!(
            MachineSpec::for_model(Model::Pentagon).tstates_per_frame,
            71_680
        );
    }

    #[test]
    fn test_contention_pattern_48k() {
        let spec = MachineSpec::for_model(Model::Spectrum48);
        assert_eq!(spec.contention_delay(14_334), 0);
        assert_eq!(spec.contention_delay(14_335), 6);
        assert_eq!(spec.contention_delay(14_336), 5);
        assert_eq!(spec.contention_delay(14_341), 0);
        assert_eq!(spec.contention_delay(14_342), 0);
        assert_eq!(spec.contention_delay(14_343), 6);
        // Fetch area is 128 tstates; the border after it is free
        assert_eq!(spec.contention_delay(14_335 + 128), 0);
        // Next line contends again
        assert_eq!(spec.contention_delay(14_335 + 224), 6);
        // Below the display nothing contends
        assert_eq!(spec.contention_delay(14_335 + 192 * 224), 0);
    }

    #[test]
    fn test_pentagon_never_contends() {
        let spec = MachineSpec::for_model(Model::Pentagon);
        assert_eq!(spec.contention_delay(20_000), 0);
        assert!(!spec.ram_page_contended(5));
    }

    #[test]
    fn test_contended_pages_128() {
        let spec = MachineSpec::for_model(Model::Spectrum128);
        assert!(spec.ram_page_contended(1));
        assert!(spec.ram_page_contended(5));
        assert!(spec.ram_page_contended(7));
        assert!(!spec.ram_page_contended(0));
        assert!(!spec.ram_page_contended(2));
    }

    #[test]
    fn test_timex_ula_decode() {
        let spec = MachineSpec::for_model(Model::Tc2048);
        assert!(spec.port_from_ula(0x00FE));
        assert!(spec.port_from_ula(0x00F4));
        assert!(spec.port_from_ula(0x00FF));
        assert!(!spec.port_from_ula(0x00F0));

        let spec48 = MachineSpec::for_model(Model::Spectrum48);
        assert!(spec48.port_from_ula(0x00FE));
        assert!(spec48.port_from_ula(0x7FFC));
        assert!(!spec48.port_from_ula(0x00FF));
    }
}
