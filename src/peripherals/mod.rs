//! Peripheral port registry
//!
//! Port I/O is decoded against an ordered list of `(mask, value, device)`
//! entries: a device is consulted whenever `port & mask == value` and it
//! is active. Reads combine open-collector style (AND of every driver)
//! and OR an `attached` flag; if nothing attached the bus supplies the
//! machine's floating-bus value.

pub mod ay;
pub mod beta128;
pub mod divide;
pub mod if1;
pub mod if2;
pub mod kempston;
pub mod plusd;
pub mod scld;
pub mod ula;

use crate::machine::{MachineSpec, Paging};
use crate::memory::Memory;

use self::ay::Ay;
use self::beta128::Beta128;
use self::divide::DivIde;
use self::if1::If1;
use self::if2::If2;
use self::kempston::Kempston;
use self::plusd::PlusD;
use self::scld::Scld;
use self::ula::Ula;

/// The closed set of port-mapped devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    Ula,
    Kempston,
    AyRegister,
    AyData,
    /// 0x7FFD primary 128K paging latch
    Memory128,
    /// 0x1FFD +3/Scorpion secondary paging latch
    MemoryPlus3,
    ScldHsr,
    ScldDec,
    DivIdeIde,
    DivIdeControl,
    If1,
    PlusDCommandStatus,
    PlusDTrack,
    PlusDSector,
    PlusDData,
    PlusDControl,
    PlusDPatch,
    PlusDPrinter,
    BetaCommandStatus,
    BetaTrack,
    BetaSector,
    BetaData,
    BetaSystem,
}

/// One registry entry: the device responds to all ports where
/// `port & mask == value`
#[derive(Debug, Clone, Copy)]
pub struct PortEntry {
    pub mask: u16,
    pub value: u16,
    pub device: DeviceId,
}

impl PortEntry {
    pub fn matches(&self, port: u16) -> bool {
        port & self.mask == self.value
    }
}

/// Paging latches for the 128K-family memory ports
#[derive(Debug, Default)]
pub struct PagingPorts {
    pub last_7ffd: u8,
    pub last_1ffd: u8,
    /// Bit 5 of 0x7FFD: further paging writes ignored until hard reset
    pub locked: bool,
}

/// Every fitted device plus the decode registry
pub struct Peripherals {
    pub ula: Ula,
    pub ay: Ay,
    pub kempston: Kempston,
    pub kempston_enabled: bool,
    pub scld: Scld,
    pub divide: DivIde,
    pub if1: If1,
    pub if2: If2,
    pub plusd: PlusD,
    pub beta128: Beta128,
    pub paging: PagingPorts,
    registry: Vec<PortEntry>,
}

impl Peripherals {
    pub fn new(spec: &MachineSpec, memory: &mut Memory) -> Self {
        let mut peripherals = Peripherals {
            ula: Ula::new(),
            ay: Ay::new(),
            kempston: Kempston::new(),
            kempston_enabled: true,
            scld: Scld::new(),
            divide: DivIde::new(memory),
            if1: If1::new(),
            if2: If2::new(),
            plusd: PlusD::new(memory),
            beta128: Beta128::new(),
            paging: PagingPorts::default(),
            registry: Vec::new(),
        };
        peripherals.beta128.enabled = spec.builtin_betadisk;
        peripherals.rebuild_registry(spec);
        peripherals
    }

    /// Build the decode list for the machine's port map
    pub fn rebuild_registry(&mut self, spec: &MachineSpec) {
        let mut entries = Vec::new();
        let mut add = |mask: u16, value: u16, device: DeviceId| {
            entries.push(PortEntry {
                mask,
                value,
                device,
            })
        };

        if spec.ula_full_decode {
            add(0x00FF, 0x00FE, DeviceId::Ula);
            add(0x00FF, 0x00F4, DeviceId::ScldHsr);
            add(0x00FF, 0x00FF, DeviceId::ScldDec);
        } else {
            add(0x0001, 0x0000, DeviceId::Ula);
        }

        if spec.kempston_full_decode {
            add(0x00FF, 0x001F, DeviceId::Kempston);
        } else {
            add(0x00E0, 0x0000, DeviceId::Kempston);
        }

        if spec.has_ay {
            add(0xC002, 0xC000, DeviceId::AyRegister);
            add(0xC002, 0x8000, DeviceId::AyData);
        }

        match spec.paging {
            Paging::None => {}
            Paging::Spec128 => {
                add(0x8002, 0x0000, DeviceId::Memory128);
            }
            Paging::Plus3 | Paging::Scorpion => {
                add(0xC002, 0x4000, DeviceId::Memory128);
                add(0xF002, 0x1000, DeviceId::MemoryPlus3);
            }
        }

        // DivIDE: IDE registers 0xA3..0xBF, control at 0xE3
        add(0x00E3, 0x00A3, DeviceId::DivIdeIde);
        add(0x00FF, 0x00E3, DeviceId::DivIdeControl);

        // +D: WD1770 plus control/patch/printer
        add(0x00FF, 0x00E3, DeviceId::PlusDCommandStatus);
        add(0x00FF, 0x00EB, DeviceId::PlusDTrack);
        add(0x00FF, 0x00F3, DeviceId::PlusDSector);
        add(0x00FF, 0x00FB, DeviceId::PlusDData);
        add(0x00FF, 0x00EF, DeviceId::PlusDControl);
        add(0x00FF, 0x00E7, DeviceId::PlusDPatch);
        add(0x00FF, 0x00F7, DeviceId::PlusDPrinter);

        // Interface I claims address bits 3-4 while active
        add(0x0018, 0x0000, DeviceId::If1);
        add(0x0018, 0x0008, DeviceId::If1);
        add(0x0018, 0x0010, DeviceId::If1);

        // Beta 128 only answers while TR-DOS is paged
        add(0x00FF, 0x001F, DeviceId::BetaCommandStatus);
        add(0x00FF, 0x003F, DeviceId::BetaTrack);
        add(0x00FF, 0x005F, DeviceId::BetaSector);
        add(0x00FF, 0x007F, DeviceId::BetaData);
        add(0x00FF, 0x00FF, DeviceId::BetaSystem);

        self.registry = entries;
    }

    /// Whether a device is currently answering the bus at all
    pub fn device_active(&self, device: DeviceId) -> bool {
        match device {
            DeviceId::Ula | DeviceId::Memory128 | DeviceId::MemoryPlus3 => true,
            DeviceId::ScldHsr | DeviceId::ScldDec => true,
            DeviceId::Kempston => self.kempston_enabled,
            DeviceId::AyRegister | DeviceId::AyData => true,
            DeviceId::DivIdeIde | DeviceId::DivIdeControl => self.divide.enabled,
            DeviceId::If1 => self.if1.enabled,
            DeviceId::PlusDCommandStatus
            | DeviceId::PlusDTrack
            | DeviceId::PlusDSector
            | DeviceId::PlusDData
            | DeviceId::PlusDControl
            | DeviceId::PlusDPatch
            | DeviceId::PlusDPrinter => self.plusd.enabled,
            DeviceId::BetaCommandStatus
            | DeviceId::BetaTrack
            | DeviceId::BetaSector
            | DeviceId::BetaData
            | DeviceId::BetaSystem => self.beta128.paged(),
        }
    }

    /// Devices matching `port`, in registration order
    pub fn matches(&self, port: u16) -> impl Iterator<Item = DeviceId> + '_ {
        self.registry
            .iter()
            .filter(move |entry| entry.matches(port) && self.device_active(entry.device))
            .map(|entry| entry.device)
    }

    pub fn reset(&mut self, hard_reset: bool, memory: &mut Memory) {
        self.ula.reset();
        self.ay.reset();
        self.kempston.reset();
        self.scld.reset();
        self.divide.reset(hard_reset);
        self.if1.reset();
        self.plusd.reset(hard_reset, memory);
        self.beta128.reset();
        self.paging = PagingPorts::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Model;

    fn peripherals_for(model: Model) -> Peripherals {
        let spec = MachineSpec::for_model(model);
        let mut memory = Memory::new();
        Peripherals::new(&spec, &mut memory)
    }

    #[test]
    fn test_ula_even_port_decode() {
        let p = peripherals_for(Model::Spectrum48);
        assert!(p.matches(0x00FE).any(|d| d == DeviceId::Ula));
        assert!(p.matches(0x7FFC).any(|d| d == DeviceId::Ula));
        assert!(!p.matches(0x00FF).any(|d| d == DeviceId::Ula));
    }

    #[test]
    fn test_kempston_loose_vs_full() {
        let loose = peripherals_for(Model::Spectrum48);
        assert!(loose.matches(0x001F).any(|d| d == DeviceId::Kempston));
        // Any port with bits 5-7 clear matches on loose decoding
        assert!(loose.matches(0x551F).any(|d| d == DeviceId::Kempston));
        assert!(loose.matches(0x0000).any(|d| d == DeviceId::Kempston));

        let full = peripherals_for(Model::Tc2048);
        assert!(full.matches(0x001F).any(|d| d == DeviceId::Kempston));
        assert!(!full.matches(0x0000).any(|d| d == DeviceId::Kempston));
    }

    #[test]
    fn test_128_paging_port() {
        let p = peripherals_for(Model::Spectrum128);
        assert!(p.matches(0x7FFD).any(|d| d == DeviceId::Memory128));
        // Loose decoding: any port with bits 1 and 15 clear
        assert!(p.matches(0x3FFD).any(|d| d == DeviceId::Memory128));
        assert!(!p.matches(0xFFFD).any(|d| d == DeviceId::Memory128));
    }

    #[test]
    fn test_plus3_paging_ports() {
        let p = peripherals_for(Model::Plus3);
        assert!(p.matches(0x7FFD).any(|d| d == DeviceId::Memory128));
        assert!(p.matches(0x1FFD).any(|d| d == DeviceId::MemoryPlus3));
        assert!(!p.matches(0x7FFD).any(|d| d == DeviceId::MemoryPlus3));
    }

    #[test]
    fn test_ay_ports() {
        let p = peripherals_for(Model::Spectrum128);
        assert!(p.matches(0xFFFD).any(|d| d == DeviceId::AyRegister));
        assert!(p.matches(0xBFFD).any(|d| d == DeviceId::AyData));

        let none = peripherals_for(Model::Spectrum48);
        assert!(!none.matches(0xFFFD).any(|d| d == DeviceId::AyRegister));
    }

    #[test]
    fn test_divide_ide_register_decode() {
        let mut p = peripherals_for(Model::Spectrum48);
        p.divide.enabled = true;
        for port in [0x00A3u16, 0x00A7, 0x00AB, 0x00AF, 0x00B3, 0x00B7, 0x00BB, 0x00BF] {
            assert!(
                p.matches(port).any(|d| d == DeviceId::DivIdeIde),
                "port {port:#06x}"
            );
        }
        assert!(p.matches(0x00E3).any(|d| d == DeviceId::DivIdeControl));
    }

    #[test]
    fn test_inactive_devices_do_not_match() {
        let p = peripherals_for(Model::Spectrum48);
        assert!(!p.matches(0x00E3).any(|d| d == DeviceId::DivIdeControl));
        assert!(!p.matches(0x001F).any(|d| d == DeviceId::BetaCommandStatus));
    }

    #[test]
    fn test_beta_answers_only_while_paged() {
        let mut p = peripherals_for(Model::Pentagon);
        let mut memory = Memory::new();
        p.beta128.load_rom(&mut memory, &[0u8; 0x4000]);
        assert!(!p.matches(0x00FF).any(|d| d == DeviceId::BetaSystem));
        p.beta128.page();
        assert!(p.matches(0x00FF).any(|d| d == DeviceId::BetaSystem));
    }
}
