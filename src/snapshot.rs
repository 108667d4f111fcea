//! Machine-independent snapshot records
//!
//! `Emu::to_snap` and `Emu::from_snap` exchange this tagged record set
//! with the collaborator that persists .z80/.szx/.sna files. Loading
//! validates the whole record before touching any state: a failed load
//! leaves the machine exactly as it was.

use thiserror::Error;

use crate::cpu::Registers;
use crate::machine::Model;
use crate::memory::PAGE_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapError {
    #[error("snapshot is for {found:?} but the machine is {expected:?}")]
    ModelMismatch { expected: Model, found: Model },
    #[error("RAM page {page} out of range for this machine")]
    BadRamPage { page: u8 },
    #[error("RAM page {page} has {len} bytes, expected at most 16384")]
    BadRamPageSize { page: u8, len: usize },
    #[error("interrupt mode {0} is not a Z80 interrupt mode")]
    BadInterruptMode(u8),
    #[error("DivIDE record has {0} RAM banks, expected 4")]
    BadDivIdeBanks(usize),
    #[error("unsupported snapshot feature: {0}")]
    UnsupportedFeature(String),
}

/// AY-3-8912 state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AySnap {
    pub selected: u8,
    pub registers: [u8; 16],
}

/// Timex SCLD registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScldSnap {
    pub hsr: u8,
    pub dec: u8,
}

/// DivIDE interface state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivIdeSnap {
    pub control: u8,
    pub paged: bool,
    pub eprom_writeprotect: bool,
    pub eprom: Vec<u8>,
    pub ram: Vec<Vec<u8>>,
}

/// +D interface state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlusDSnap {
    pub paged: bool,
    pub control: u8,
    pub track: u8,
    pub sector: u8,
    pub data: u8,
    pub direction: i8,
    pub ram: Vec<u8>,
}

/// The complete machine-independent record set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snap {
    pub model: Model,

    pub registers: Registers,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
    pub tstates: u32,

    pub border: u8,
    pub last_7ffd: u8,
    pub last_1ffd: u8,
    pub paging_locked: bool,

    /// (page number, contents) for every fitted 16 KiB RAM page
    pub ram_pages: Vec<(u8, Vec<u8>)>,

    pub ay: Option<AySnap>,
    pub scld: Option<ScldSnap>,
    pub divide: Option<DivIdeSnap>,
    pub plusd: Option<PlusDSnap>,
    pub if2_rom: Option<Vec<u8>>,
}

impl Snap {
    /// Check the record against a machine before any state is applied
    pub fn validate(&self, expected_model: Model, ram_pages: usize) -> Result<(), SnapError> {
        if self.model != expected_model {
            return Err(SnapError::ModelMismatch {
                expected: expected_model,
                found: self.model,
            });
        }
        if self.im > 2 {
            return Err(SnapError::BadInterruptMode(self.im));
        }
        for (page, data) in &self.ram_pages {
            if *page as usize >= ram_pages {
                return Err(SnapError::BadRamPage { page: *page });
            }
            if data.len() > 2 * PAGE_SIZE {
                return Err(SnapError::BadRamPageSize {
                    page: *page,
                    len: data.len(),
                });
            }
        }
        if let Some(divide) = &self.divide {
            if divide.ram.len() != crate::peripherals::divide::RAM_BANKS {
                return Err(SnapError::BadDivIdeBanks(divide.ram.len()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_snap(model: Model) -> Snap {
        Snap {
            model,
            registers: Registers::default(),
            iff1: false,
            iff2: false,
            im: 1,
            halted: false,
            tstates: 0,
            border: 7,
            last_7ffd: 0,
            last_1ffd: 0,
            paging_locked: false,
            ram_pages: Vec::new(),
            ay: None,
            scld: None,
            divide: None,
            plusd: None,
            if2_rom: None,
        }
    }

    #[test]
    fn test_model_mismatch_rejected() {
        let snap = minimal_snap(Model::Spectrum128);
        assert_eq!(
            snap.validate(Model::Spectrum48, 8),
            Err(SnapError::ModelMismatch {
                expected: Model::Spectrum48,
                found: Model::Spectrum128,
            })
        );
    }

    #[test]
    fn test_bad_page_rejected() {
        let mut snap = minimal_snap(Model::Spectrum48);
        snap.ram_pages.push((12, vec![0; 0x4000]));
        assert_eq!(
            snap.validate(Model::Spectrum48, 8),
            Err(SnapError::BadRamPage { page: 12 })
        );
    }

    #[test]
    fn test_oversize_page_rejected() {
        let mut snap = minimal_snap(Model::Spectrum48);
        snap.ram_pages.push((0, vec![0; 0x4001]));
        assert!(matches!(
            snap.validate(Model::Spectrum48, 8),
            Err(SnapError::BadRamPageSize { page: 0, .. })
        ));
    }

    #[test]
    fn test_valid_snap_passes() {
        let mut snap = minimal_snap(Model::Spectrum48);
        snap.ram_pages.push((5, vec![0; 0x4000]));
        assert_eq!(snap.validate(Model::Spectrum48, 8), Ok(()));
    }
}
