//! .DCK (Warajevo) Timex cartridge images
//!
//! A sequence of bank records: a bank id byte (DOCK, EXROM or HOME),
//! eight per-chunk access codes, then 8 KiB of data for each chunk whose
//! code says data follows. Loaded chunks land in the DOCK/EXROM bank
//! maps; HOME-bank RAM chunks are ignored (the machine's own RAM is
//! already there) and HOME ROM chunks replace the system ROM.

use thiserror::Error;

use crate::memory::{Memory, MemorySource, PageView, PAGE_SIZE};

/// Bank ids
const BANK_DOCK: u8 = 0;
const BANK_EXROM: u8 = 254;
const BANK_HOME: u8 = 255;

/// Per-chunk access codes
const PAGE_NULL: u8 = 0;
const PAGE_ROM: u8 = 1;
const PAGE_RAM_EMPTY: u8 = 2;
const PAGE_RAM: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DckError {
    #[error("truncated cartridge image")]
    Truncated,
    #[error("unsupported bank id {0}")]
    BadBank(u8),
    #[error("unsupported page access code {0}")]
    BadAccessCode(u8),
}

/// Load a cartridge into the Timex bank maps
pub fn read(memory: &mut Memory, data: &[u8]) -> Result<(), DckError> {
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < 9 {
            return Err(DckError::Truncated);
        }
        let bank = data[pos];
        let codes: [u8; 8] = data[pos + 1..pos + 9].try_into().unwrap();
        pos += 9;

        if !matches!(bank, BANK_DOCK | BANK_EXROM | BANK_HOME) {
            return Err(DckError::BadBank(bank));
        }

        for (chunk, &code) in codes.iter().enumerate() {
            let has_data = match code {
                PAGE_NULL | PAGE_RAM_EMPTY => false,
                PAGE_ROM | PAGE_RAM => true,
                other => return Err(DckError::BadAccessCode(other)),
            };

            let chunk_data = if has_data {
                if data.len() - pos < PAGE_SIZE {
                    return Err(DckError::Truncated);
                }
                let slice = &data[pos..pos + PAGE_SIZE];
                pos += PAGE_SIZE;
                Some(slice)
            } else {
                None
            };

            match bank {
                BANK_HOME => {
                    // Initialised home RAM is already the machine's; only
                    // a replacement ROM in the low chunks is honoured
                    if code == PAGE_ROM && chunk < 2 {
                        if let Some(bytes) = chunk_data {
                            let id = memory.rom_chunk(chunk);
                            memory.page_mut(id).copy_from_slice(bytes);
                        }
                    }
                }
                _ => {
                    if code == PAGE_NULL {
                        continue;
                    }
                    let source = if bank == BANK_DOCK {
                        MemorySource::Dock
                    } else {
                        MemorySource::Exrom
                    };
                    let page = memory.alloc_page(if code == PAGE_RAM_EMPTY {
                        0x00
                    } else {
                        0xFF
                    });
                    if let Some(bytes) = chunk_data {
                        memory.page_mut(page).copy_from_slice(bytes);
                    }
                    let view = PageView {
                        page,
                        writable: code == PAGE_RAM || code == PAGE_RAM_EMPTY,
                        contended: false,
                        source,
                        page_num: chunk as u8,
                        offset: 0,
                    };
                    if bank == BANK_DOCK {
                        memory.dock[chunk] = view;
                    } else {
                        memory.exrom[chunk] = view;
                    }
                }
            }
        }
    }

    Ok(())
}
