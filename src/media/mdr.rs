//! .MDR microdrive cartridge images
//!
//! A cartridge is exactly 137922 bytes of tape loop, optionally followed
//! by one write-protect byte. The head position wraps at the loop length;
//! the sector structure repeats every 543 bytes (15-byte header block,
//! 528-byte record block).

use thiserror::Error;

/// Length of the tape loop in bytes
pub const CARTRIDGE_LEN: usize = 137_922;

/// Bytes per sector (header block + record block)
pub const SECTOR_LEN: usize = 543;

#[derive(Debug, Error)]
pub enum MdrError {
    #[error("cartridge image is {0} bytes, expected {CARTRIDGE_LEN} (+1 write-protect byte)")]
    BadLength(usize),
}

pub struct MdrCartridge {
    data: Box<[u8; CARTRIDGE_LEN]>,
    pub write_protect: bool,
    /// Written since insertion
    pub modified: bool,
}

impl MdrCartridge {
    /// A freshly formatted (erased, unprotected) cartridge
    pub fn blank() -> Self {
        MdrCartridge {
            data: Box::new([0xFF; CARTRIDGE_LEN]),
            write_protect: false,
            modified: true,
        }
    }

    /// Parse an .MDR image; a 137923rd byte is the write-protect flag
    pub fn from_bytes(bytes: &[u8]) -> Result<MdrCartridge, MdrError> {
        let write_protect = match bytes.len() {
            CARTRIDGE_LEN => false,
            len if len == CARTRIDGE_LEN + 1 => bytes[CARTRIDGE_LEN] != 0,
            len => return Err(MdrError::BadLength(len)),
        };

        let mut data = Box::new([0u8; CARTRIDGE_LEN]);
        data.copy_from_slice(&bytes[..CARTRIDGE_LEN]);
        Ok(MdrCartridge {
            data,
            write_protect,
            modified: false,
        })
    }

    /// Serialise back to the on-disk form, including the protect byte
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CARTRIDGE_LEN + 1);
        out.extend_from_slice(&self.data[..]);
        out.push(self.write_protect as u8);
        out
    }

    pub fn read(&self, head_pos: usize) -> u8 {
        self.data[head_pos % CARTRIDGE_LEN]
    }

    pub fn write(&mut self, head_pos: usize, value: u8) {
        self.data[head_pos % CARTRIDGE_LEN] = value;
        self.modified = true;
    }

    /// Number of whole sectors on the loop
    pub fn sectors(&self) -> usize {
        CARTRIDGE_LEN / SECTOR_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_validation() {
        assert!(MdrCartridge::from_bytes(&vec![0; CARTRIDGE_LEN]).is_ok());
        assert!(MdrCartridge::from_bytes(&vec![0; CARTRIDGE_LEN + 1]).is_ok());
        assert!(MdrCartridge::from_bytes(&vec![0; 1000]).is_err());
        assert!(MdrCartridge::from_bytes(&vec![0; CARTRIDGE_LEN + 2]).is_err());
    }

    #[test]
    fn test_write_protect_byte() {
        let mut image = vec![0u8; CARTRIDGE_LEN + 1];
        image[CARTRIDGE_LEN] = 1;
        let cart = MdrCartridge::from_bytes(&image).unwrap();
        assert!(cart.write_protect);

        let out = cart.to_bytes();
        assert_eq!(out.len(), CARTRIDGE_LEN + 1);
        assert_eq!(out[CARTRIDGE_LEN], 1);
    }

    #[test]
    fn test_head_wraps() {
        let mut cart = MdrCartridge::blank();
        cart.write(CARTRIDGE_LEN, 0x42); // wraps to 0
        assert_eq!(cart.read(0), 0x42);
        assert!(cart.modified);
    }

    #[test]
    fn test_sector_count() {
        // 254 sectors of 543 bytes make up the loop
        assert_eq!(MdrCartridge::blank().sectors(), 254);
    }
}
