//! .TAP format
//!
//! A sequence of (u16 little-endian length, data) records, each one a
//! standard ROM loader block. Decode is exhaustive; truncation is a hard
//! error and leaves nothing inserted.

use thiserror::Error;

use super::{Tape, TapeBlock};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TapError {
    #[error("truncated block length at offset {0}")]
    TruncatedLength(usize),
    #[error("block at offset {offset} claims {expected} bytes but only {available} remain")]
    TruncatedData {
        offset: usize,
        expected: usize,
        available: usize,
    },
}

/// Parse a .TAP image into a tape
pub fn read(buffer: &[u8]) -> Result<Tape, TapError> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        if buffer.len() - pos < 2 {
            return Err(TapError::TruncatedLength(pos));
        }
        let length = u16::from_le_bytes([buffer[pos], buffer[pos + 1]]) as usize;
        pos += 2;

        if buffer.len() - pos < length {
            return Err(TapError::TruncatedData {
                offset: pos,
                expected: length,
                available: buffer.len() - pos,
            });
        }

        blocks.push(TapeBlock::Rom {
            data: buffer[pos..pos + length].to_vec(),
            // The ROM saver leaves roughly a second between blocks
            pause_ms: 1000,
        });
        pos += length;
    }

    Ok(Tape::new(blocks))
}

/// Serialise the ROM blocks of a tape back to .TAP
pub fn write(tape: &Tape) -> Vec<u8> {
    let mut out = Vec::new();
    for block in tape.blocks() {
        if let TapeBlock::Rom { data, .. } = block {
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_two_blocks() {
        let mut image = Vec::new();
        image.extend_from_slice(&[0x03, 0x00, 0x00, 0x01, 0x02]);
        image.extend_from_slice(&[0x01, 0x00, 0xFF]);
        let tape = read(&image).unwrap();
        assert_eq!(tape.blocks().len(), 2);
        assert_eq!(
            tape.blocks()[0],
            TapeBlock::Rom {
                data: vec![0x00, 0x01, 0x02],
                pause_ms: 1000,
            }
        );
    }

    #[test]
    fn test_truncated_length_is_hard_error() {
        assert!(matches!(read(&[0x05]), Err(TapError::TruncatedLength(0))));
    }

    #[test]
    fn test_truncated_data_is_hard_error() {
        let image = [0x10, 0x00, 0xAA];
        assert!(matches!(
            read(&image),
            Err(TapError::TruncatedData {
                offset: 2,
                expected: 16,
                available: 1,
            })
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut image = Vec::new();
        image.extend_from_slice(&[0x02, 0x00, 0xDE, 0xAD]);
        image.extend_from_slice(&[0x01, 0x00, 0x55]);
        let tape = read(&image).unwrap();
        assert_eq!(write(&tape), image);
    }

    #[test]
    fn test_empty_image_is_empty_tape() {
        let tape = read(&[]).unwrap();
        assert!(tape.is_empty());
    }
}
