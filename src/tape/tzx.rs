//! .TZX format
//!
//! Eight-byte ASCII signature `ZXTape!\x1A`, major/minor version bytes,
//! then a stream of (id byte, id-specific payload) blocks. Unknown IDs
//! are a hard error and nothing is inserted. CONCAT blocks are consumed
//! on read and never written.

use thiserror::Error;

use super::{Tape, TapeBlock};

const SIGNATURE: &[u8; 8] = b"ZXTape!\x1A";

/// Version written by this implementation
const MAJOR: u8 = 1;
const MINOR: u8 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TzxError {
    #[error("not a TZX file (bad signature)")]
    BadSignature,
    #[error("not enough data in block {0:#04x}")]
    NotEnoughData(u8),
    #[error("unknown block type {0:#04x}")]
    UnknownBlock(u8),
}

/// Forward-only cursor over the block payloads
struct Cursor<'a> {
    buffer: &'a [u8],
    pos: usize,
    block_id: u8,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<(), TzxError> {
        if self.remaining() < n {
            Err(TzxError::NotEnoughData(self.block_id))
        } else {
            Ok(())
        }
    }

    fn byte(&mut self) -> Result<u8, TzxError> {
        self.need(1)?;
        let value = self.buffer[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn word(&mut self) -> Result<u16, TzxError> {
        self.need(2)?;
        let value = u16::from_le_bytes([self.buffer[self.pos], self.buffer[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    fn u24(&mut self) -> Result<u32, TzxError> {
        self.need(3)?;
        let value = self.buffer[self.pos] as u32
            | (self.buffer[self.pos + 1] as u32) << 8
            | (self.buffer[self.pos + 2] as u32) << 16;
        self.pos += 3;
        Ok(value)
    }

    fn dword(&mut self) -> Result<u32, TzxError> {
        self.need(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buffer[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>, TzxError> {
        self.need(n)?;
        let out = self.buffer[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), TzxError> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    /// u8-length-prefixed text
    fn string(&mut self) -> Result<Vec<u8>, TzxError> {
        let len = self.byte()? as usize;
        self.bytes(len)
    }
}

/// Parse a .TZX image into a tape
pub fn read(buffer: &[u8]) -> Result<Tape, TzxError> {
    if buffer.len() < SIGNATURE.len() + 2 || &buffer[..SIGNATURE.len()] != SIGNATURE {
        return Err(TzxError::BadSignature);
    }

    let mut cursor = Cursor {
        buffer,
        pos: SIGNATURE.len() + 2, // skip the version bytes
        block_id: 0,
    };

    let mut blocks = Vec::new();
    while cursor.remaining() > 0 {
        let id = cursor.byte()?;
        cursor.block_id = id;
        match id {
            0x10 => {
                let pause_ms = cursor.word()? as u32;
                let length = cursor.word()? as usize;
                let data = cursor.bytes(length)?;
                blocks.push(TapeBlock::Rom { data, pause_ms });
            }
            0x11 => {
                let pilot_length = cursor.word()? as u32;
                let sync1_length = cursor.word()? as u32;
                let sync2_length = cursor.word()? as u32;
                let bit0_length = cursor.word()? as u32;
                let bit1_length = cursor.word()? as u32;
                let pilot_pulses = cursor.word()? as u32;
                let bits_in_last_byte = cursor.byte()?;
                let pause_ms = cursor.word()? as u32;
                let length = cursor.u24()? as usize;
                let data = cursor.bytes(length)?;
                blocks.push(TapeBlock::Turbo {
                    data,
                    bits_in_last_byte,
                    pause_ms,
                    pilot_length,
                    pilot_pulses,
                    sync1_length,
                    sync2_length,
                    bit0_length,
                    bit1_length,
                });
            }
            0x12 => {
                let pulse_length = cursor.word()? as u32;
                let pulses = cursor.word()? as u32;
                blocks.push(TapeBlock::PureTone {
                    pulse_length,
                    pulses,
                });
            }
            0x13 => {
                let count = cursor.byte()? as usize;
                let mut lengths = Vec::with_capacity(count);
                for _ in 0..count {
                    lengths.push(cursor.word()? as u32);
                }
                blocks.push(TapeBlock::Pulses { lengths });
            }
            0x14 => {
                let bit0_length = cursor.word()? as u32;
                let bit1_length = cursor.word()? as u32;
                let bits_in_last_byte = cursor.byte()?;
                let pause_ms = cursor.word()? as u32;
                let length = cursor.u24()? as usize;
                let data = cursor.bytes(length)?;
                blocks.push(TapeBlock::PureData {
                    data,
                    bits_in_last_byte,
                    pause_ms,
                    bit0_length,
                    bit1_length,
                });
            }
            0x15 => {
                let bit_length = cursor.word()? as u32;
                let pause_ms = cursor.word()? as u32;
                let bits_in_last_byte = cursor.byte()?;
                let length = cursor.u24()? as usize;
                let data = cursor.bytes(length)?;
                blocks.push(TapeBlock::RawData {
                    data,
                    bits_in_last_byte,
                    pause_ms,
                    bit_length,
                });
            }
            0x20 => {
                let length_ms = cursor.word()? as u32;
                blocks.push(TapeBlock::Pause { length_ms });
            }
            0x21 => {
                let name = cursor.string()?;
                blocks.push(TapeBlock::GroupStart { name });
            }
            0x22 => blocks.push(TapeBlock::GroupEnd),
            0x23 => {
                let offset = cursor.word()? as i16;
                blocks.push(TapeBlock::Jump { offset });
            }
            0x24 => {
                let count = cursor.word()?;
                blocks.push(TapeBlock::LoopStart { count });
            }
            0x25 => blocks.push(TapeBlock::LoopEnd),
            0x28 => {
                // Total-length field, then the selections
                cursor.word()?;
                let count = cursor.byte()? as usize;
                let mut offsets = Vec::with_capacity(count);
                let mut descriptions = Vec::with_capacity(count);
                for _ in 0..count {
                    offsets.push(cursor.word()? as i16);
                    descriptions.push(cursor.string()?);
                }
                blocks.push(TapeBlock::Select {
                    offsets,
                    descriptions,
                });
            }
            0x2A => {
                // Length dword, always zero
                cursor.dword()?;
                blocks.push(TapeBlock::Stop48);
            }
            0x30 => {
                let text = cursor.string()?;
                blocks.push(TapeBlock::Comment { text });
            }
            0x31 => {
                let time = cursor.byte()?;
                let text = cursor.string()?;
                blocks.push(TapeBlock::Message { time, text });
            }
            0x32 => {
                cursor.word()?;
                let count = cursor.byte()? as usize;
                let mut ids = Vec::with_capacity(count);
                let mut strings = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(cursor.byte()?);
                    strings.push(cursor.string()?);
                }
                blocks.push(TapeBlock::ArchiveInfo { ids, strings });
            }
            0x33 => {
                let count = cursor.byte()? as usize;
                let mut types = Vec::with_capacity(count);
                let mut ids = Vec::with_capacity(count);
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    types.push(cursor.byte()?);
                    ids.push(cursor.byte()?);
                    values.push(cursor.byte()?);
                }
                blocks.push(TapeBlock::Hardware { types, ids, values });
            }
            0x35 => {
                let mut description = [0u8; 16];
                description.copy_from_slice(&cursor.bytes(16)?);
                let length = cursor.dword()? as usize;
                let data = cursor.bytes(length)?;
                blocks.push(TapeBlock::Custom { description, data });
            }
            0x5A => {
                // Concatenation marker: nine bytes, nothing stored
                cursor.skip(9)?;
            }
            other => return Err(TzxError::UnknownBlock(other)),
        }
    }

    Ok(Tape::new(blocks))
}

/// Serialise a tape to .TZX
pub fn write(tape: &Tape) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.push(MAJOR);
    out.push(MINOR);

    for block in tape.blocks() {
        match block {
            TapeBlock::Rom { data, pause_ms } => {
                out.push(0x10);
                out.extend_from_slice(&(*pause_ms as u16).to_le_bytes());
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
            TapeBlock::Turbo {
                data,
                bits_in_last_byte,
                pause_ms,
                pilot_length,
                pilot_pulses,
                sync1_length,
                sync2_length,
                bit0_length,
                bit1_length,
            } => {
                out.push(0x11);
                for field in [
                    *pilot_length,
                    *sync1_length,
                    *sync2_length,
                    *bit0_length,
                    *bit1_length,
                    *pilot_pulses,
                ] {
                    out.extend_from_slice(&(field as u16).to_le_bytes());
                }
                out.push(*bits_in_last_byte);
                out.extend_from_slice(&(*pause_ms as u16).to_le_bytes());
                push_u24(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
            TapeBlock::PureTone {
                pulse_length,
                pulses,
            } => {
                out.push(0x12);
                out.extend_from_slice(&(*pulse_length as u16).to_le_bytes());
                out.extend_from_slice(&(*pulses as u16).to_le_bytes());
            }
            TapeBlock::Pulses { lengths } => {
                out.push(0x13);
                out.push(lengths.len() as u8);
                for length in lengths {
                    out.extend_from_slice(&(*length as u16).to_le_bytes());
                }
            }
            TapeBlock::PureData {
                data,
                bits_in_last_byte,
                pause_ms,
                bit0_length,
                bit1_length,
            } => {
                out.push(0x14);
                out.extend_from_slice(&(*bit0_length as u16).to_le_bytes());
                out.extend_from_slice(&(*bit1_length as u16).to_le_bytes());
                out.push(*bits_in_last_byte);
                out.extend_from_slice(&(*pause_ms as u16).to_le_bytes());
                push_u24(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
            TapeBlock::RawData {
                data,
                bits_in_last_byte,
                pause_ms,
                bit_length,
            } => {
                out.push(0x15);
                out.extend_from_slice(&(*bit_length as u16).to_le_bytes());
                out.extend_from_slice(&(*pause_ms as u16).to_le_bytes());
                out.push(*bits_in_last_byte);
                push_u24(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
            TapeBlock::Pause { length_ms } => {
                out.push(0x20);
                out.extend_from_slice(&(*length_ms as u16).to_le_bytes());
            }
            TapeBlock::GroupStart { name } => {
                out.push(0x21);
                push_string(&mut out, name);
            }
            TapeBlock::GroupEnd => out.push(0x22),
            TapeBlock::Jump { offset } => {
                out.push(0x23);
                out.extend_from_slice(&(*offset as u16).to_le_bytes());
            }
            TapeBlock::LoopStart { count } => {
                out.push(0x24);
                out.extend_from_slice(&count.to_le_bytes());
            }
            TapeBlock::LoopEnd => out.push(0x25),
            TapeBlock::Select {
                offsets,
                descriptions,
            } => {
                out.push(0x28);
                let body: usize = 1
                    + offsets
                        .iter()
                        .zip(descriptions)
                        .map(|(_, d)| 3 + d.len())
                        .sum::<usize>();
                out.extend_from_slice(&(body as u16).to_le_bytes());
                out.push(offsets.len() as u8);
                for (offset, description) in offsets.iter().zip(descriptions) {
                    out.extend_from_slice(&(*offset as u16).to_le_bytes());
                    push_string(&mut out, description);
                }
            }
            TapeBlock::Stop48 => {
                out.push(0x2A);
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            TapeBlock::Comment { text } => {
                out.push(0x30);
                push_string(&mut out, text);
            }
            TapeBlock::Message { time, text } => {
                out.push(0x31);
                out.push(*time);
                push_string(&mut out, text);
            }
            TapeBlock::ArchiveInfo { ids, strings } => {
                out.push(0x32);
                let body: usize = 1
                    + ids
                        .iter()
                        .zip(strings)
                        .map(|(_, s)| 2 + s.len())
                        .sum::<usize>();
                out.extend_from_slice(&(body as u16).to_le_bytes());
                out.push(ids.len() as u8);
                for (id, string) in ids.iter().zip(strings) {
                    out.push(*id);
                    push_string(&mut out, string);
                }
            }
            TapeBlock::Hardware { types, ids, values } => {
                out.push(0x33);
                out.push(types.len() as u8);
                for i in 0..types.len() {
                    out.push(types[i]);
                    out.push(ids[i]);
                    out.push(values[i]);
                }
            }
            TapeBlock::Custom { description, data } => {
                out.push(0x35);
                out.extend_from_slice(description);
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }

    out
}

fn push_u24(out: &mut Vec<u8>, value: u32) {
    out.push(value as u8);
    out.push((value >> 8) as u8);
    out.push((value >> 16) as u8);
}

fn push_string(out: &mut Vec<u8>, text: &[u8]) {
    out.push(text.len() as u8);
    out.extend_from_slice(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(extra: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(SIGNATURE);
        image.push(1);
        image.push(20);
        image.extend_from_slice(extra);
        image
    }

    #[test]
    fn test_bad_signature() {
        assert!(matches!(read(b"NotATape"), Err(TzxError::BadSignature)));
        assert!(matches!(read(b"ZX"), Err(TzxError::BadSignature)));
    }

    #[test]
    fn test_unknown_block_is_hard_error() {
        let image = header(&[0x99]);
        assert!(matches!(read(&image), Err(TzxError::UnknownBlock(0x99))));
    }

    #[test]
    fn test_truncated_block_is_hard_error() {
        // ROM block claiming 16 data bytes with none present
        let image = header(&[0x10, 0x00, 0x00, 0x10, 0x00]);
        assert!(matches!(read(&image), Err(TzxError::NotEnoughData(0x10))));
    }

    #[test]
    fn test_read_rom_block() {
        let image = header(&[0x10, 0xE8, 0x03, 0x02, 0x00, 0xAA, 0xBB]);
        let tape = read(&image).unwrap();
        assert_eq!(
            tape.blocks(),
            &[TapeBlock::Rom {
                data: vec![0xAA, 0xBB],
                pause_ms: 1000,
            }]
        );
    }

    #[test]
    fn test_concat_block_skipped() {
        let mut extra = vec![0x5A];
        extra.extend_from_slice(&[0; 9]);
        extra.extend_from_slice(&[0x22]);
        let tape = read(&header(&extra)).unwrap();
        assert_eq!(tape.blocks(), &[TapeBlock::GroupEnd]);
    }

    #[test]
    fn test_round_trip_lossless_blocks() {
        let blocks = vec![
            TapeBlock::Rom {
                data: vec![0x00, 0x01, 0x02, 0xFF],
                pause_ms: 954,
            },
            TapeBlock::Turbo {
                data: vec![0x55; 19],
                bits_in_last_byte: 5,
                pause_ms: 100,
                pilot_length: 2400,
                pilot_pulses: 4096,
                sync1_length: 600,
                sync2_length: 700,
                bit0_length: 800,
                bit1_length: 1600,
            },
            TapeBlock::PureData {
                data: vec![0xDE, 0xAD],
                bits_in_last_byte: 8,
                pause_ms: 0,
                bit0_length: 855,
                bit1_length: 1710,
            },
            TapeBlock::Pause { length_ms: 500 },
            TapeBlock::GroupStart {
                name: b"level data".to_vec(),
            },
            TapeBlock::GroupEnd,
            TapeBlock::ArchiveInfo {
                ids: vec![0x00, 0x01],
                strings: vec![b"Jet Set Willy".to_vec(), b"Software Projects".to_vec()],
            },
        ];
        let written = write(&Tape::new(blocks.clone()));
        let reread = read(&written).unwrap();
        assert_eq!(reread.blocks(), &blocks[..]);
    }

    #[test]
    fn test_round_trip_remaining_kinds() {
        let blocks = vec![
            TapeBlock::PureTone {
                pulse_length: 2168,
                pulses: 3223,
            },
            TapeBlock::Pulses {
                lengths: vec![667, 735],
            },
            TapeBlock::RawData {
                data: vec![0xF0, 0x0F],
                bits_in_last_byte: 8,
                pause_ms: 0,
                bit_length: 79,
            },
            TapeBlock::Jump { offset: -2 },
            TapeBlock::LoopStart { count: 10 },
            TapeBlock::LoopEnd,
            TapeBlock::Select {
                offsets: vec![1, 2],
                descriptions: vec![b"48K".to_vec(), b"128K".to_vec()],
            },
            TapeBlock::Stop48,
            TapeBlock::Comment {
                text: b"created by zx-core".to_vec(),
            },
            TapeBlock::Message {
                time: 5,
                text: b"flip the tape".to_vec(),
            },
            TapeBlock::Hardware {
                types: vec![0],
                ids: vec![3],
                values: vec![1],
            },
            TapeBlock::Custom {
                description: *b"POKEs           ",
                data: vec![1, 2, 3],
            },
        ];
        let written = write(&Tape::new(blocks.clone()));
        let reread = read(&written).unwrap();
        assert_eq!(reread.blocks(), &blocks[..]);
    }
}
