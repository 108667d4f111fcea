//! Tape engine
//!
//! A tape is an ordered list of blocks; the engine produces the stream of
//! edges the Z80 sees on the EAR input. [`Tape::next_edge`] returns the
//! tstates to the next edge plus flags: end-of-block, stop-the-tape, and
//! stop-only-in-48K-mode. The caller schedules the next TapeEdge event at
//! `current_tstates + returned tstates`.
//!
//! Block payloads carry only their format fields; all per-block cursor
//! state (phase, pilot countdown, byte/bit position, current edge length)
//! lives in the engine and is reset whenever a block is entered.

pub mod tap;
pub mod tzx;

use bitflags::bitflags;

/// Timings of the ROM loader routine
pub const TIMING_PILOT: u32 = 2168;
pub const TIMING_SYNC1: u32 = 667;
pub const TIMING_SYNC2: u32 = 735;
pub const TIMING_DATA0: u32 = 855;
pub const TIMING_DATA1: u32 = 1710;

/// Pilot pulse counts for the ROM loader. One less than the .tzx
/// specification claims: entering the loop at 0x04D8 with HL=1 produces
/// the first sync pulse, not a pilot pulse.
pub const PILOTS_HEADER: u32 = 0x1F7F;
pub const PILOTS_DATA: u32 = 0x0C97;

bitflags! {
    /// Flags returned alongside an edge
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EdgeFlags: u8 {
        /// This edge finished the block
        const END_OF_BLOCK = 1 << 0;
        /// Stop the tape
        const STOP = 1 << 1;
        /// Stop the tape only when running a 48K machine
        const STOP_IF_48K = 1 << 2;
    }
}

/// One tape block. Text payloads stay raw bytes; .tzx files predate any
/// encoding convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeBlock {
    /// Standard ROM loader block
    Rom { data: Vec<u8>, pause_ms: u32 },
    /// ROM-shaped block with every timing explicit
    Turbo {
        data: Vec<u8>,
        bits_in_last_byte: u8,
        pause_ms: u32,
        pilot_length: u32,
        pilot_pulses: u32,
        sync1_length: u32,
        sync2_length: u32,
        bit0_length: u32,
        bit1_length: u32,
    },
    PureTone {
        pulse_length: u32,
        pulses: u32,
    },
    Pulses {
        lengths: Vec<u32>,
    },
    PureData {
        data: Vec<u8>,
        bits_in_last_byte: u8,
        pause_ms: u32,
        bit0_length: u32,
        bit1_length: u32,
    },
    RawData {
        data: Vec<u8>,
        bits_in_last_byte: u8,
        pause_ms: u32,
        /// Bit length, not pulse length
        bit_length: u32,
    },
    Pause {
        length_ms: u32,
    },
    GroupStart {
        name: Vec<u8>,
    },
    GroupEnd,
    /// Moves the current block by a signed offset, in blocks
    Jump {
        offset: i16,
    },
    LoopStart {
        count: u16,
    },
    LoopEnd,
    Select {
        offsets: Vec<i16>,
        descriptions: Vec<Vec<u8>>,
    },
    Stop48,
    Comment {
        text: Vec<u8>,
    },
    Message {
        time: u8,
        text: Vec<u8>,
    },
    ArchiveInfo {
        ids: Vec<u8>,
        strings: Vec<Vec<u8>>,
    },
    Hardware {
        types: Vec<u8>,
        ids: Vec<u8>,
        values: Vec<u8>,
    },
    Custom {
        description: [u8; 16],
        data: Vec<u8>,
    },
}

/// Edge-generation phase within a data-carrying block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Pilot,
    Sync1,
    Sync2,
    Data1,
    Data2,
    Pause,
}

/// Per-block transient state, reset on block entry
#[derive(Debug, Default)]
struct BlockState {
    phase: Phase,
    /// Pilot pulses (or tone pulses) still to go
    edge_count: u32,
    bytes_through_block: isize,
    bits_through_byte: u8,
    /// Current data byte, shifted out MSB first
    current_byte: u8,
    /// Edge length for the current data bit
    bit_tstates: u32,
    /// Raw-data: level of the last sample emitted
    last_bit: u8,
    /// Pulse-list cursor
    pulse_index: usize,
}

/// Advance the cursor to the next data bit, or into the trailing pause
fn next_bit(state: &mut BlockState, data: &[u8], bits_in_last_byte: u8, bit0: u32, bit1: u32) {
    state.bits_through_byte += 1;
    if state.bits_through_byte == 8 {
        state.bytes_through_block += 1;
        if state.bytes_through_block as usize == data.len() {
            state.phase = Phase::Pause;
            return;
        }
        state.current_byte = data[state.bytes_through_block as usize];
        // A short last byte skips its missing low bits
        if state.bytes_through_block as usize == data.len() - 1 {
            state.bits_through_byte = 8 - bits_in_last_byte.min(8);
        } else {
            state.bits_through_byte = 0;
        }
    }

    let bit = state.current_byte & 0x80;
    state.current_byte <<= 1;
    state.bit_tstates = if bit != 0 { bit1 } else { bit0 };
    state.phase = Phase::Data1;
}

/// Pilot/sync/data edge machine shared by ROM and TURBO blocks
#[allow(clippy::too_many_arguments)]
fn data_block_edge(
    state: &mut BlockState,
    data: &[u8],
    bits_in_last_byte: u8,
    pause_ms: u32,
    pilot: u32,
    sync1: u32,
    sync2: u32,
    bit0: u32,
    bit1: u32,
    cycles_per_ms: u32,
    end_of_block: &mut bool,
) -> u32 {
    match state.phase {
        Phase::Pilot => {
            state.edge_count = state.edge_count.saturating_sub(1);
            if state.edge_count == 0 {
                state.phase = Phase::Sync1;
            }
            pilot
        }
        Phase::Sync1 => {
            state.phase = Phase::Sync2;
            sync1
        }
        Phase::Sync2 => {
            next_bit(state, data, bits_in_last_byte, bit0, bit1);
            sync2
        }
        Phase::Data1 => {
            state.phase = Phase::Data2;
            state.bit_tstates
        }
        Phase::Data2 => {
            let tstates = state.bit_tstates;
            next_bit(state, data, bits_in_last_byte, bit0, bit1);
            tstates
        }
        Phase::Pause => {
            *end_of_block = true;
            pause_ms * cycles_per_ms
        }
    }
}

/// RAW_DATA: run-length encode level changes into one edge
fn raw_data_next_bit(state: &mut BlockState, data: &[u8], bits_in_last_byte: u8, bit_length: u32) {
    if state.bytes_through_block >= 0 && state.bytes_through_block as usize >= data.len() {
        state.phase = Phase::Pause;
        return;
    }
    state.phase = Phase::Data1;

    // Step through the samples until the level flips
    let mut length = 0u32;
    loop {
        length += 1;
        state.bits_through_byte += 1;
        if state.bits_through_byte == 8 {
            state.bytes_through_block += 1;
            if state.bytes_through_block as usize == data.len().saturating_sub(1) {
                state.bits_through_byte = 8 - bits_in_last_byte.min(8);
            } else {
                state.bits_through_byte = 0;
            }
            if state.bytes_through_block as usize >= data.len() {
                break;
            }
        }
        let index = state.bytes_through_block.max(0) as usize;
        if index >= data.len() {
            break;
        }
        let bit = (data[index] << state.bits_through_byte) & 0x80;
        if bit != state.last_bit {
            break;
        }
    }

    state.bit_tstates = length * bit_length;
    state.last_bit ^= 0x80;
}

pub struct Tape {
    blocks: Vec<TapeBlock>,
    current: usize,
    state: BlockState,
    /// Where LOOP_END returns to, and iterations remaining
    loop_block: usize,
    loop_count: u16,
}

impl Tape {
    pub fn new(blocks: Vec<TapeBlock>) -> Self {
        let mut tape = Tape {
            blocks,
            current: 0,
            state: BlockState::default(),
            loop_block: 0,
            loop_count: 0,
        };
        tape.init_block();
        tape
    }

    pub fn blocks(&self) -> &[TapeBlock] {
        &self.blocks
    }

    pub fn current_block(&self) -> usize {
        self.current
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Rewind to the first block
    pub fn rewind(&mut self) {
        self.current = 0;
        self.loop_count = 0;
        self.init_block();
    }

    /// Jump directly to a block (tape browser / SELECT handling)
    pub fn select_block(&mut self, index: usize) {
        if index < self.blocks.len() {
            self.current = index;
            self.init_block();
        }
    }

    /// Reset the cursor state for the block just entered
    fn init_block(&mut self) {
        let state = &mut self.state;
        *state = BlockState::default();

        match self.blocks.get(self.current) {
            Some(TapeBlock::Rom { data, .. }) => {
                // Header or data pilot count from bit 7 of the flag byte
                state.edge_count = if data.first().map_or(false, |b| b & 0x80 != 0) {
                    PILOTS_DATA
                } else {
                    PILOTS_HEADER
                };
                state.bytes_through_block = -1;
                state.bits_through_byte = 7;
                state.phase = Phase::Pilot;
            }
            Some(TapeBlock::Turbo { pilot_pulses, .. }) => {
                state.edge_count = *pilot_pulses;
                state.bytes_through_block = -1;
                state.bits_through_byte = 7;
                state.phase = Phase::Pilot;
            }
            Some(TapeBlock::PureTone { pulses, .. }) => {
                state.edge_count = *pulses;
            }
            Some(TapeBlock::Pulses { .. }) => {
                state.pulse_index = 0;
            }
            Some(TapeBlock::PureData {
                data,
                bits_in_last_byte,
                bit0_length,
                bit1_length,
                ..
            }) => {
                state.bytes_through_block = -1;
                state.bits_through_byte = 7;
                next_bit(state, data, *bits_in_last_byte, *bit0_length, *bit1_length);
            }
            Some(TapeBlock::RawData {
                data,
                bits_in_last_byte,
                bit_length,
                ..
            }) => {
                state.bytes_through_block = -1;
                state.bits_through_byte = 7;
                state.last_bit = data.first().map_or(0, |b| b & 0x80);
                raw_data_next_bit(state, data, *bits_in_last_byte, *bit_length);
            }
            _ => {}
        }
    }

    /// Produce the next edge: tstates until it occurs, plus flags.
    /// `cycles_per_ms` converts pause fields at the emulated machine's
    /// clock.
    pub fn next_edge(&mut self, cycles_per_ms: u32) -> (u32, EdgeFlags) {
        let mut flags = EdgeFlags::empty();
        if self.blocks.is_empty() {
            return (0, EdgeFlags::STOP);
        }

        let mut end_of_block = false;
        // Jump/loop arms reposition the tape themselves
        let mut no_advance = false;
        let mut reinit = false;

        let state = &mut self.state;
        let tstates = match &self.blocks[self.current] {
            TapeBlock::Rom { data, pause_ms } => data_block_edge(
                state,
                data,
                8,
                *pause_ms,
                TIMING_PILOT,
                TIMING_SYNC1,
                TIMING_SYNC2,
                TIMING_DATA0,
                TIMING_DATA1,
                cycles_per_ms,
                &mut end_of_block,
            ),
            TapeBlock::Turbo {
                data,
                bits_in_last_byte,
                pause_ms,
                pilot_length,
                sync1_length,
                sync2_length,
                bit0_length,
                bit1_length,
                ..
            } => data_block_edge(
                state,
                data,
                *bits_in_last_byte,
                *pause_ms,
                *pilot_length,
                *sync1_length,
                *sync2_length,
                *bit0_length,
                *bit1_length,
                cycles_per_ms,
                &mut end_of_block,
            ),
            TapeBlock::PureTone { pulse_length, .. } => {
                state.edge_count = state.edge_count.saturating_sub(1);
                if state.edge_count == 0 {
                    end_of_block = true;
                }
                *pulse_length
            }
            TapeBlock::Pulses { lengths } => {
                let length = lengths.get(state.pulse_index).copied().unwrap_or(0);
                state.pulse_index += 1;
                if state.pulse_index >= lengths.len() {
                    end_of_block = true;
                }
                length
            }
            TapeBlock::PureData {
                data,
                bits_in_last_byte,
                pause_ms,
                bit0_length,
                bit1_length,
            } => match state.phase {
                Phase::Data1 => {
                    state.phase = Phase::Data2;
                    state.bit_tstates
                }
                Phase::Data2 => {
                    let tstates = state.bit_tstates;
                    next_bit(state, data, *bits_in_last_byte, *bit0_length, *bit1_length);
                    tstates
                }
                _ => {
                    end_of_block = true;
                    pause_ms * cycles_per_ms
                }
            },
            TapeBlock::RawData {
                data,
                bits_in_last_byte,
                pause_ms,
                bit_length,
            } => match state.phase {
                Phase::Data1 => {
                    let tstates = state.bit_tstates;
                    raw_data_next_bit(state, data, *bits_in_last_byte, *bit_length);
                    tstates
                }
                _ => {
                    end_of_block = true;
                    pause_ms * cycles_per_ms
                }
            },
            TapeBlock::Pause { length_ms } => {
                let tstates = length_ms * cycles_per_ms;
                end_of_block = true;
                // A zero-length pause stops the tape
                if tstates == 0 {
                    flags |= EdgeFlags::STOP;
                }
                tstates
            }
            TapeBlock::Jump { offset } => {
                let target = self.current as isize + *offset as isize;
                self.current = target.clamp(0, self.blocks.len() as isize - 1) as usize;
                end_of_block = true;
                no_advance = true;
                reinit = true;
                0
            }
            TapeBlock::LoopStart { count } => {
                self.loop_block = self.current + 1;
                self.loop_count = *count;
                end_of_block = true;
                0
            }
            TapeBlock::LoopEnd => {
                self.loop_count = self.loop_count.saturating_sub(1);
                if self.loop_count != 0 {
                    self.current = self.loop_block;
                    no_advance = true;
                    reinit = true;
                }
                end_of_block = true;
                0
            }
            TapeBlock::Stop48 => {
                flags |= EdgeFlags::STOP_IF_48K;
                end_of_block = true;
                0
            }
            // Blocks with no audio contribution pass straight through
            TapeBlock::GroupStart { .. }
            | TapeBlock::GroupEnd
            | TapeBlock::Select { .. }
            | TapeBlock::Comment { .. }
            | TapeBlock::Message { .. }
            | TapeBlock::ArchiveInfo { .. }
            | TapeBlock::Hardware { .. }
            | TapeBlock::Custom { .. } => {
                end_of_block = true;
                0
            }
        };

        if end_of_block {
            flags |= EdgeFlags::END_OF_BLOCK;
            if !no_advance {
                self.current += 1;
                if self.current >= self.blocks.len() {
                    // End of tape: stop, then rewind to the start
                    flags |= EdgeFlags::STOP;
                    self.current = 0;
                }
                self.init_block();
            } else if reinit {
                self.init_block();
            }
        }

        (tstates, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLES_PER_MS: u32 = 3500;

    #[test]
    fn test_rom_header_block_timing() {
        // Flag byte 0x00: header pilot count
        let mut tape = Tape::new(vec![TapeBlock::Rom {
            data: vec![0x00],
            pause_ms: 0,
        }]);

        let mut total = 0u64;
        for edge in 0..PILOTS_HEADER {
            let (t, flags) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, TIMING_PILOT, "pilot edge {edge}");
            assert!(flags.is_empty());
            total += t as u64;
        }
        let (t, _) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, TIMING_SYNC1);
        total += t as u64;
        let (t, _) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, TIMING_SYNC2);
        total += t as u64;

        assert_eq!(
            total,
            PILOTS_HEADER as u64 * TIMING_PILOT as u64
                + TIMING_SYNC1 as u64
                + TIMING_SYNC2 as u64
        );

        // Data byte 0x00: sixteen reset-bit edges
        for edge in 0..16 {
            let (t, flags) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, TIMING_DATA0, "data edge {edge}");
            assert!(flags.is_empty());
        }

        // Zero pause: block ends, tape stops and rewinds
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 0);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));
        assert!(flags.contains(EdgeFlags::STOP));
        assert_eq!(tape.current_block(), 0);
    }

    #[test]
    fn test_rom_data_block_pilot_count() {
        // Flag byte 0xFF selects the short (data) pilot
        let mut tape = Tape::new(vec![TapeBlock::Rom {
            data: vec![0xFF],
            pause_ms: 0,
        }]);
        for _ in 0..PILOTS_DATA {
            let (t, _) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, TIMING_PILOT);
        }
        let (t, _) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, TIMING_SYNC1);
    }

    #[test]
    fn test_set_bits_use_long_pulses() {
        let mut tape = Tape::new(vec![TapeBlock::Rom {
            data: vec![0xA0],
            pause_ms: 0,
        }]);
        // 0xA0 is a data block pilot (bit 7 set)
        for _ in 0..PILOTS_DATA + 2 {
            tape.next_edge(CYCLES_PER_MS);
        }
        // Bits: 1,0,1,0,0,0,0,0
        let expected = [
            TIMING_DATA1,
            TIMING_DATA1,
            TIMING_DATA0,
            TIMING_DATA0,
            TIMING_DATA1,
            TIMING_DATA1,
        ];
        for (i, want) in expected.iter().enumerate() {
            let (t, _) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, *want, "edge {i}");
        }
    }

    #[test]
    fn test_pause_block() {
        let mut tape = Tape::new(vec![
            TapeBlock::Pause { length_ms: 100 },
            TapeBlock::Pause { length_ms: 0 },
        ]);
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 100 * CYCLES_PER_MS);
        assert_eq!(flags, EdgeFlags::END_OF_BLOCK);

        // Zero-length pause raises STOP
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 0);
        assert!(flags.contains(EdgeFlags::STOP));
    }

    #[test]
    fn test_pure_tone_and_pulses() {
        let mut tape = Tape::new(vec![
            TapeBlock::PureTone {
                pulse_length: 1000,
                pulses: 3,
            },
            TapeBlock::Pulses {
                lengths: vec![111, 222],
            },
        ]);
        assert_eq!(tape.next_edge(CYCLES_PER_MS).0, 1000);
        assert_eq!(tape.next_edge(CYCLES_PER_MS).0, 1000);
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 1000);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));

        assert_eq!(tape.next_edge(CYCLES_PER_MS).0, 111);
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 222);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));
    }

    #[test]
    fn test_loop_repeats_blocks() {
        let mut tape = Tape::new(vec![
            TapeBlock::LoopStart { count: 3 },
            TapeBlock::PureTone {
                pulse_length: 500,
                pulses: 1,
            },
            TapeBlock::LoopEnd,
            TapeBlock::Stop48,
        ]);

        // Loop start is silent
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 0);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));

        let mut tone_edges = 0;
        loop {
            let (t, flags) = tape.next_edge(CYCLES_PER_MS);
            if t == 500 {
                tone_edges += 1;
            }
            if flags.contains(EdgeFlags::STOP_IF_48K) {
                break;
            }
        }
        assert_eq!(tone_edges, 3);
    }

    #[test]
    fn test_jump_moves_by_blocks() {
        let mut tape = Tape::new(vec![
            TapeBlock::Jump { offset: 2 },
            TapeBlock::PureTone {
                pulse_length: 100,
                pulses: 1,
            },
            TapeBlock::PureTone {
                pulse_length: 200,
                pulses: 1,
            },
        ]);
        let (t, flags) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t, 0);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));
        // Jumped over the 100 tone straight to the 200 tone
        assert_eq!(tape.next_edge(CYCLES_PER_MS).0, 200);
    }

    #[test]
    fn test_meta_blocks_are_silent() {
        let mut tape = Tape::new(vec![
            TapeBlock::GroupStart {
                name: b"loader".to_vec(),
            },
            TapeBlock::Comment {
                text: b"hi".to_vec(),
            },
            TapeBlock::GroupEnd,
            TapeBlock::PureTone {
                pulse_length: 123,
                pulses: 1,
            },
        ]);
        for _ in 0..3 {
            let (t, flags) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, 0);
            assert!(flags.contains(EdgeFlags::END_OF_BLOCK));
            assert!(!flags.contains(EdgeFlags::STOP));
        }
        assert_eq!(tape.next_edge(CYCLES_PER_MS).0, 123);
    }

    #[test]
    fn test_short_last_byte() {
        // Two bits in the last (only) byte: 0b11 -> two set bits
        let mut tape = Tape::new(vec![TapeBlock::PureData {
            data: vec![0xC0],
            bits_in_last_byte: 2,
            pause_ms: 0,
            bit0_length: 855,
            bit1_length: 1710,
        }]);
        for _ in 0..4 {
            let (t, _) = tape.next_edge(CYCLES_PER_MS);
            assert_eq!(t, 1710);
        }
        let (_, flags) = tape.next_edge(CYCLES_PER_MS);
        assert!(flags.contains(EdgeFlags::END_OF_BLOCK));
    }

    #[test]
    fn test_raw_data_run_lengths() {
        // 0xF0: four high samples then four low samples
        let mut tape = Tape::new(vec![TapeBlock::RawData {
            data: vec![0xF0],
            bits_in_last_byte: 8,
            pause_ms: 0,
            bit_length: 100,
        }]);
        let (t, _) = tape.next_edge(CYCLES_PER_MS);
        assert_eq!(t % 100, 0);
        assert!(t > 0);
    }
}
