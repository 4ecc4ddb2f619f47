//! IMA-ADPCM (4 bits per sample)
//!
//! Frame layout on the wire:
//!
//! ```text
//! ┌──────────────────┬─────────┬──────────────────────────────┐
//! │ Byte 0-1         │ Byte 2  │ Byte 3..N                    │
//! │ predictor (i16LE)│ index   │ nibbles, low nibble first    │
//! └──────────────────┴─────────┴──────────────────────────────┘
//! ```
//!
//! An index of `0..=88` resets the decoder to the header state.
//! [`CONTINUE_INDEX`] keeps the state carried over from the previous frame.

use crate::error::CodecError;

/// Header bytes preceding the nibble data
pub const HEADER_LEN: usize = 3;

/// Header index value marking a frame that continues the previous state
pub const CONTINUE_INDEX: u8 = 0xFF;

const MAX_INDEX: i8 = 88;

#[rustfmt::skip]
const STEP_TABLE: [i32; 89] = [
        7,     8,     9,    10,    11,    12,    13,    14,
       16,    17,    19,    21,    23,    25,    28,    31,
       34,    37,    41,    45,    50,    55,    60,    66,
       73,    80,    88,    97,   107,   118,   130,   143,
      157,   173,   190,   209,   230,   253,   279,   307,
      337,   371,   408,   449,   494,   544,   598,   658,
      724,   796,   876,   963,  1060,  1166,  1282,  1411,
     1552,  1707,  1878,  2066,  2272,  2499,  2749,  3024,
     3327,  3660,  4026,  4428,  4871,  5358,  5894,  6484,
     7132,  7845,  8630,  9493, 10442, 11487, 12635, 13899,
    15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

/// Predictor state carried between frames of one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderState {
    pub predictor: i16,
    /// Step table index, always `0..=88`
    pub index: i8,
}

impl DecoderState {
    pub fn new(predictor: i16, index: u8) -> Result<Self, CodecError> {
        if index > MAX_INDEX as u8 {
            return Err(CodecError::InvalidIndex(index));
        }
        Ok(Self {
            predictor,
            index: index as i8,
        })
    }

    /// Reconstruct one sample from a 4-bit code, advancing the state.
    #[inline]
    fn decode_nibble(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.index as usize];
        let mut diff = step >> 3;
        if code & 1 != 0 {
            diff += step >> 2;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 4 != 0 {
            diff += step;
        }
        if code & 8 != 0 {
            diff = -diff;
        }

        let predictor = (self.predictor as i32 + diff).clamp(i16::MIN as i32, i16::MAX as i32);
        self.predictor = predictor as i16;
        self.index = (self.index + INDEX_TABLE[code as usize & 0x0F]).clamp(0, MAX_INDEX);
        self.predictor
    }

    /// Quantize one sample to a 4-bit code, advancing the state exactly
    /// as the decoder will.
    #[inline]
    fn encode_sample(&mut self, sample: i16) -> u8 {
        let step = STEP_TABLE[self.index as usize];
        let mut delta = sample as i32 - self.predictor as i32;
        let mut code = 0u8;
        if delta < 0 {
            code = 8;
            delta = -delta;
        }
        let mut threshold = step;
        for bit in [4u8, 2, 1] {
            if delta >= threshold {
                code |= bit;
                delta -= threshold;
            }
            threshold >>= 1;
        }
        self.decode_nibble(code);
        code
    }
}

/// Stateful IMA-ADPCM decoder
#[derive(Debug, Default)]
pub struct ImaAdpcmDecoder {
    state: DecoderState,
    frames_decoded: u64,
}

impl ImaAdpcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn set_state(&mut self, state: DecoderState) {
        self.state = state;
    }

    pub fn reset(&mut self) {
        self.state = DecoderState::default();
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Decode raw nibbles (no header) with the carried state.
    ///
    /// Two samples are produced per input byte.
    pub fn decode_nibbles(&mut self, input: &[u8], out: &mut Vec<i16>) {
        out.reserve(input.len() * 2);
        for &byte in input {
            out.push(self.state.decode_nibble(byte & 0x0F));
            out.push(self.state.decode_nibble(byte >> 4));
        }
    }

    /// Decode one framed payload (header + nibbles).
    ///
    /// On error the carried state is left untouched.
    pub fn decode_frame(&mut self, payload: &[u8], out: &mut Vec<i16>) -> Result<usize, CodecError> {
        if payload.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN,
                got: payload.len(),
            });
        }

        let index = payload[2];
        if index != CONTINUE_INDEX {
            let predictor = i16::from_le_bytes([payload[0], payload[1]]);
            self.state = DecoderState::new(predictor, index)?;
        }

        let before = out.len();
        self.decode_nibbles(&payload[HEADER_LEN..], out);
        self.frames_decoded += 1;
        Ok(out.len() - before)
    }
}

/// IMA-ADPCM encoder producing frames the decoder accepts.
///
/// The device only decodes ADPCM; the encoder exists for peers and
/// test fixtures.
#[derive(Debug, Default)]
pub struct ImaAdpcmEncoder {
    state: DecoderState,
}

impl ImaAdpcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Encode a frame that carries the current state in its header.
    ///
    /// An odd trailing sample is padded with a repeat of itself.
    pub fn encode_frame(&mut self, samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + samples.len().div_ceil(2));
        out.extend_from_slice(&self.state.predictor.to_le_bytes());
        out.push(self.state.index as u8);
        self.encode_nibbles(samples, &mut out);
        out
    }

    /// Encode a continuation frame (header index [`CONTINUE_INDEX`]).
    pub fn encode_continuation(&mut self, samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + samples.len().div_ceil(2));
        out.extend_from_slice(&[0, 0, CONTINUE_INDEX]);
        self.encode_nibbles(samples, &mut out);
        out
    }

    fn encode_nibbles(&mut self, samples: &[i16], out: &mut Vec<u8>) {
        for pair in samples.chunks(2) {
            let low = self.state.encode_sample(pair[0]);
            let high = self.state.encode_sample(*pair.get(1).unwrap_or(&pair[0]));
            out.push(low | (high << 4));
        }
    }
}
