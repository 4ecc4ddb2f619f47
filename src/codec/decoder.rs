//! Inbound audio decoder
//!
//! Turns one `0x02` payload into volume-scaled, sink-ready 16-bit PCM.

use crate::codec::adpcm::ImaAdpcmDecoder;
use crate::codec::{pcm, Codec};
use crate::error::CodecError;

/// Scale a sample by a volume in `[0.0, 1.0]`.
#[inline]
pub fn apply_volume(sample: i16, volume: f32) -> i16 {
    // float -> int `as` casts saturate
    (sample as f32 * volume) as i16
}

/// Payload decoder for the negotiated codec
pub struct AudioDecoder {
    codec: Codec,
    stereo: bool,
    adpcm: ImaAdpcmDecoder,
    /// Mono samples of the current payload (reused to avoid allocations)
    mono: Vec<i16>,
    /// Sink-ready samples of the current payload
    output: Vec<i16>,
    frames_decoded: u64,
    frames_rejected: u64,
    samples_produced: u64,
}

impl AudioDecoder {
    pub fn new(codec: Codec, stereo: bool) -> Self {
        Self {
            codec,
            stereo,
            adpcm: ImaAdpcmDecoder::new(),
            mono: Vec::with_capacity(4096),
            output: Vec::with_capacity(8192),
            frames_decoded: 0,
            frames_rejected: 0,
            samples_produced: 0,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Output channel count (1 or 2)
    pub fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// Decode a payload into interleaved samples.
    ///
    /// A rejected payload leaves the ADPCM state untouched and produces
    /// no output.
    pub fn decode(&mut self, payload: &[u8], volume: f32) -> Result<&[i16], CodecError> {
        self.mono.clear();
        self.output.clear();

        let result = match self.codec {
            Codec::ImaAdpcm => self.adpcm.decode_frame(payload, &mut self.mono),
            Codec::Pcm8 => Ok(pcm::decode_pcm8(payload, &mut self.mono)),
            Codec::Pcm16 => pcm::decode_pcm16(payload, &mut self.mono),
        };
        if let Err(e) = result {
            self.frames_rejected += 1;
            return Err(e);
        }

        let volume = volume.clamp(0.0, 1.0);
        let channels = self.channels() as usize;
        self.output.reserve(self.mono.len() * channels);
        for &sample in &self.mono {
            let scaled = apply_volume(sample, volume);
            for _ in 0..channels {
                self.output.push(scaled);
            }
        }

        self.frames_decoded += 1;
        self.samples_produced += self.output.len() as u64;
        Ok(&self.output)
    }

    /// Forget the carried ADPCM state (new stream)
    pub fn reset(&mut self) {
        self.adpcm.reset();
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}
