//! Audio codecs
//!
//! Inbound audio arrives as IMA-ADPCM, legacy 8-bit PCM or 16-bit PCM,
//! selected by configuration. Outbound microphone audio is µ-law.

pub mod adpcm;
pub mod decoder;
pub mod encoder;
pub mod mulaw;
pub mod pcm;

pub use adpcm::{DecoderState, ImaAdpcmDecoder, ImaAdpcmEncoder};
pub use decoder::AudioDecoder;
pub use encoder::MicEncoder;

use serde::{Deserialize, Serialize};

/// Codec of inbound `0x02` audio payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// 4-bit IMA-ADPCM with a 3-byte state header per frame
    ImaAdpcm,
    /// Signed 8-bit PCM
    Pcm8,
    /// Little-endian signed 16-bit PCM
    Pcm16,
}

impl Codec {
    /// Payload bytes needed to carry `samples` mono samples (headers excluded)
    pub fn payload_bytes_for(self, samples: usize) -> usize {
        match self {
            Codec::ImaAdpcm => samples.div_ceil(2),
            Codec::Pcm8 => samples,
            Codec::Pcm16 => samples * 2,
        }
    }
}
