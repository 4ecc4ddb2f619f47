//! Microphone uplink encoder
//!
//! Produces complete `0x02` frames of µ-law audio, or of µ-law silence
//! when the uplink is muted.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::mulaw;
use crate::protocol::FrameType;

/// µ-law frame encoder with a fixed frame size
pub struct MicEncoder {
    chunk_samples: usize,
    frames_encoded: u64,
    silent_frames: u64,
    bytes_produced: u64,
}

impl MicEncoder {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunk_samples,
            frames_encoded: 0,
            silent_frames: 0,
            bytes_produced: 0,
        }
    }

    /// Samples carried by every outbound frame
    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Size of every outbound frame on the wire
    pub fn frame_len(&self) -> usize {
        1 + self.chunk_samples
    }

    /// Encode one chunk of microphone samples.
    ///
    /// Short reads are padded with silence so every frame has the same
    /// size; extra samples beyond one chunk are ignored.
    pub fn encode(&mut self, samples: &[i16]) -> Bytes {
        let take = samples.len().min(self.chunk_samples);
        let mut frame = BytesMut::with_capacity(self.frame_len());
        frame.put_u8(FrameType::Audio.as_u8());
        for &sample in &samples[..take] {
            frame.put_u8(mulaw::encode(sample));
        }
        frame.put_bytes(mulaw::SILENCE, self.chunk_samples - take);

        self.frames_encoded += 1;
        self.bytes_produced += frame.len() as u64;
        frame.freeze()
    }

    /// A full-size frame of silence.
    pub fn silence(&mut self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.frame_len());
        frame.put_u8(FrameType::Audio.as_u8());
        frame.put_bytes(mulaw::SILENCE, self.chunk_samples);

        self.silent_frames += 1;
        self.bytes_produced += frame.len() as u64;
        frame.freeze()
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            silent_frames: self.silent_frames,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub silent_frames: u64,
    pub bytes_produced: u64,
}
