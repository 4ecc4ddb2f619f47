//! Uncompressed PCM payloads

use crate::error::CodecError;

/// Expand a signed 8-bit sample to 16 bits (no dithering).
#[inline]
pub fn expand_pcm8(byte: u8) -> i16 {
    ((byte as i8) as i16) << 8
}

/// Legacy 8-bit signed PCM, one sample per byte.
pub fn decode_pcm8(payload: &[u8], out: &mut Vec<i16>) -> usize {
    out.extend(payload.iter().map(|&b| expand_pcm8(b)));
    payload.len()
}

/// 16-bit little-endian mono PCM.
pub fn decode_pcm16(payload: &[u8], out: &mut Vec<i16>) -> Result<usize, CodecError> {
    if payload.len() % 2 != 0 {
        return Err(CodecError::OddLength(payload.len()));
    }
    out.extend(
        payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
    Ok(payload.len() / 2)
}
