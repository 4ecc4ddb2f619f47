//! G.711 µ-law companding
//!
//! Table-free in both directions: the segment is found with a
//! leading-zero count instead of a lookup table.

/// Added to the magnitude before segment search
const BIAS: i32 = 0x84;

/// Largest magnitude that survives biasing without overflowing 15 bits
const CLIP: i32 = 32_635;

/// µ-law code of a zero sample
pub const SILENCE: u8 = 0xFF;

/// Compress one 16-bit linear sample to an 8-bit µ-law code.
#[inline]
pub fn encode(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    let magnitude = magnitude.min(CLIP) + BIAS;

    // magnitude is in [0x84, 0x7FFF], so (magnitude >> 7) is in [1, 255]
    let segment = 31 - ((magnitude >> 7) as u32).leading_zeros();
    let quantization = (magnitude >> (segment + 3)) & 0x0F;

    !(sign | ((segment as i32) << 4) | quantization) as u8
}

/// Expand an 8-bit µ-law code to a 16-bit linear sample.
#[inline]
pub fn decode(code: u8) -> i16 {
    let code = !code;
    let segment = (code >> 4) & 0x07;
    let quantization = (code & 0x0F) as i32;
    let magnitude = (((quantization << 3) + BIAS) << segment) - BIAS;

    if code & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode a block of samples, appending to `out`.
pub fn encode_into(samples: &[i16], out: &mut Vec<u8>) {
    out.extend(samples.iter().map(|&s| encode(s)));
}

/// Decode a block of codes, appending to `out`.
pub fn decode_into(codes: &[u8], out: &mut Vec<i16>) {
    out.extend(codes.iter().map(|&c| decode(c)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Half a quantization step of the segment `sample` falls into
    fn error_bound(sample: i16) -> i32 {
        let magnitude = (sample as i32).abs().min(CLIP) + BIAS;
        let segment = 31 - ((magnitude >> 7) as u32).leading_zeros();
        1 << (segment + 2)
    }

    #[test]
    fn test_reference_codes() {
        assert_eq!(encode(0), SILENCE);
        assert_eq!(decode(SILENCE), 0);
        assert_eq!(encode(-1), 0x7F);
        assert_eq!(encode(i16::MAX), 0x80);
        assert_eq!(encode(i16::MIN), 0x00);
        assert_eq!(decode(0x80), 32_124);
        assert_eq!(decode(0x00), -32_124);
    }

    #[test]
    fn test_boundaries_do_not_panic() {
        for sample in [i16::MIN, i16::MIN + 1, -CLIP as i16, CLIP as i16, i16::MAX] {
            let decoded = decode(encode(sample)) as i32;
            let clipped = (sample as i32).clamp(-CLIP, CLIP);
            assert!((decoded - clipped).abs() <= error_bound(sample));
        }
    }

    #[test]
    fn test_sine_round_trip_within_bound() {
        let samples: Vec<i16> = (0..1600)
            .map(|i| {
                let t = i as f32 / 16_000.0;
                ((t * 1000.0 * 2.0 * std::f32::consts::PI).sin() * 30_000.0) as i16
            })
            .collect();

        let mut codes = Vec::new();
        encode_into(&samples, &mut codes);
        let mut decoded = Vec::new();
        decode_into(&codes, &mut decoded);

        for (&orig, &back) in samples.iter().zip(&decoded) {
            let err = (orig as i32 - back as i32).abs();
            assert!(err <= error_bound(orig), "{} -> {} (err {})", orig, back, err);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut last = i16::MIN;
        for code in (0x00..=0x7Fu8).chain((0x80..=0xFFu8).rev()) {
            let value = decode(code);
            assert!(value >= last);
            last = value;
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip_error_bounded(sample in any::<i16>()) {
            let decoded = decode(encode(sample)) as i32;
            let clipped = (sample as i32).clamp(-CLIP, CLIP);
            prop_assert!((decoded - clipped).abs() <= error_bound(sample));
        }

        #[test]
        fn prop_codes_are_stable(code in any::<u8>()) {
            // 0x7F (negative zero) normalizes to 0xFF
            let expected = if code == 0x7F { 0xFF } else { code };
            prop_assert_eq!(encode(decode(code)), expected);
        }
    }
}
