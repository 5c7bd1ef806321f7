//! PCM/Opus utilities: fixed-rate conversions and frame sizing.
//!
//! Every frame crossing a component boundary in this crate is exactly
//! `FRAME_SAMPLES` samples unless the caller explicitly labels it a partial
//! tail (see `is_partial`).

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u8 = 1;
pub const FRAME_MS: u32 = 20;
pub const FRAME_SAMPLES: usize = 960;
pub const DEFAULT_BITRATE: u32 = 64_000;

/// Convert signed 16-bit PCM to float32 in `[-1.0, 1.0]`.
pub fn i16_to_f32(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert float32 PCM back to signed 16-bit, saturating out-of-range values.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// True if `frame` is shorter than a full `FRAME_SAMPLES` frame (a labelled
/// partial tail rather than a malformed frame).
pub fn is_partial(frame: &[i16]) -> bool {
    frame.len() < FRAME_SAMPLES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int16_roundtrip_is_identity_away_from_saturation() {
        for &s in &[0i16, 1, -1, 1234, -1234, i16::MAX, i16::MIN + 1] {
            let f = i16_to_f32(&[s]);
            let back = f32_to_i16(&f);
            assert_eq!(back[0], s);
        }
    }

    #[test]
    fn float_roundtrip_within_quantization() {
        for &f in &[0.0f32, 0.5, -0.5, 0.999, -0.999] {
            let i = f32_to_i16(&[f]);
            let back = i16_to_f32(&i);
            assert!((back[0] - f).abs() <= 2f32.powi(-15) + 1e-6);
        }
    }

    #[test]
    fn reverse_conversion_saturates() {
        let out = f32_to_i16(&[2.0, -2.0]);
        assert_eq!(out[0], i16::MAX);
        assert_eq!(out[1], i16::MIN);
    }

    #[test]
    fn partial_tail_detection() {
        assert!(is_partial(&[0i16; 100]));
        assert!(!is_partial(&[0i16; FRAME_SAMPLES]));
    }
}
