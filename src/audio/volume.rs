//! Fixed-point volume and ducking scaler
//!
//! Volume levels are normalized floats in [0.0, 1.0], mapped through a
//! monotonic lookup table to a signed 16-bit Q15 multiplier (unity gain is
//! 32767). The table has 100 entries spanning silence and an attenuation
//! range of 49.5 dB in 0.5 dB steps:
//!
//! dB to PCM scaling factor: floating_point_scale_factor = 2^(-db/6.014)
//! float to Q15 fixed point: q15_scale_factor = floating_point_scale_factor * 2^15
//!
//! Index 0 maps to exactly 0, so a hard mute goes through the same code
//! path as every other level and produces bit-identical silence.

/// Q15 multiplier representing unity gain
pub const UNITY_GAIN: i16 = i16::MAX;

/// Q15 scaling factors for silence and a reduction of [49.5, 49.0, ... 0.5, 0] dB
const Q15_VOLUME_SCALING_FACTORS: [i16; 100] = [
    0, 116, 122, 130, 137, 146, 154, 163, 173, 183, 194, 206, 218, 231, 244, //
    259, 274, 291, 308, 326, 345, 366, 388, 411, 435, 461, 488, 517, 548, 580, //
    615, 651, 690, 731, 774, 820, 868, 920, 974, 1032, 1094, 1158, 1227, 1300, 1377, //
    1459, 1545, 1637, 1734, 1837, 1946, 2061, 2184, 2313, 2450, 2596, 2750, 2913, 3085, 3269, //
    3462, 3668, 3885, 4116, 4360, 4619, 4893, 5183, 5490, 5816, 6161, 6527, 6914, 7324, 7758, //
    8218, 8706, 9222, 9770, 10349, 10963, 11613, 12302, 13032, 13805, 14624, 15491, 16410, 17384,
    18415, //
    19508, 20665, 21891, 23189, 24565, 26022, 27566, 29201, 30933, 32767,
];

/// Map a normalized volume or ducking level to its Q15 multiplier
///
/// The level is clamped to [0.0, 1.0] and rounded to the nearest table
/// index. 0.0 maps to exactly 0 and 1.0 to exactly 32767.
pub fn scale_factor(level: f32) -> i16 {
    let level = level.clamp(0.0, 1.0);
    let index = (level * (Q15_VOLUME_SCALING_FACTORS.len() - 1) as f32).round() as usize;
    Q15_VOLUME_SCALING_FACTORS[index]
}

/// Scale 16-bit samples in place by a Q15 multiplier
///
/// `output = (sample as i32 * factor as i32) >> 15`, truncating. The factor
/// never exceeds 32767, so |output| <= |input| and no clipping guard is
/// needed. Unity gain is a true no-op.
pub fn apply_scale(samples: &mut [i16], factor: i16) {
    if factor == UNITY_GAIN {
        return;
    }
    for sample in samples {
        let acc = (*sample as i32) * (factor as i32);
        *sample = (acc >> 15) as i16;
    }
}

/// Scale a little-endian 16-bit PCM byte buffer in place
///
/// A trailing odd byte, which a well-formed 16-bit stream never has, is
/// left untouched.
pub fn apply_scale_bytes(pcm: &mut [u8], factor: i16) {
    if factor == UNITY_GAIN {
        return;
    }
    for chunk in pcm.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let acc = (sample as i32) * (factor as i32);
        chunk.copy_from_slice(&((acc >> 15) as i16).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_exact() {
        assert_eq!(scale_factor(0.0), 0);
        assert_eq!(scale_factor(1.0), 32767);
    }

    #[test]
    fn table_is_monotonic() {
        let mut previous = -1i32;
        for level in 0..=1000 {
            let factor = scale_factor(level as f32 / 1000.0) as i32;
            assert!(factor >= previous, "non-monotonic at level {}", level);
            previous = factor;
        }
    }

    #[test]
    fn out_of_range_levels_clamp() {
        assert_eq!(scale_factor(-0.5), 0);
        assert_eq!(scale_factor(2.0), 32767);
    }

    #[test]
    fn unity_gain_is_a_no_op() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX];
        let mut samples = original.clone();
        apply_scale(&mut samples, UNITY_GAIN);
        assert_eq!(samples, original);
    }

    #[test]
    fn zero_factor_silences() {
        let mut samples: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX];
        apply_scale(&mut samples, 0);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn scaling_matches_reference_transform() {
        let factor = scale_factor(0.3);
        let inputs: Vec<i16> = vec![-30000, -128, 0, 255, 30000];
        let mut samples = inputs.clone();
        apply_scale(&mut samples, factor);
        for (input, output) in inputs.iter().zip(&samples) {
            let expected = ((*input as i32 * factor as i32) >> 15) as i16;
            assert_eq!(*output, expected);
        }
    }

    #[test]
    fn byte_form_matches_sample_form() {
        let factor = scale_factor(0.5);
        let samples: Vec<i16> = vec![-20000, -3, 0, 7, 20000];

        let mut as_samples = samples.clone();
        apply_scale(&mut as_samples, factor);

        let mut as_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        apply_scale_bytes(&mut as_bytes, factor);

        let decoded: Vec<i16> = as_bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded, as_samples);
    }
}
