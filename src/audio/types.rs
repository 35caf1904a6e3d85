//! Core audio data types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Format of a PCM stream
///
/// Immutable once a pipeline is running; a format change requires a full
/// stop/reconfigure/restart cycle of the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    /// Samples per second per channel
    pub sample_rate: u32,

    /// Bits per sample (the engine processes at most 16)
    pub bits_per_sample: u8,

    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioStreamInfo {
    pub const fn new(sample_rate: u32, bits_per_sample: u8, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Storage bytes per sample (bits rounded up to whole bytes)
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    /// Bytes per frame (one sample for every channel)
    pub const fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Bytes of PCM covering `duration` of playback
    pub fn bytes_for_duration(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.bytes_per_frame()
    }

    /// Playback time covered by `bytes` of PCM
    pub fn duration_for_bytes(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        Duration::from_micros((frames as u64 * 1_000_000) / self.sample_rate as u64)
    }
}

impl std::fmt::Display for AudioStreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} channel(s)",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_math() {
        let info = AudioStreamInfo::new(16_000, 16, 1);
        assert_eq!(info.bytes_per_sample(), 2);
        assert_eq!(info.bytes_per_frame(), 2);
        assert_eq!(info.bytes_for_duration(Duration::from_secs(1)), 32_000);

        let stereo = AudioStreamInfo::new(44_100, 16, 2);
        assert_eq!(stereo.bytes_per_frame(), 4);
        assert_eq!(stereo.bytes_for_duration(Duration::from_millis(10)), 441 * 4);
    }

    #[test]
    fn duration_roundtrip() {
        let info = AudioStreamInfo::new(16_000, 16, 1);
        let d = info.duration_for_bytes(32_000);
        assert_eq!(d, Duration::from_secs(1));
    }
}
