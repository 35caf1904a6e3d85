//! Engine configuration
//!
//! All tunables for the streaming engine in one serde-friendly struct.
//! Durations are stored as integer milliseconds and exposed through accessor
//! methods returning [`Duration`], so a host application can deserialize the
//! whole struct from whatever source it likes.
//!
//! Buffer capacities trade memory for underrun resilience; they are
//! configuration parameters, not constants.

use crate::audio::AudioStreamInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the streaming engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream format shared by all producers and the sink.
    ///
    /// Immutable while the sink is configured; changing it requires a full
    /// stop/reconfigure/restart cycle of the output task.
    pub stream_info: AudioStreamInfo,

    /// Capacity of the output task's ingest ring buffer, in bytes
    pub output_buffer_bytes: usize,

    /// Capacity of each pipeline's combiner input ring buffer, in bytes
    pub input_buffer_bytes: usize,

    /// Drain chunk size, in bytes (sized to the sink's native transfer granularity)
    pub output_chunk_bytes: usize,

    /// Chunk size used when forwarding PCM between rings, in bytes
    pub combine_chunk_bytes: usize,

    /// Per-cycle bounded blocking time for ring buffer reads
    pub read_timeout_ms: u64,

    /// Per-cycle bounded blocking time for ring buffer and sink writes
    pub write_timeout_ms: u64,

    /// Duration of input starvation after which a running output tears
    /// itself down and releases the hardware device
    pub idle_timeout_ms: u64,

    /// Control-plane polling cadence
    pub poll_interval_ms: u64,

    /// Retry-poll attempts when replacing an active media pipeline
    pub media_retry_attempts: u32,
    /// Interval between media retry-poll attempts
    pub media_retry_interval_ms: u64,

    /// Retry-poll attempts when replacing an active announcement pipeline
    pub announcement_retry_attempts: u32,
    /// Interval between announcement retry-poll attempts
    pub announcement_retry_interval_ms: u64,

    /// Volume applied until the first SetVolume command arrives (0.0 to 1.0)
    pub initial_volume: f32,

    /// Ducking ratio applied to media while an announcement plays (0.0 to 1.0)
    pub ducking_ratio: f32,

    /// Consecutive short sink writes tolerated before the drain loop stops
    pub max_consecutive_short_writes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_info: AudioStreamInfo::new(16_000, 16, 1),
            // 8192 samples of 16-bit audio, kept small for fast pausing
            output_buffer_bytes: 16 * 1024,
            input_buffer_bytes: 8 * 1024,
            // Four 512-frame DMA-style transfers of 16-bit samples
            output_chunk_bytes: 4096,
            combine_chunk_bytes: 2048,
            read_timeout_ms: 10,
            write_timeout_ms: 20,
            idle_timeout_ms: 500,
            poll_interval_ms: 20,
            media_retry_attempts: 3,
            media_retry_interval_ms: 60,
            announcement_retry_attempts: 3,
            announcement_retry_interval_ms: 20,
            initial_volume: 1.0,
            ducking_ratio: 0.3,
            max_consecutive_short_writes: 3,
        }
    }
}

impl EngineConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn media_retry_interval(&self) -> Duration {
        Duration::from_millis(self.media_retry_interval_ms)
    }

    pub fn announcement_retry_interval(&self) -> Duration {
        Duration::from_millis(self.announcement_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = EngineConfig::default();
        assert!(cfg.output_chunk_bytes <= cfg.output_buffer_bytes);
        assert!(cfg.combine_chunk_bytes <= cfg.input_buffer_bytes);
        assert_eq!(cfg.stream_info.sample_rate, 16_000);
        assert_eq!(cfg.read_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn retry_poll_defaults_match_announcement_and_media_cadence() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.announcement_retry_attempts, 3);
        assert_eq!(cfg.announcement_retry_interval(), Duration::from_millis(20));
        assert_eq!(cfg.media_retry_attempts, 3);
        assert_eq!(cfg.media_retry_interval(), Duration::from_millis(60));
    }
}
