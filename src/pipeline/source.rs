//! PCM producers
//!
//! Decoding a container or codec into PCM is an external concern; the
//! engine consumes any [`PcmSource`]. The two implementations here cover
//! the demo binary and the test suite: a sine generator and an in-memory
//! buffer.

use crate::audio::AudioStreamInfo;
use crate::error::Result;
use std::f32::consts::TAU;

/// A producer of raw PCM bytes in one fixed stream format
pub trait PcmSource: Send {
    /// Format of the produced stream; must not change once produced
    fn stream_info(&self) -> AudioStreamInfo;

    /// Fill `buf` with the next PCM bytes; 0 means end of stream
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// In-memory PCM buffer source
pub struct MemorySource {
    info: AudioStreamInfo,
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    pub fn new(info: AudioStreamInfo, data: Vec<u8>) -> Self {
        Self {
            info,
            data,
            position: 0,
        }
    }

    /// Build from 16-bit samples, serializing little-endian
    pub fn from_samples(info: AudioStreamInfo, samples: &[i16]) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(info, data)
    }
}

impl PcmSource for MemorySource {
    fn stream_info(&self) -> AudioStreamInfo {
        self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.position..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Sine wave generator, 16-bit output
pub struct ToneSource {
    info: AudioStreamInfo,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    remaining_frames: Option<u64>,
}

impl ToneSource {
    /// `duration_frames` of None produces an endless tone
    pub fn new(
        info: AudioStreamInfo,
        frequency: f32,
        amplitude: f32,
        duration_frames: Option<u64>,
    ) -> Self {
        Self {
            info,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            remaining_frames: duration_frames,
        }
    }
}

impl PcmSource for ToneSource {
    fn stream_info(&self) -> AudioStreamInfo {
        self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bytes_per_frame = self.info.bytes_per_frame();
        let mut frames = buf.len() / bytes_per_frame;
        if let Some(remaining) = self.remaining_frames {
            frames = frames.min(remaining as usize);
        }
        if frames == 0 {
            return Ok(0);
        }

        let step = self.frequency * TAU / self.info.sample_rate as f32;
        for frame in 0..frames {
            let value = (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16;
            self.phase = (self.phase + step) % TAU;
            let bytes = value.to_le_bytes();
            for channel in 0..self.info.channels as usize {
                let offset = frame * bytes_per_frame + channel * 2;
                buf[offset..offset + 2].copy_from_slice(&bytes);
            }
        }

        if let Some(remaining) = &mut self.remaining_frames {
            *remaining -= frames as u64;
        }
        Ok(frames * bytes_per_frame)
    }
}
