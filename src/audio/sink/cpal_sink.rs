//! Desktop sink adapter over cpal
//!
//! Bridges the blocking-write sink contract onto cpal's pull-model output
//! stream: `write` feeds a ring buffer and the device callback drains it,
//! emitting silence on underrun. cpal streams are not `Send`, so the
//! stream lives on a dedicated thread that holds it until release.

use super::{AudioSink, SinkError};
use crate::audio::ring_buffer::{PcmRingBuffer, RingConsumer, RingProducer};
use crate::audio::AudioStreamInfo;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Process-wide exclusive claim on the output device
static DEVICE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Ring capacity handed to the device callback, in bytes
const STREAM_BUFFER_BYTES: usize = 16 * 1024;

/// [`AudioSink`] implementation backed by the default cpal output device
pub struct CpalSink {
    acquired: bool,
    producer: Option<RingProducer>,
    stop_tx: Option<Sender<()>>,
    flush: Arc<AtomicBool>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            acquired: false,
            producer: None,
            stop_tx: None,
            flush: Arc::new(AtomicBool::new(false)),
        }
    }

    fn teardown_stream(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        self.producer = None;
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalSink {
    fn try_acquire(&mut self) -> bool {
        if self.acquired {
            return false;
        }
        if DEVICE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.acquired = true;
            true
        } else {
            false
        }
    }

    fn configure(&mut self, info: &AudioStreamInfo) -> Result<(), SinkError> {
        if !self.acquired {
            return Err(SinkError::Busy);
        }
        if info.bits_per_sample != 16 {
            return Err(SinkError::Unsupported(format!(
                "cpal adapter handles 16-bit PCM only, got {}-bit",
                info.bits_per_sample
            )));
        }

        self.teardown_stream();

        let (producer, consumer) = PcmRingBuffer::with_capacity(STREAM_BUFFER_BYTES);
        let (ready_tx, ready_rx) = bounded::<Result<(), SinkError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let flush = Arc::clone(&self.flush);
        let info = *info;

        thread::Builder::new()
            .name("cpal-sink".into())
            .spawn(move || {
                let stream = match build_stream(&info, consumer, flush) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Keep the stream alive until release or sink drop
                let _ = stop_rx.recv();
                drop(stream);
                debug!("cpal output stream closed");
            })
            .map_err(|e| SinkError::Fault(format!("failed to spawn stream thread: {}", e)))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.producer = Some(producer);
                self.stop_tx = Some(stop_tx);
                info!("cpal sink configured for {}", info);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SinkError::Fault("stream thread did not respond".into())),
        }
    }

    fn write(&mut self, pcm: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| SinkError::Fault("sink not configured".into()))?;
        Ok(producer.write(pcm, timeout))
    }

    fn zero_output(&mut self) {
        // The callback owns the ring consumer; ask it to reset on its side
        self.flush.store(true, Ordering::Release);
    }

    fn release(&mut self) {
        self.teardown_stream();
        if self.acquired {
            self.acquired = false;
            DEVICE_CLAIMED.store(false, Ordering::Release);
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_stream(
    info: &AudioStreamInfo,
    consumer: RingConsumer,
    flush: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SinkError::Fault("no default output device".into()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| SinkError::Fault(format!("failed to enumerate configs: {}", e)))?
        .find(|range| {
            range.channels() == info.channels
                && range.min_sample_rate().0 <= info.sample_rate
                && range.max_sample_rate().0 >= info.sample_rate
                && matches!(range.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        .ok_or_else(|| {
            SinkError::Unsupported(format!("device does not support {}", info))
        })?;

    let sample_format = supported.sample_format();
    let config = supported
        .with_sample_rate(SampleRate(info.sample_rate))
        .config();
    debug!(
        "cpal stream: rate={} channels={} format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_i16(&device, &config, consumer, flush),
        SampleFormat::F32 => build_stream_f32(&device, &config, consumer, flush),
        other => {
            return Err(SinkError::Unsupported(format!(
                "unsupported device sample format: {:?}",
                other
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| SinkError::Fault(format!("failed to start stream: {}", e)))?;
    Ok(stream)
}

fn build_stream_i16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: RingConsumer,
    flush: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let mut scratch: Vec<u8> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                if flush.swap(false, Ordering::AcqRel) {
                    consumer.reset();
                }
                scratch.resize(data.len() * 2, 0);
                let n = consumer.read(&mut scratch, Duration::ZERO);
                for (i, sample) in data.iter_mut().enumerate() {
                    *sample = if i * 2 + 1 < n {
                        i16::from_le_bytes([scratch[i * 2], scratch[i * 2 + 1]])
                    } else {
                        0
                    };
                }
            },
            |err| error!("cpal stream error: {}", err),
            None,
        )
        .map_err(|e| SinkError::Fault(format!("failed to build stream: {}", e)))
}

fn build_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: RingConsumer,
    flush: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let mut scratch: Vec<u8> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if flush.swap(false, Ordering::AcqRel) {
                    consumer.reset();
                }
                scratch.resize(data.len() * 2, 0);
                let n = consumer.read(&mut scratch, Duration::ZERO);
                for (i, sample) in data.iter_mut().enumerate() {
                    *sample = if i * 2 + 1 < n {
                        let s = i16::from_le_bytes([scratch[i * 2], scratch[i * 2 + 1]]);
                        s as f32 / 32768.0
                    } else {
                        0.0
                    };
                }
            },
            |err| error!("cpal stream error: {}", err),
            None,
        )
        .map_err(|e| SinkError::Fault(format!("failed to build stream: {}", e)))
}
