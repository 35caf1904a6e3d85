//! Multi-stream combiner
//!
//! Merges the pipeline streams into the output task's ingest ring. There
//! is no sample-summing mixer: the combiner is the sole writer of the
//! output ring, and each cycle forwards exactly one stream's chunk.
//! Priority arbitration decides which: an announcement chunk, when one is
//! available, takes the output path; otherwise the media chunk is
//! forwarded with the duck gain applied. Ducking is a Q15 attenuation, not
//! a mute, so media keeps flowing faintly underneath an announcement
//! rather than popping in and out.
//!
//! Pause is implemented here rather than in the media pipeline: a paused
//! media input simply stops being consumed, so no accepted audio is lost,
//! and announcements keep playing over a paused player.

use crate::audio::ring_buffer::{PcmRingBuffer, RingConsumer, RingProducer};
use crate::audio::volume::{apply_scale_bytes, scale_factor, UNITY_GAIN};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{
    command_channel, event_channel, send_command, CommandEvent, EventReporter, TaskEvent,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Which role an input plays in the arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPriority {
    /// Background stream, ducked while an announcement is active
    Media,
    /// Interrupting stream, takes the output path when it has data
    Announcement,
}

/// Writer handle to one combiner input
///
/// Held by the pipeline that produces this stream; the combiner keeps the
/// reading half. The duck gain travels with the handle so a pipeline can
/// apply a `Duck` command addressed to it.
pub struct CombinerInput {
    producer: RingProducer,
    gain: Arc<AtomicI16>,
    priority: InputPriority,
}

impl CombinerInput {
    /// Write PCM with backpressure; returns bytes accepted
    pub fn write(&mut self, bytes: &[u8], timeout: Duration) -> usize {
        self.producer.write(bytes, timeout)
    }

    /// Set this stream's duck gain from a normalized ratio (1.0 = unity)
    pub fn set_duck(&self, ratio: f32) {
        let factor = scale_factor(ratio);
        self.gain.store(factor, Ordering::Release);
        debug!("{:?} input duck factor set to {}", self.priority, factor);
    }

    /// Current Q15 gain applied by the combiner to this stream
    pub fn gain(&self) -> i16 {
        self.gain.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> InputPriority {
        self.priority
    }
}

struct CombinerInputBack {
    consumer: RingConsumer,
    gain: Arc<AtomicI16>,
}

fn input_pair(capacity: usize, priority: InputPriority) -> (CombinerInput, CombinerInputBack) {
    let (producer, consumer) = PcmRingBuffer::with_capacity(capacity);
    let gain = Arc::new(AtomicI16::new(UNITY_GAIN));
    (
        CombinerInput {
            producer,
            gain: Arc::clone(&gain),
            priority,
        },
        CombinerInputBack { consumer, gain },
    )
}

/// Handle to the running combiner task
pub struct Combiner {
    commands: Sender<CommandEvent>,
    events: Receiver<TaskEvent>,
    handle: Option<JoinHandle<()>>,
}

impl Combiner {
    /// Spawn the combiner thread as sole writer of `output`
    ///
    /// Returns the writer handles for the media and announcement inputs.
    pub fn start(
        output: RingProducer,
        config: &EngineConfig,
    ) -> Result<(Self, CombinerInput, CombinerInput)> {
        let (media_input, media_back) = input_pair(config.input_buffer_bytes, InputPriority::Media);
        let (announcement_input, announcement_back) =
            input_pair(config.input_buffer_bytes, InputPriority::Announcement);

        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let chunk_bytes = config.combine_chunk_bytes;
        let read_timeout = config.read_timeout();
        let write_timeout = config.write_timeout();

        let handle = thread::Builder::new()
            .name("audio-combiner".into())
            .spawn(move || {
                let reporter = EventReporter::new(event_tx, "audio-combiner");
                run_combine(
                    output,
                    media_back,
                    announcement_back,
                    chunk_bytes,
                    read_timeout,
                    write_timeout,
                    command_rx,
                    reporter,
                );
            })
            .map_err(|e| Error::ResourceExhaustion(format!("failed to spawn combiner: {}", e)))?;

        Ok((
            Self {
                commands: command_tx,
                events: event_rx,
                handle: Some(handle),
            },
            media_input,
            announcement_input,
        ))
    }

    pub fn send_command(&self, cmd: CommandEvent) -> Result<()> {
        send_command(&self.commands, cmd, "combiner")
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(CommandEvent::Stop)
    }

    /// Poll the status channel; never blocks
    pub fn read_event(&self) -> Option<TaskEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the combiner thread after `Stopped` was observed
    pub fn join(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::InvalidState("combiner panicked".into()))?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_combine(
    mut output: RingProducer,
    mut media: CombinerInputBack,
    mut announcement: CombinerInputBack,
    chunk_bytes: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    commands: Receiver<CommandEvent>,
    mut events: EventReporter,
) {
    events.lifecycle(TaskEvent::Starting);

    let mut chunk: Vec<u8> = Vec::new();
    if chunk.try_reserve_exact(chunk_bytes).is_err() {
        events.lifecycle(TaskEvent::Warning(Error::ResourceExhaustion(format!(
            "combine buffer of {} bytes",
            chunk_bytes
        ))));
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return;
    }
    chunk.resize(chunk_bytes, 0);

    events.lifecycle(TaskEvent::Started);
    info!("combiner running");

    let mut paused = false;
    // Bytes accepted from an input but not yet written to the output ring
    let mut pending: Vec<u8> = Vec::new();

    'combine: loop {
        loop {
            match commands.try_recv() {
                Ok(CommandEvent::Stop) => break 'combine,
                Ok(CommandEvent::Pause) => {
                    debug!("combiner pausing media input");
                    paused = true;
                }
                Ok(CommandEvent::Resume) => {
                    debug!("combiner resuming media input");
                    paused = false;
                }
                Ok(CommandEvent::Duck { ratio }) => {
                    media.gain.store(scale_factor(ratio), Ordering::Release);
                }
                Ok(cmd) => trace!("combiner ignoring {:?}", cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("combiner command channel closed, stopping");
                    break 'combine;
                }
            }
        }

        // Finish a carried-over chunk before consuming new input, so
        // backpressure from the output ring never drops accepted bytes.
        if !pending.is_empty() {
            let written = output.write(&pending, write_timeout);
            pending.drain(..written);
            if !pending.is_empty() {
                continue;
            }
        }

        // Announcement input owns the output path whenever it has data
        let n = announcement.consumer.read(&mut chunk, read_timeout);
        if n > 0 {
            apply_scale_bytes(&mut chunk[..n], announcement.gain.load(Ordering::Acquire));
            forward(&mut output, &chunk[..n], &mut pending, write_timeout);
            events.running();
            continue;
        }

        if paused {
            events.idle();
            continue;
        }

        let n = media.consumer.read(&mut chunk, read_timeout);
        if n > 0 {
            apply_scale_bytes(&mut chunk[..n], media.gain.load(Ordering::Acquire));
            forward(&mut output, &chunk[..n], &mut pending, write_timeout);
            events.running();
        } else {
            events.idle();
        }
    }

    events.lifecycle(TaskEvent::Stopping);
    events.lifecycle(TaskEvent::Stopped);
    info!("combiner stopped");
}

fn forward(output: &mut RingProducer, bytes: &[u8], pending: &mut Vec<u8>, timeout: Duration) {
    let written = output.write(bytes, timeout);
    if written < bytes.len() {
        pending.extend_from_slice(&bytes[written..]);
    }
}
