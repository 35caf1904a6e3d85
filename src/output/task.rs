//! Output drain task
//!
//! Owns the consumer half of the ingest ring buffer and the hardware sink
//! handle for its entire running lifetime, on a dedicated thread. The
//! lifecycle is Stopped -> Starting -> Running -> Stopping -> Stopped,
//! with the terminal state reused as the initial state: a finished task can
//! be joined to reclaim the sink and ring, and a fresh `start` begins a new
//! run.
//!
//! Per drain cycle the task polls its command channel, reads up to one
//! sink-granularity chunk from the ring with a bounded timeout, applies the
//! Q15 volume factor, and writes to the sink. Zero bytes read means the
//! sink's pending output is zeroed so stale audio is not repeated; when
//! starvation outlasts the idle timeout the task stops itself and releases
//! the exclusive hardware lock rather than holding it while silent.

use crate::audio::ring_buffer::RingConsumer;
use crate::audio::sink::AudioSink;
use crate::audio::volume::{apply_scale_bytes, scale_factor};
use crate::audio::AudioStreamInfo;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{
    command_channel, event_channel, send_command, CommandEvent, EventReporter, TaskEvent,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

struct DrainConfig {
    chunk_bytes: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    max_consecutive_short_writes: u32,
    initial_volume: f32,
}

/// Handle to a running output drain task
pub struct OutputTask {
    commands: Sender<CommandEvent>,
    events: Receiver<TaskEvent>,
    handle: Option<JoinHandle<(Box<dyn AudioSink>, RingConsumer)>>,
}

impl OutputTask {
    /// Spawn the drain thread and begin the Starting transition
    ///
    /// Every startup failure path still emits `Stopped`, so a caller
    /// waiting on lifecycle completion is never left hanging; the sink and
    /// ring consumer stay reclaimable through [`OutputTask::join`].
    pub fn start(
        sink: Box<dyn AudioSink>,
        consumer: RingConsumer,
        info: AudioStreamInfo,
        config: &EngineConfig,
    ) -> Result<Self> {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let drain = DrainConfig {
            chunk_bytes: config.output_chunk_bytes,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle_timeout: config.idle_timeout(),
            max_consecutive_short_writes: config.max_consecutive_short_writes,
            initial_volume: config.initial_volume,
        };

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let reporter = EventReporter::new(event_tx, "audio-output");
                run_drain(sink, consumer, info, drain, command_rx, reporter)
            })
            .map_err(|e| Error::ResourceExhaustion(format!("failed to spawn output task: {}", e)))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    /// Send a command; blocks up to a bounded timeout, never drops silently
    pub fn send_command(&self, cmd: CommandEvent) -> Result<()> {
        send_command(&self.commands, cmd, "output task")
    }

    /// Stop now, discarding any unplayed buffered audio
    pub fn stop(&self) -> Result<()> {
        self.send_command(CommandEvent::Stop)
    }

    /// Stop once all buffered audio has been drained to the sink
    pub fn finish(&self) -> Result<()> {
        self.send_command(CommandEvent::StopGracefully)
    }

    /// Poll the status channel; never blocks
    pub fn read_event(&self) -> Option<TaskEvent> {
        self.events.try_recv().ok()
    }

    /// Reclaim the sink and ring consumer after `Stopped` was observed
    pub fn join(mut self) -> Result<(Box<dyn AudioSink>, RingConsumer)> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidState("output task already joined".into()))?;
        handle
            .join()
            .map_err(|_| Error::InvalidState("output task panicked".into()))
    }
}

fn run_drain(
    mut sink: Box<dyn AudioSink>,
    mut consumer: RingConsumer,
    info: AudioStreamInfo,
    cfg: DrainConfig,
    commands: Receiver<CommandEvent>,
    mut events: EventReporter,
) -> (Box<dyn AudioSink>, RingConsumer) {
    events.lifecycle(TaskEvent::Starting);
    debug!("starting output drain for {}", info);

    // Wider samples would be corrupted by the Q15 scaler; refuse them
    // outright instead of passing them through unscaled.
    if info.bits_per_sample > 16 {
        events.lifecycle(TaskEvent::Warning(Error::UnsupportedFormat(format!(
            "{}-bit samples exceed the 16-bit output path",
            info.bits_per_sample
        ))));
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return (sink, consumer);
    }

    if !sink.try_acquire() {
        events.lifecycle(TaskEvent::Warning(Error::DeviceBusy));
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return (sink, consumer);
    }

    if let Err(e) = sink.configure(&info) {
        events.lifecycle(TaskEvent::Warning(Error::DeviceFault(e)));
        sink.release();
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return (sink, consumer);
    }

    let mut chunk: Vec<u8> = Vec::new();
    if chunk.try_reserve_exact(cfg.chunk_bytes).is_err() {
        events.lifecycle(TaskEvent::Warning(Error::ResourceExhaustion(format!(
            "drain buffer of {} bytes",
            cfg.chunk_bytes
        ))));
        sink.release();
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return (sink, consumer);
    }
    chunk.resize(cfg.chunk_bytes, 0);

    events.lifecycle(TaskEvent::Started);
    info!("output drain running");

    let mut volume_factor = scale_factor(cfg.initial_volume);
    let mut stop_gracefully = false;
    let mut consecutive_short_writes = 0u32;
    let mut last_data = Instant::now();

    'drain: loop {
        if last_data.elapsed() > cfg.idle_timeout {
            debug!("no data within idle timeout, releasing the output device");
            break;
        }

        loop {
            match commands.try_recv() {
                Ok(CommandEvent::Stop) => {
                    sink.zero_output();
                    break 'drain;
                }
                Ok(CommandEvent::StopGracefully) => stop_gracefully = true,
                Ok(CommandEvent::SetVolume { level }) => {
                    volume_factor = scale_factor(level);
                    debug!("output volume factor set to {}", volume_factor);
                }
                Ok(cmd) => trace!("output task ignoring {:?}", cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("output command channel closed, stopping");
                    sink.zero_output();
                    break 'drain;
                }
            }
        }

        let n = consumer.read(&mut chunk, cfg.read_timeout);
        if n > 0 {
            last_data = Instant::now();
            apply_scale_bytes(&mut chunk[..n], volume_factor);

            match sink.write(&chunk[..n], cfg.write_timeout) {
                Ok(written) if written == n => {
                    consecutive_short_writes = 0;
                    events.running();
                }
                Ok(written) => {
                    consecutive_short_writes += 1;
                    events.lifecycle(TaskEvent::Warning(Error::SizeMismatch {
                        expected: n,
                        written,
                    }));
                    if consecutive_short_writes >= cfg.max_consecutive_short_writes {
                        warn!(
                            "{} consecutive short writes, stopping output",
                            consecutive_short_writes
                        );
                        break;
                    }
                }
                Err(e) => {
                    warn!("sink write fault: {}", e);
                    events.lifecycle(TaskEvent::Warning(Error::DeviceFault(e)));
                    break;
                }
            }
        } else {
            // Starved: clear pending output so the sink does not repeat
            // stale audio, and report idleness upward.
            sink.zero_output();
            events.idle();
            if stop_gracefully {
                debug!("ring buffer drained, completing graceful stop");
                break;
            }
        }
    }

    events.lifecycle(TaskEvent::Stopping);
    sink.zero_output();
    sink.release();
    events.lifecycle(TaskEvent::Stopped);
    info!("output drain stopped");
    (sink, consumer)
}
