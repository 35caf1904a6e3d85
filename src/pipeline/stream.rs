//! Stream pipeline
//!
//! Wraps one produce loop around a [`PcmSource`], forwarding its PCM into
//! a combiner input on a dedicated thread and surfacing lifecycle events.
//! The pipeline's `Stopped` event is the only trustworthy signal that its
//! combiner input slot is free again; [`StreamPipeline::into_input`] makes
//! that structural by returning the slot only after the thread has
//! finished.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{
    command_channel, event_channel, send_command, CommandEvent, EventReporter, TaskEvent,
};
use crate::pipeline::combiner::CombinerInput;
use crate::pipeline::source::PcmSource;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Handle to one running produce loop
pub struct StreamPipeline {
    label: String,
    commands: Sender<CommandEvent>,
    events: Receiver<TaskEvent>,
    handle: Option<JoinHandle<CombinerInput>>,
}

impl StreamPipeline {
    /// Spawn the produce loop for `source`, writing into `input`
    pub fn start(
        source: Box<dyn PcmSource>,
        input: CombinerInput,
        label: &str,
        config: &EngineConfig,
    ) -> Result<Self> {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let chunk_bytes = config.combine_chunk_bytes;
        let write_timeout = config.write_timeout();
        let thread_label = label.to_string();

        let handle = thread::Builder::new()
            .name(format!("pipeline-{}", label))
            .spawn(move || {
                let reporter = EventReporter::new(event_tx, "pipeline");
                run_produce(
                    source,
                    input,
                    thread_label,
                    chunk_bytes,
                    write_timeout,
                    command_rx,
                    reporter,
                )
            })
            .map_err(|e| Error::ResourceExhaustion(format!("failed to spawn pipeline: {}", e)))?;

        Ok(Self {
            label: label.to_string(),
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn send_command(&self, cmd: CommandEvent) -> Result<()> {
        send_command(&self.commands, cmd, "pipeline")
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(CommandEvent::Stop)
    }

    /// Poll the status channel; never blocks
    pub fn read_event(&self) -> Option<TaskEvent> {
        self.events.try_recv().ok()
    }

    /// Reclaim the combiner input after `Stopped` was observed
    pub fn into_input(mut self) -> Result<CombinerInput> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidState("pipeline already joined".into()))?;
        handle
            .join()
            .map_err(|_| Error::InvalidState("pipeline panicked".into()))
    }
}

fn run_produce(
    mut source: Box<dyn PcmSource>,
    mut input: CombinerInput,
    label: String,
    chunk_bytes: usize,
    write_timeout: Duration,
    commands: Receiver<CommandEvent>,
    mut events: EventReporter,
) -> CombinerInput {
    events.lifecycle(TaskEvent::Starting);
    debug!("pipeline {} starting, {}", label, source.stream_info());

    let mut chunk: Vec<u8> = Vec::new();
    if chunk.try_reserve_exact(chunk_bytes).is_err() {
        events.lifecycle(TaskEvent::Warning(Error::ResourceExhaustion(format!(
            "produce buffer of {} bytes",
            chunk_bytes
        ))));
        events.lifecycle(TaskEvent::Stopping);
        events.lifecycle(TaskEvent::Stopped);
        return input;
    }
    chunk.resize(chunk_bytes, 0);

    events.lifecycle(TaskEvent::Started);

    // Bytes read from the source but not yet accepted by the input ring
    let mut pending: Vec<u8> = Vec::new();

    'produce: loop {
        loop {
            match commands.try_recv() {
                Ok(CommandEvent::Stop) => {
                    debug!("pipeline {} stopping on command", label);
                    break 'produce;
                }
                Ok(CommandEvent::Duck { ratio }) => input.set_duck(ratio),
                Ok(cmd) => trace!("pipeline {} ignoring {:?}", label, cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("pipeline {} command channel closed, stopping", label);
                    break 'produce;
                }
            }
        }

        if !pending.is_empty() {
            let written = input.write(&pending, write_timeout);
            pending.drain(..written);
            if !pending.is_empty() {
                // Backpressure: keep retrying while staying command-responsive
                continue;
            }
        }

        match source.read(&mut chunk) {
            Ok(0) => {
                debug!("pipeline {} source exhausted", label);
                break;
            }
            Ok(n) => {
                let written = input.write(&chunk[..n], write_timeout);
                if written < n {
                    pending.extend_from_slice(&chunk[written..n]);
                }
                events.running();
            }
            Err(e) => {
                warn!("pipeline {} source error: {}", label, e);
                events.lifecycle(TaskEvent::Warning(e));
                break;
            }
        }
    }

    // Flush what the source already handed over, bounded by one timeout
    if !pending.is_empty() {
        let written = input.write(&pending, write_timeout);
        pending.drain(..written);
        if !pending.is_empty() {
            debug!(
                "pipeline {} dropping {} unflushed bytes on stop",
                label,
                pending.len()
            );
        }
    }

    events.lifecycle(TaskEvent::Stopping);
    events.lifecycle(TaskEvent::Stopped);
    info!("pipeline {} stopped", label);
    input
}
