//! Command and status messaging between engine contexts
//!
//! Every task in the engine (output drainer, combiner, stream pipelines)
//! talks to the control plane through exactly two channels:
//!
//! - a **command channel** carrying [`CommandEvent`] downward. Commands are
//!   never silently dropped: the sender blocks up to a bounded timeout and
//!   surfaces an error if the command could not be enqueued.
//! - a **status channel** carrying [`TaskEvent`] upward. The consumer polls
//!   with `try_recv` and is never blocked. Steady-state `Running`/`Idle`
//!   reports are edge-triggered so a slow consumer is not flooded;
//!   lifecycle events are always delivered in order.
//!
//! Typed tagged unions replace set/clear bitmask signaling: each variant is
//! consumed exactly once, so there is no stale-bit discipline to get wrong.

use crate::error::Error;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Depth of each per-task command queue
pub const COMMAND_QUEUE_DEPTH: usize = 20;

/// Depth of each per-task status queue
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Bounded blocking time for command sends from the control plane
pub const COMMAND_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounded blocking time for lifecycle event sends from a task context
const EVENT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Commands sent down a single-producer command channel per task
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandEvent {
    /// Stop now; unplayed buffered audio may be discarded
    Stop,
    /// Stop once all buffered audio has been drained
    StopGracefully,
    /// Stop consuming the media input (audio is held, not lost)
    Pause,
    /// Resume consuming the media input
    Resume,
    /// Attenuate the subordinate stream by `ratio` (1.0 restores unity)
    Duck { ratio: f32 },
    /// Change the output volume level (0.0 to 1.0)
    SetVolume { level: f32 },
}

/// Status events sent up a single-producer, single-consumer channel per task
#[derive(Debug)]
pub enum TaskEvent {
    Starting,
    Started,
    Running,
    Idle,
    Stopping,
    Stopped,
    Warning(Error),
}

/// Lifecycle state of a pipeline or task, inferred from its events
///
/// Owned exclusively by the consumer of that task's event stream; the
/// producer side never mutates it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Stopped,
    Starting,
    Started,
    Playing,
    Stopping,
}

impl PipelineState {
    /// Fold one observed event into the state
    pub fn apply(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::Starting => *self = PipelineState::Starting,
            TaskEvent::Started => *self = PipelineState::Started,
            TaskEvent::Running | TaskEvent::Idle => *self = PipelineState::Playing,
            TaskEvent::Stopping => *self = PipelineState::Stopping,
            TaskEvent::Stopped => *self = PipelineState::Stopped,
            TaskEvent::Warning(_) => {}
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PipelineState::Stopped)
    }

    /// True while the task holds resources (anything before Stopping)
    pub fn is_active(&self) -> bool {
        !matches!(self, PipelineState::Stopping | PipelineState::Stopped)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Started => write!(f, "started"),
            PipelineState::Playing => write!(f, "playing"),
            PipelineState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Create a bounded command channel
pub fn command_channel() -> (Sender<CommandEvent>, Receiver<CommandEvent>) {
    bounded(COMMAND_QUEUE_DEPTH)
}

/// Create a bounded status channel
pub fn event_channel() -> (Sender<TaskEvent>, Receiver<TaskEvent>) {
    bounded(EVENT_QUEUE_DEPTH)
}

/// Send a command with bounded blocking, surfacing failure to the caller
pub fn send_command(
    tx: &Sender<CommandEvent>,
    cmd: CommandEvent,
    target: &'static str,
) -> Result<(), Error> {
    tx.send_timeout(cmd, COMMAND_SEND_TIMEOUT)
        .map_err(|_| Error::ChannelClosed(target))
}

/// Status reporter used from a task context
///
/// Lifecycle events (`Starting`, `Started`, `Stopping`, `Stopped`,
/// `Warning`) are sent with a bounded blocking timeout so a wedged consumer
/// cannot stall the audio path forever. `Running`/`Idle` are edge-triggered
/// and lossy: only a change in steadiness is reported, via `try_send`.
pub struct EventReporter {
    tx: Sender<TaskEvent>,
    /// Some(true) after Running was reported, Some(false) after Idle
    steady: Option<bool>,
    name: &'static str,
}

impl EventReporter {
    pub fn new(tx: Sender<TaskEvent>, name: &'static str) -> Self {
        Self {
            tx,
            steady: None,
            name,
        }
    }

    pub fn lifecycle(&mut self, event: TaskEvent) {
        self.steady = None;
        if self.tx.send_timeout(event, EVENT_SEND_TIMEOUT).is_err() {
            warn!("{}: status consumer not draining, lifecycle event lost", self.name);
        }
    }

    pub fn running(&mut self) {
        if self.steady != Some(true) {
            self.steady = Some(true);
            let _ = self.tx.try_send(TaskEvent::Running);
        }
    }

    pub fn idle(&mut self) {
        if self.steady != Some(false) {
            self.steady = Some(false);
            let _ = self.tx.try_send(TaskEvent::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_state_follows_event_order() {
        let mut state = PipelineState::Stopped;
        for (event, expected) in [
            (TaskEvent::Starting, PipelineState::Starting),
            (TaskEvent::Started, PipelineState::Started),
            (TaskEvent::Running, PipelineState::Playing),
            (TaskEvent::Idle, PipelineState::Playing),
            (TaskEvent::Stopping, PipelineState::Stopping),
            (TaskEvent::Stopped, PipelineState::Stopped),
        ] {
            state.apply(&event);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn warning_does_not_change_state() {
        let mut state = PipelineState::Playing;
        state.apply(&TaskEvent::Warning(Error::DeviceBusy));
        assert_eq!(state, PipelineState::Playing);
    }

    #[test]
    fn steady_reports_are_edge_triggered() {
        let (tx, rx) = event_channel();
        let mut reporter = EventReporter::new(tx, "test");

        reporter.running();
        reporter.running();
        reporter.running();
        reporter.idle();
        reporter.idle();
        reporter.running();

        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Running)));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Idle)));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Running)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn lifecycle_resets_steady_edge() {
        let (tx, rx) = event_channel();
        let mut reporter = EventReporter::new(tx, "test");

        reporter.running();
        reporter.lifecycle(TaskEvent::Stopping);
        reporter.running();

        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Running)));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Stopping)));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Running)));
    }

    #[test]
    fn send_command_surfaces_disconnect() {
        let (tx, rx) = command_channel();
        drop(rx);
        assert!(send_command(&tx, CommandEvent::Stop, "output").is_err());
    }
}
