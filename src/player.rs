//! Player orchestration
//!
//! The externally visible controller. It accepts high-level commands,
//! owns the pipeline instances, the combiner and the output task, tracks
//! each task's lifecycle from its event stream, and publishes the
//! aggregate playback state.
//!
//! The control loop runs cooperatively on a fixed polling cadence. It is
//! the only place that touches externally observable state, and it owns
//! every `PipelineState` here; task threads report events and never mutate
//! shared state directly.

use crate::audio::ring_buffer::{PcmRingBuffer, RingConsumer};
use crate::audio::sink::AudioSink;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{CommandEvent, PipelineState, TaskEvent, COMMAND_QUEUE_DEPTH};
use crate::output::OutputTask;
use crate::pipeline::{Combiner, CombinerInput, PcmSource, StreamPipeline};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Transport-level commands with no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
    Toggle,
    Mute,
    Unmute,
    VolumeUp,
    VolumeDown,
}

/// Aggregate playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Announcing,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Announcing => write!(f, "announcing"),
        }
    }
}

/// Published "now playing" status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub volume: f32,
    pub muted: bool,
    /// Soft warning indicator; cleared when audio flows again
    pub warning: bool,
}

/// Volume step used by VolumeUp/VolumeDown
const VOLUME_STEP: f32 = 0.05;

enum PlayerCommand {
    Play {
        source: Box<dyn PcmSource>,
        announcement: bool,
    },
    Transport(TransportCommand),
    SetVolume(f32),
    SetDucking(f32),
    Shutdown,
}

impl fmt::Debug for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerCommand::Play { announcement, .. } => f
                .debug_struct("Play")
                .field("announcement", announcement)
                .finish_non_exhaustive(),
            PlayerCommand::Transport(cmd) => f.debug_tuple("Transport").field(cmd).finish(),
            PlayerCommand::SetVolume(v) => f.debug_tuple("SetVolume").field(v).finish(),
            PlayerCommand::SetDucking(r) => f.debug_tuple("SetDucking").field(r).finish(),
            PlayerCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Handle to a running player
pub struct Player {
    commands: mpsc::Sender<PlayerCommand>,
    status: watch::Receiver<PlayerStatus>,
    core: tokio::task::JoinHandle<()>,
}

impl Player {
    /// Start the engine on the current tokio runtime
    pub fn spawn(sink: Box<dyn AudioSink>, config: EngineConfig) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (core, status_rx) = PlayerCore::new(sink, config)?;
        let handle = tokio::spawn(core.run(command_rx));
        Ok(Self {
            commands: command_tx,
            status: status_rx,
            core: handle,
        })
    }

    /// Queue a source for playback
    ///
    /// An announcement interrupts politely: the media stream is ducked,
    /// not stopped, for the announcement's duration.
    pub async fn play(&self, source: Box<dyn PcmSource>, announcement: bool) -> Result<()> {
        self.send(PlayerCommand::Play {
            source,
            announcement,
        })
        .await
    }

    pub async fn transport(&self, cmd: TransportCommand) -> Result<()> {
        self.send(PlayerCommand::Transport(cmd)).await
    }

    pub async fn set_volume(&self, level: f32) -> Result<()> {
        self.send(PlayerCommand::SetVolume(level)).await
    }

    pub async fn set_ducking_ratio(&self, ratio: f32) -> Result<()> {
        self.send(PlayerCommand::SetDucking(ratio)).await
    }

    /// Watch channel carrying the published status
    pub fn status(&self) -> watch::Receiver<PlayerStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> PlayerStatus {
        self.status.borrow().clone()
    }

    /// Stop every pipeline and the output device, then wait for the core
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(PlayerCommand::Shutdown).await;
        self.core
            .await
            .map_err(|_| Error::InvalidState("player core panicked".into()))
    }

    async fn send(&self, cmd: PlayerCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| Error::ChannelClosed("player core"))
    }
}

/// Deferred pipeline start while the previous one tears down
struct PendingStart {
    source: Box<dyn PcmSource>,
    attempts_left: u32,
    next_attempt: Instant,
}

struct StreamSlot {
    label: &'static str,
    pipeline: Option<StreamPipeline>,
    input: Option<CombinerInput>,
    state: PipelineState,
    pending: Option<PendingStart>,
}

impl StreamSlot {
    fn new(label: &'static str, input: CombinerInput) -> Self {
        Self {
            label,
            pipeline: None,
            input: Some(input),
            state: PipelineState::Stopped,
            pending: None,
        }
    }
}

struct OutputSlot {
    task: Option<OutputTask>,
    state: PipelineState,
    idle: Option<(Box<dyn AudioSink>, RingConsumer)>,
    /// Device acquisition failed at setup; fatal for this output
    failed: bool,
}

struct PlayerCore {
    config: EngineConfig,
    output: OutputSlot,
    combiner: Combiner,
    media: StreamSlot,
    announcement: StreamSlot,
    volume: f32,
    muted: bool,
    paused: bool,
    warning: bool,
    ducking_ratio: f32,
    duck_active: bool,
    status_tx: watch::Sender<PlayerStatus>,
}

impl PlayerCore {
    fn new(
        sink: Box<dyn AudioSink>,
        config: EngineConfig,
    ) -> Result<(Self, watch::Receiver<PlayerStatus>)> {
        let (output_producer, output_consumer) =
            PcmRingBuffer::with_capacity(config.output_buffer_bytes);
        let (combiner, media_input, announcement_input) =
            Combiner::start(output_producer, &config)?;

        let volume = config.initial_volume.clamp(0.0, 1.0);
        let (status_tx, status_rx) = watch::channel(PlayerStatus {
            state: PlayerState::Idle,
            volume,
            muted: false,
            warning: false,
        });

        let core = Self {
            ducking_ratio: config.ducking_ratio.clamp(0.0, 1.0),
            config,
            output: OutputSlot {
                task: None,
                state: PipelineState::Stopped,
                idle: Some((sink, output_consumer)),
                failed: false,
            },
            combiner,
            media: StreamSlot::new("media", media_input),
            announcement: StreamSlot::new("announcement", announcement_input),
            volume,
            muted: false,
            paused: false,
            warning: false,
            duck_active: false,
            status_tx,
        };
        Ok((core, status_rx))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PlayerCommand>) {
        let mut tick = tokio::time::interval(self.config.poll_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("player running");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                _ = tick.tick() => self.poll(),
            }
        }

        self.shutdown_all();
        info!("player stopped");
    }

    fn handle_command(&mut self, cmd: PlayerCommand) {
        debug!("player command: {:?}", cmd);
        match cmd {
            PlayerCommand::Play {
                source,
                announcement,
            } => self.handle_play(source, announcement),
            PlayerCommand::Transport(cmd) => self.handle_transport(cmd),
            PlayerCommand::SetVolume(level) => {
                // An explicit volume change also unmutes, so the user hears
                // the level they just picked.
                self.volume = level.clamp(0.0, 1.0);
                self.muted = false;
                self.apply_output_volume();
                self.publish_status();
            }
            PlayerCommand::SetDucking(ratio) => {
                self.ducking_ratio = ratio.clamp(0.0, 1.0);
                if self.duck_active {
                    self.duck_media(self.ducking_ratio);
                }
            }
            PlayerCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_play(&mut self, source: Box<dyn PcmSource>, announcement: bool) {
        let info = source.stream_info();
        if info != self.config.stream_info {
            warn!(
                "rejecting source with {} (engine runs {})",
                info, self.config.stream_info
            );
            self.warning = true;
            self.publish_status();
            return;
        }

        self.ensure_output_running();

        if announcement {
            // Duck media exactly once, before the announcement starts
            if self.media.state.is_active() && !self.duck_active {
                self.duck_media(self.ducking_ratio);
                self.duck_active = true;
            }
            if self.announcement.state.is_stopped() {
                self.reclaim_if_finished(true);
                self.start_slot(true, source);
            } else {
                self.replace_slot(true, source);
            }
        } else {
            if self.paused {
                let _ = self.combiner.send_command(CommandEvent::Resume);
                self.paused = false;
            }
            if self.media.state.is_stopped() {
                self.reclaim_if_finished(false);
                self.start_slot(false, source);
            } else {
                self.replace_slot(false, source);
            }
        }
        self.publish_status();
    }

    fn handle_transport(&mut self, cmd: TransportCommand) {
        match cmd {
            TransportCommand::Play => {
                if self.paused {
                    let _ = self.combiner.send_command(CommandEvent::Resume);
                    self.paused = false;
                    self.ensure_output_running();
                }
            }
            TransportCommand::Pause => {
                let _ = self.combiner.send_command(CommandEvent::Pause);
                self.paused = true;
            }
            TransportCommand::Toggle => {
                let cmd = if self.paused {
                    TransportCommand::Play
                } else {
                    TransportCommand::Pause
                };
                self.handle_transport(cmd);
            }
            TransportCommand::Stop => {
                if let Some(pipeline) = &self.media.pipeline {
                    let _ = pipeline.stop();
                }
                self.media.pending = None;
                if self.paused {
                    let _ = self.combiner.send_command(CommandEvent::Resume);
                    self.paused = false;
                }
            }
            TransportCommand::Mute => {
                self.muted = true;
                self.apply_output_volume();
            }
            TransportCommand::Unmute => {
                self.muted = false;
                self.apply_output_volume();
            }
            TransportCommand::VolumeUp => {
                self.volume = (self.volume + VOLUME_STEP).min(1.0);
                self.muted = false;
                self.apply_output_volume();
            }
            TransportCommand::VolumeDown => {
                self.volume = (self.volume - VOLUME_STEP).max(0.0);
                self.muted = false;
                self.apply_output_volume();
            }
        }
        self.publish_status();
    }

    /// Per-tick poll: fold task events into state, run deferred starts,
    /// keep the output alive, and publish the aggregate status.
    fn poll(&mut self) {
        self.poll_output();
        self.poll_combiner();
        self.poll_slot(false);
        self.poll_slot(true);
        self.run_pending(false);
        self.run_pending(true);

        // A stream wants to play but the device was released on idle
        let needs_output = self.announcement.state.is_active()
            || (self.media.state.is_active() && !self.paused);
        if needs_output {
            self.ensure_output_running();
        }

        self.publish_status();
    }

    fn poll_output(&mut self) {
        loop {
            let Some(task) = &self.output.task else { break };
            let Some(event) = task.read_event() else { break };
            match &event {
                TaskEvent::Warning(Error::DeviceBusy) => {
                    error!("output device acquisition failed; output disabled");
                    self.output.failed = true;
                    self.warning = true;
                }
                TaskEvent::Warning(e) => {
                    warn!("output warning: {}", e);
                    self.warning = true;
                }
                TaskEvent::Running => self.warning = false,
                _ => {}
            }
            self.output.state.apply(&event);
            if matches!(event, TaskEvent::Stopped) {
                if let Some(task) = self.output.task.take() {
                    match task.join() {
                        Ok(parts) => self.output.idle = Some(parts),
                        Err(e) => {
                            error!("output task lost: {}", e);
                            self.output.failed = true;
                        }
                    }
                }
                break;
            }
        }
    }

    fn poll_combiner(&mut self) {
        while let Some(event) = self.combiner.read_event() {
            if let TaskEvent::Warning(e) = &event {
                warn!("combiner warning: {}", e);
                self.warning = true;
            }
        }
    }

    fn poll_slot(&mut self, announcement: bool) {
        loop {
            let slot = if announcement {
                &mut self.announcement
            } else {
                &mut self.media
            };
            let Some(pipeline) = &slot.pipeline else { break };
            let Some(event) = pipeline.read_event() else { break };

            match &event {
                TaskEvent::Warning(e) => {
                    warn!("{} pipeline warning: {}", slot.label, e);
                    self.warning = true;
                }
                TaskEvent::Running => self.warning = false,
                TaskEvent::Stopped => debug!("{} pipeline stopped", slot.label),
                _ => {}
            }
            slot.state.apply(&event);

            if matches!(event, TaskEvent::Stopped) {
                self.reclaim_if_finished(announcement);
                if announcement {
                    self.restore_duck_if_done();
                }
                break;
            }
        }
    }

    /// Move a finished pipeline's combiner input back into the slot
    fn reclaim_if_finished(&mut self, announcement: bool) {
        let slot = if announcement {
            &mut self.announcement
        } else {
            &mut self.media
        };
        if !slot.state.is_stopped() {
            return;
        }
        if let Some(pipeline) = slot.pipeline.take() {
            match pipeline.into_input() {
                Ok(input) => slot.input = Some(input),
                Err(e) => error!("{} pipeline lost its input slot: {}", slot.label, e),
            }
        }
    }

    /// Restore the media duck to unity exactly once per announcement
    fn restore_duck_if_done(&mut self) {
        if self.duck_active && self.announcement.pending.is_none() {
            self.duck_media(1.0);
            self.duck_active = false;
        }
    }

    fn duck_media(&mut self, ratio: f32) {
        if let Some(pipeline) = &self.media.pipeline {
            if self.media.state.is_active() {
                debug!("ducking media to ratio {}", ratio);
                let _ = pipeline.send_command(CommandEvent::Duck { ratio });
                return;
            }
        }
        // No live pipeline to address: set the gain on the idle input
        if let Some(input) = &self.media.input {
            input.set_duck(ratio);
        }
    }

    fn start_slot(&mut self, announcement: bool, source: Box<dyn PcmSource>) {
        let slot = if announcement {
            &mut self.announcement
        } else {
            &mut self.media
        };
        let Some(input) = slot.input.take() else {
            error!("{} input slot unavailable, dropping source", slot.label);
            self.warning = true;
            return;
        };
        match StreamPipeline::start(source, input, slot.label, &self.config) {
            Ok(pipeline) => {
                info!("started {} pipeline", slot.label);
                slot.pipeline = Some(pipeline);
                slot.state = PipelineState::Starting;
                // Media coming up underneath a live announcement starts ducked
                if !announcement && self.duck_active {
                    self.duck_media(self.ducking_ratio);
                }
            }
            Err(e) => {
                error!("failed to start {} pipeline: {}", slot.label, e);
                self.warning = true;
            }
        }
    }

    /// Stop the active pipeline and defer the new start until `Stopped`
    /// is observed, bounded by the configured retry-poll budget.
    fn replace_slot(&mut self, announcement: bool, source: Box<dyn PcmSource>) {
        let (attempts, interval) = if announcement {
            (
                self.config.announcement_retry_attempts,
                self.config.announcement_retry_interval(),
            )
        } else {
            (
                self.config.media_retry_attempts,
                self.config.media_retry_interval(),
            )
        };
        let slot = if announcement {
            &mut self.announcement
        } else {
            &mut self.media
        };
        if let Some(pipeline) = &slot.pipeline {
            let _ = pipeline.stop();
        }
        debug!("queueing {} start behind teardown", slot.label);
        slot.pending = Some(PendingStart {
            source,
            attempts_left: attempts,
            next_attempt: Instant::now() + interval,
        });
    }

    fn run_pending(&mut self, announcement: bool) {
        let slot = if announcement {
            &mut self.announcement
        } else {
            &mut self.media
        };
        if slot.pending.is_none() {
            return;
        }

        if slot.state.is_stopped() {
            self.reclaim_if_finished(announcement);
            let slot = if announcement {
                &mut self.announcement
            } else {
                &mut self.media
            };
            if let Some(pending) = slot.pending.take() {
                self.start_slot(announcement, pending.source);
            }
            return;
        }

        let interval = if announcement {
            self.config.announcement_retry_interval()
        } else {
            self.config.media_retry_interval()
        };
        let label = slot.label;
        let Some(pending) = slot.pending.as_mut() else { return };
        if Instant::now() >= pending.next_attempt {
            if pending.attempts_left <= 1 {
                warn!("{} pipeline did not stop in time, dropping queued source", label);
                slot.pending = None;
                self.warning = true;
            } else {
                pending.attempts_left -= 1;
                pending.next_attempt = Instant::now() + interval;
            }
        }
    }

    fn ensure_output_running(&mut self) {
        if self.output.failed || self.output.task.is_some() {
            return;
        }
        let Some((sink, consumer)) = self.output.idle.take() else {
            return;
        };
        match OutputTask::start(sink, consumer, self.config.stream_info, &self.config) {
            Ok(task) => {
                info!("output task started");
                self.output.state = PipelineState::Starting;
                self.output.task = Some(task);
                self.apply_output_volume();
            }
            Err(e) => {
                error!("failed to start output task: {}", e);
                self.output.failed = true;
                self.warning = true;
            }
        }
    }

    fn apply_output_volume(&mut self) {
        let level = if self.muted { 0.0 } else { self.volume };
        if let Some(task) = &self.output.task {
            let _ = task.send_command(CommandEvent::SetVolume { level });
        }
    }

    /// Recompute the aggregate state with the precedence
    /// announcing > paused > idle > playing, and publish on change.
    fn publish_status(&mut self) {
        let state = if self.announcement.state.is_active() {
            PlayerState::Announcing
        } else if self.paused {
            PlayerState::Paused
        } else if !self.media.state.is_active() {
            PlayerState::Idle
        } else {
            PlayerState::Playing
        };
        let status = PlayerStatus {
            state,
            volume: self.volume,
            muted: self.muted,
            warning: self.warning,
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn shutdown_all(&mut self) {
        debug!("player shutting down");
        for slot in [&self.media, &self.announcement] {
            if let Some(pipeline) = &slot.pipeline {
                let _ = pipeline.stop();
            }
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            self.poll_slot(false);
            self.poll_slot(true);
            if (self.media.pipeline.is_none() || self.media.state.is_stopped())
                && (self.announcement.pipeline.is_none() || self.announcement.state.is_stopped())
            {
                break;
            }
            if Instant::now() >= deadline {
                warn!("pipelines did not stop before shutdown deadline");
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.reclaim_if_finished(false);
        self.reclaim_if_finished(true);

        let _ = self.combiner.stop();
        if let Some(task) = self.output.task.take() {
            let _ = task.stop();
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Some(event) = task.read_event() {
                    if matches!(event, TaskEvent::Stopped) {
                        break;
                    }
                } else if Instant::now() >= deadline {
                    warn!("output task did not stop before shutdown deadline");
                    break;
                } else {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            if let Ok(parts) = task.join() {
                self.output.idle = Some(parts);
            }
        }
    }
}
