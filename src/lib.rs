//! # undertone
//!
//! Real-time PCM output engine for a single exclusive audio device.
//!
//! **Purpose:** Accept PCM from independent producers, buffer it safely
//! across threads, apply fixed-point volume scaling and cross-stream
//! ducking, and drain it to a hardware sink at a fixed rate without
//! underrun artifacts or priority-inversion stalls.
//!
//! **Architecture:** Producers feed [`pipeline::StreamPipeline`]s; the
//! [`pipeline::Combiner`] arbitrates media against announcements with Q15
//! ducking; the [`output::OutputTask`] drains the merged stream to an
//! [`audio::sink::AudioSink`]. The [`player::Player`] is the thin control
//! surface over all of it.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod player;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use player::{Player, PlayerState, PlayerStatus, TransportCommand};
