//! Hardware sink boundary
//!
//! The literal peripheral write is an external collaborator. The engine
//! sees it only through [`AudioSink`]: an exclusive-lock resource that is
//! configured once per run, written in chunks with a bounded timeout, and
//! released unconditionally on every teardown path.

mod cpal_sink;
mod mock;

pub use cpal_sink::CpalSink;
pub use mock::{MockSink, MockSinkHandle, WriteOutcome};

use crate::audio::AudioStreamInfo;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a hardware sink implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The device's exclusive lock is already held
    #[error("device is busy")]
    Busy,

    /// The device cannot handle the requested stream format
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// Driver-level configuration or I/O failure
    #[error("device fault: {0}")]
    Fault(String),
}

/// Blocking interface to an exclusive audio output device
///
/// Acquisition must fail fast, never block, when the lock is already held.
/// After `release`, a new `try_acquire`/`configure` cycle may begin.
pub trait AudioSink: Send {
    /// Try to take the device's exclusive lock; false if already held
    fn try_acquire(&mut self) -> bool;

    /// Configure the device for a stream format; requires the lock
    fn configure(&mut self, info: &AudioStreamInfo) -> Result<(), SinkError>;

    /// Write PCM bytes, blocking up to `timeout`; returns bytes accepted
    fn write(&mut self, pcm: &[u8], timeout: Duration) -> Result<usize, SinkError>;

    /// Zero the device's pending output so stale audio is not repeated
    fn zero_output(&mut self);

    /// Release the exclusive lock; must be called on every teardown path
    fn release(&mut self);
}
