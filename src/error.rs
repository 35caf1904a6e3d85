//! Error types for undertone
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//!
//! Starvation (no data within the idle timeout) is deliberately *not* an error:
//! it is a liveness signal surfaced as a `TaskEvent::Idle` followed by a
//! graceful auto-stop.

use crate::audio::sink::SinkError;
use thiserror::Error;

/// Main error type for the undertone engine
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer or queue allocation failure
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// The exclusive hardware lock is already held
    #[error("audio device busy")]
    DeviceBusy,

    /// Sink configuration or write failure
    #[error("audio device fault: {0}")]
    DeviceFault(#[from] SinkError),

    /// Partial hardware write
    #[error("short write to audio sink: wrote {written} of {expected} bytes")]
    SizeMismatch { expected: usize, written: usize },

    /// Stream format the engine refuses to process
    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// Invalid state for operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A command or event channel peer has gone away
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Source read errors
    #[error("source error: {0}")]
    Source(String),
}

/// Convenience Result type using the undertone Error
pub type Result<T> = std::result::Result<T, Error>;
