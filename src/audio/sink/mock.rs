//! Scripted in-memory sink for tests and demos
//!
//! Records everything the output task does to it and lets a test script
//! upcoming write outcomes (full, short, or faulted). Kept in the main
//! tree rather than a test helper module so the demo binary can run the
//! whole engine without audio hardware.

use super::{AudioSink, SinkError};
use crate::audio::AudioStreamInfo;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Outcome to apply to an upcoming write
#[derive(Debug, Clone, Copy)]
pub enum WriteOutcome {
    /// Accept every byte
    Full,
    /// Accept at most this many bytes
    Short(usize),
    /// Fail with a device fault
    Fault,
}

#[derive(Default)]
struct MockState {
    acquired: bool,
    busy: bool,
    configured: Option<AudioStreamInfo>,
    configure_error: Option<SinkError>,
    written: Vec<u8>,
    write_plan: VecDeque<WriteOutcome>,
    zero_calls: usize,
    release_calls: usize,
}

/// In-memory [`AudioSink`] implementation
pub struct MockSink {
    state: Arc<Mutex<MockState>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Inspection and scripting handle, usable while the sink is owned by
    /// an output task
    pub fn handle(&self) -> MockSinkHandle {
        MockSinkHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MockSink {
    fn try_acquire(&mut self) -> bool {
        let mut state = self.state.lock();
        if state.busy || state.acquired {
            return false;
        }
        state.acquired = true;
        true
    }

    fn configure(&mut self, info: &AudioStreamInfo) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if let Some(err) = state.configure_error.clone() {
            return Err(err);
        }
        state.configured = Some(*info);
        Ok(())
    }

    fn write(&mut self, pcm: &[u8], _timeout: Duration) -> Result<usize, SinkError> {
        let mut state = self.state.lock();
        let outcome = state.write_plan.pop_front().unwrap_or(WriteOutcome::Full);
        match outcome {
            WriteOutcome::Full => {
                state.written.extend_from_slice(pcm);
                Ok(pcm.len())
            }
            WriteOutcome::Short(limit) => {
                let n = pcm.len().min(limit);
                state.written.extend_from_slice(&pcm[..n]);
                Ok(n)
            }
            WriteOutcome::Fault => Err(SinkError::Fault("scripted write fault".into())),
        }
    }

    fn zero_output(&mut self) {
        self.state.lock().zero_calls += 1;
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.acquired = false;
        state.release_calls += 1;
    }
}

/// Shared view into a [`MockSink`]
#[derive(Clone)]
pub struct MockSinkHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockSinkHandle {
    /// Refuse all future acquisition attempts
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Make the next `configure` call fail
    pub fn fail_configure(&self, err: SinkError) {
        self.state.lock().configure_error = Some(err);
    }

    /// Queue outcomes for upcoming writes; an empty plan accepts everything
    pub fn plan_writes(&self, outcomes: impl IntoIterator<Item = WriteOutcome>) {
        self.state.lock().write_plan.extend(outcomes);
    }

    /// Every byte accepted so far, in write order
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn written_len(&self) -> usize {
        self.state.lock().written.len()
    }

    pub fn configured(&self) -> Option<AudioStreamInfo> {
        self.state.lock().configured
    }

    pub fn is_acquired(&self) -> bool {
        self.state.lock().acquired
    }

    pub fn zero_calls(&self) -> usize {
        self.state.lock().zero_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }
}
