//! Output task: drains merged PCM to the hardware sink

mod task;

pub use task::OutputTask;
