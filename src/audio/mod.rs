//! Audio primitives: stream format, ring buffer, volume scaling, sink boundary

pub mod ring_buffer;
pub mod sink;
pub mod types;
pub mod volume;

pub use ring_buffer::{PcmRingBuffer, RingConsumer, RingProducer};
pub use types::AudioStreamInfo;
