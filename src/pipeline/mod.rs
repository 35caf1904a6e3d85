//! Stream pipelines and the multi-stream combiner

mod combiner;
mod source;
mod stream;

pub use combiner::{Combiner, CombinerInput, InputPriority};
pub use source::{MemorySource, PcmSource, ToneSource};
pub use stream::StreamPipeline;
