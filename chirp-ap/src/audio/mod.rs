//! Audio primitives: per-stream sample rings and the hardware sink

pub mod output;
pub mod ring_buffer;

pub use output::AudioOutput;
pub use ring_buffer::SampleRing;
