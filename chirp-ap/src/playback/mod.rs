//! Playback: slots, sources, fill engine, mixer and the engine tying them together

pub mod driver;
pub mod engine;
pub mod fill;
pub mod mixer;
pub mod source;
pub mod stream;
pub mod tone;
pub mod types;

pub use driver::FillPump;
pub use engine::{AudioEngine, EngineDiagnostics};
pub use fill::{FillEngine, FillReport};
pub use mixer::{Mixer, OutputControl};
pub use stream::{AudioStream, SlotShared, StopHandle, StreamStatus};
pub use tone::{Chirp, ChirpParams};
pub use types::{SourceFormat, StreamState};
