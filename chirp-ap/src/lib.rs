//! # CHIRP Audio Player Library (chirp-ap)
//!
//! Multi-stream playback and mixing engine for small devices.
//!
//! **Purpose:** Play up to `max_streams` WAV, MP3, ADTS AAC and M4A files at
//! once from card or flash storage, mixed into a single stereo output.
//!
//! **Architecture:** A producer context (control calls plus the fill engine)
//! decodes into one lock-free ring per slot; the real-time mixer, driven by
//! the cpal output callback, drains the rings. Decoders come from fixed
//! pools built once at startup (symphonia frame decoders).

pub mod audio;
pub mod codec;
pub mod container;
pub mod error;
pub mod playback;
pub mod probe;
pub mod storage;

pub use error::{Error, Result};
pub use playback::{AudioEngine, EngineDiagnostics, FillPump, Mixer, StreamState, StreamStatus};
pub use storage::{StorageKind, StorageSet};
