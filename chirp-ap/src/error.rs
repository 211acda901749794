//! Error types for chirp-ap
//!
//! Start-time failures are returned synchronously to the caller of
//! `start_stream`. Failures during playback never surface as errors; they
//! mark the stream's source as exhausted so it drains and stops on its own.

use thiserror::Error;

/// Main error type for the audio engine
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported file header or engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No free decoder of the requested kind
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Container is missing required tables or exceeded the traversal budget
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    /// Open, read or seek failure on a storage backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// Compressed frame could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Slot index outside the configured stream count
    #[error("Invalid slot: {0}")]
    InvalidSlot(usize),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared configuration errors
    #[error(transparent)]
    Common(#[from] chirp_common::Error),
}

/// Convenience Result type using chirp-ap Error
pub type Result<T> = std::result::Result<T, Error>;
