//! Compressed frame codecs
//!
//! - `adts`: ADTS header parsing and synthesis (AAC elementary frames)
//! - `mpeg`: MPEG audio frame header parsing (MP3 elementary frames)
//! - `decoder`: frame decoder interface and its symphonia implementation
//! - `pool`: fixed-size decoder pools with exclusive checkout

pub mod adts;
pub mod decoder;
pub mod mpeg;
pub mod pool;

pub use decoder::{ElementaryDecoder, FrameDecoder, FrameInfo};
pub use pool::{elementary_decoder, DecoderLease, DecoderPool, DecoderPools, PoolUsage};

use serde::Serialize;

/// Compressed codec families, one decoder pool each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// MPEG-1/2 Layer III frames
    Mp3,
    /// AAC-LC in ADTS framing (also fed by the container reader)
    Aac,
}

impl CodecKind {
    /// Largest number of interleaved samples one decoded frame can produce
    /// (mono or stereo output)
    pub fn max_samples_per_frame(self) -> usize {
        match self {
            CodecKind::Mp3 => 1152 * 2,
            CodecKind::Aac => 1024 * 2,
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::Mp3 => write!(f, "mp3"),
            CodecKind::Aac => write!(f, "aac"),
        }
    }
}
