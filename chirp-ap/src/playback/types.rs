//! Playback types shared across modules

use crate::codec::CodecKind;
use serde::Serialize;

/// Stream lifecycle state
///
/// ```text
/// Inactive -> Starting -> Playing -> Draining -> Inactive
///                |           |           |
///                +-----------+-----------+--> Inactive (stop / start failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StreamState {
    /// Slot free; holds no resources
    Inactive = 0,

    /// Opening and validating the source
    Starting = 1,

    /// Source producing samples
    Playing = 2,

    /// Source exhausted; mixer consuming what is left in the ring
    Draining = 3,
}

impl StreamState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Starting,
            2 => StreamState::Playing,
            3 => StreamState::Draining,
            _ => StreamState::Inactive,
        }
    }

    /// Whether the mixer reads this stream's ring
    pub fn is_audible(self) -> bool {
        matches!(self, StreamState::Playing | StreamState::Draining)
    }
}

/// Source file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Canonical 16-bit PCM WAV
    Wav,
    /// Elementary MP3
    Mp3,
    /// Elementary ADTS AAC
    Aac,
    /// Box-tree container with an AAC track
    M4a,
}

impl SourceFormat {
    /// Decoder pool the format draws from; `None` for raw PCM
    pub fn codec(self) -> Option<CodecKind> {
        match self {
            SourceFormat::Wav => None,
            SourceFormat::Mp3 => Some(CodecKind::Mp3),
            SourceFormat::Aac | SourceFormat::M4a => Some(CodecKind::Aac),
        }
    }

    /// Format implied by the file extension (case-insensitive)
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(SourceFormat::Wav),
            "mp3" => Some(SourceFormat::Mp3),
            "aac" => Some(SourceFormat::Aac),
            "m4a" | "mp4" => Some(SourceFormat::M4a),
            _ => None,
        }
    }

    /// Format recognized from the first bytes of a file
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WAVE" {
            return Some(SourceFormat::Wav);
        }
        if head.len() >= 8 && &head[4..8] == b"ftyp" {
            return Some(SourceFormat::M4a);
        }
        if head.len() >= 3 && &head[..3] == b"ID3" {
            return Some(SourceFormat::Mp3);
        }
        if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xF0 == 0xF0 {
            // Layer bits 00 are ADTS; anything else is MPEG audio
            return Some(if head[1] & 0x06 == 0 {
                SourceFormat::Aac
            } else {
                SourceFormat::Mp3
            });
        }
        if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0 {
            return Some(SourceFormat::Mp3);
        }
        None
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceFormat::Wav => "wav",
            SourceFormat::Mp3 => "mp3",
            SourceFormat::Aac => "aac",
            SourceFormat::M4a => "m4a",
        };
        f.write_str(name)
    }
}
