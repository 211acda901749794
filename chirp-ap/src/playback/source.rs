//! Stream sources
//!
//! A started stream owns exactly one source, chosen by file format:
//! - `Pcm`: WAV data chunk read straight into the ring
//! - `Elementary`: MP3 or ADTS AAC bytes pushed into a leased decoder
//! - `Container`: box-tree file whose samples become ADTS frames
//! - `Tone`: generated chirp sweep, no storage at all

use crate::container::ContainerParser;
use crate::error::{Error, Result};
use crate::playback::tone::Chirp;
use crate::storage::{SourceHandle, SourceHandleExt};
use serde::Serialize;
use tracing::debug;

/// Chunks walked looking for `fmt ` and `data`
const MAX_WAV_CHUNKS: usize = 32;

const WAVE_FORMAT_PCM: u16 = 1;

/// Validated WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Offset of the first sample
    pub data_offset: u64,
    /// Data bytes available, clamped to the file
    pub data_len: u64,
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Parse and validate a RIFF/WAVE header
///
/// Accepts the canonical 44-byte layout and files with extra chunks
/// (`LIST`, `fact`, ...) before the data. Anything other than 16-bit
/// mono/stereo integer PCM is a configuration error.
pub fn parse_wav_header(src: &mut dyn SourceHandle) -> Result<WavInfo> {
    let file_len = src.len();
    let bad = |msg: &str| Error::Config(format!("Invalid WAV header: {}", msg));

    let mut riff = [0u8; 12];
    src.read_exact_at(0, &mut riff).map_err(|_| bad("file too short"))?;
    if &riff[..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(bad("missing RIFF/WAVE markers"));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut pos = 12u64;
    for _ in 0..MAX_WAV_CHUNKS {
        let mut chunk = [0u8; 8];
        src.read_exact_at(pos, &mut chunk)
            .map_err(|_| bad("no data chunk"))?;
        let id = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let size = le_u32(&chunk[4..]) as u64;
        let body = pos + 8;

        match &id {
            b"fmt " => {
                if size < 16 {
                    return Err(bad("fmt chunk too short"));
                }
                let mut fmt = [0u8; 16];
                src.read_exact_at(body, &mut fmt)
                    .map_err(|_| bad("truncated fmt chunk"))?;
                format = Some((
                    le_u16(&fmt[0..]),
                    le_u16(&fmt[2..]),
                    le_u32(&fmt[4..]),
                    le_u16(&fmt[14..]),
                ));
            }
            b"data" => {
                let (tag, channels, sample_rate, bits) = format.ok_or_else(|| bad("data before fmt"))?;
                if tag != WAVE_FORMAT_PCM {
                    return Err(bad(&format!("format tag {} is not PCM", tag)));
                }
                if !(1..=2).contains(&channels) {
                    return Err(bad(&format!("{} channels", channels)));
                }
                if bits != 16 {
                    return Err(bad(&format!("{} bits per sample", bits)));
                }
                if sample_rate == 0 {
                    return Err(bad("sample rate 0"));
                }

                let data_len = size.min(file_len.saturating_sub(body));
                let frame_bytes = channels as u64 * 2;
                let data_len = data_len - data_len % frame_bytes;
                if data_len == 0 {
                    return Err(bad("empty data chunk"));
                }

                debug!(
                    "WAV: {} Hz, {} channels, {} data bytes at {}",
                    sample_rate, channels, data_len, body
                );
                return Ok(WavInfo {
                    channels,
                    sample_rate,
                    bits_per_sample: bits,
                    data_offset: body,
                    data_len,
                });
            }
            _ => {}
        }

        // Chunks are padded to even length
        pos = body + size + (size & 1);
    }

    Err(bad("too many chunks before data"))
}

/// Raw PCM from a WAV data chunk
pub struct PcmSource {
    pub handle: Box<dyn SourceHandle>,
    pub info: WavInfo,
    /// Data bytes not yet read
    pub remaining: u64,
}

impl PcmSource {
    pub fn open(mut handle: Box<dyn SourceHandle>) -> Result<Self> {
        let info = parse_wav_header(handle.as_mut())?;
        handle.seek(info.data_offset)?;
        Ok(Self {
            handle,
            info,
            remaining: info.data_len,
        })
    }
}

/// Elementary compressed bytes for a frame decoder
pub struct ElementarySource {
    pub handle: Box<dyn SourceHandle>,
}

/// Container file read frame by frame
pub struct ContainerSource {
    pub handle: Box<dyn SourceHandle>,
    pub parser: ContainerParser,
}

impl ContainerSource {
    pub fn open(mut handle: Box<dyn SourceHandle>) -> Result<Self> {
        let parser = ContainerParser::open(handle.as_mut())?;
        Ok(Self { handle, parser })
    }
}

/// Source owned by a started stream
pub enum StreamSource {
    Pcm(PcmSource),
    Elementary(ElementarySource),
    Container(ContainerSource),
    Tone(Chirp),
}

impl StreamSource {
    /// Close the storage handle, if any
    pub fn close(&mut self) {
        match self {
            StreamSource::Pcm(s) => s.handle.close(),
            StreamSource::Elementary(s) => s.handle.close(),
            StreamSource::Container(s) => s.handle.close(),
            StreamSource::Tone(_) => {}
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSource::Pcm(s) => f.debug_tuple("Pcm").field(&s.info).finish(),
            StreamSource::Elementary(_) => f.write_str("Elementary"),
            StreamSource::Container(s) => f.debug_tuple("Container").field(s.parser.info()).finish(),
            StreamSource::Tone(t) => f.debug_tuple("Tone").field(t).finish(),
        }
    }
}
