//! File inspection for the `probe` command
//!
//! Runs the same header validation a stream start would, without touching
//! any decoder pool, and reports what it found as a serializable value.

use crate::codec::adts::AdtsHeader;
use crate::codec::mpeg::{id3v2_tag_len, FrameHeader, MPEG_HEADER_LEN};
use crate::codec::CodecKind;
use crate::container::{ContainerInfo, ContainerParser};
use crate::error::{Error, Result};
use crate::playback::source::{parse_wav_header, WavInfo};
use crate::playback::SourceFormat;
use crate::storage::directory::FileHandle;
use crate::storage::SourceHandle;
use serde::Serialize;
use std::path::Path;

/// Bytes searched for the first compressed frame after any ID3 tag
const SYNC_SEARCH_BYTES: usize = 16 * 1024;

/// First frame of an elementary MP3 or ADTS stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementaryInfo {
    pub codec: CodecKind,
    pub sample_rate: u32,
    pub channels: u16,
    /// Offset of the first frame header
    pub first_frame_offset: u64,
    pub first_frame_len: usize,
    /// Leading ID3v2 tag, 0 if none
    pub id3_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeDetails {
    Wav(WavInfo),
    Elementary(ElementaryInfo),
    Container(ContainerInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub path: String,
    pub size_bytes: u64,
    pub format: SourceFormat,
    pub details: ProbeDetails,
}

/// Probe a file on the host filesystem
pub fn probe_file(path: &Path) -> Result<ProbeReport> {
    let mut handle = FileHandle::open_path(path)?;
    let report = probe_source(&mut handle, &path.to_string_lossy());
    handle.close();
    report
}

/// Probe an already opened source; `name` is used for format detection
pub fn probe_source(src: &mut dyn SourceHandle, name: &str) -> Result<ProbeReport> {
    let head = read_window(src, 0)?;
    let format = SourceFormat::from_path(name)
        .or_else(|| SourceFormat::sniff(&head))
        .ok_or_else(|| Error::Config(format!("Unrecognized audio format: {}", name)))?;

    let details = match format {
        SourceFormat::Wav => ProbeDetails::Wav(parse_wav_header(src)?),
        SourceFormat::M4a => ProbeDetails::Container(*ContainerParser::open(src)?.info()),
        SourceFormat::Mp3 | SourceFormat::Aac => ProbeDetails::Elementary(first_frame(src, format)?),
    };

    Ok(ProbeReport {
        path: name.to_string(),
        size_bytes: src.len(),
        format,
        details,
    })
}

/// First frame header of an elementary stream, after any leading ID3v2 tag
///
/// Leaves the read position anywhere; callers seek before reading on.
pub(crate) fn first_frame(src: &mut dyn SourceHandle, format: SourceFormat) -> Result<ElementaryInfo> {
    let head = read_window(src, 0)?;
    let id3_bytes = id3v2_tag_len(&head).unwrap_or(0);
    let window = read_window(src, id3_bytes as u64)?;
    find_first_frame(&window, format, id3_bytes)
}

/// Up to `SYNC_SEARCH_BYTES` starting at `offset`
fn read_window(src: &mut dyn SourceHandle, offset: u64) -> Result<Vec<u8>> {
    let len = src.len().saturating_sub(offset).min(SYNC_SEARCH_BYTES as u64) as usize;
    let mut buf = vec![0u8; len];
    src.seek(offset)?;
    let mut filled = 0;
    while filled < len {
        let n = src.read_chunk(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Locate the first frame header in `buf`, whose first byte sits at file
/// offset `base`
fn find_first_frame(buf: &[u8], format: SourceFormat, base: usize) -> Result<ElementaryInfo> {
    for offset in 0..buf.len().saturating_sub(MPEG_HEADER_LEN - 1) {
        let found = match format {
            SourceFormat::Aac => AdtsHeader::parse(&buf[offset..]).map(|h| ElementaryInfo {
                codec: CodecKind::Aac,
                sample_rate: h.sample_rate,
                channels: h.channels,
                first_frame_offset: (base + offset) as u64,
                first_frame_len: h.frame_length,
                id3_bytes: base,
            }),
            _ => FrameHeader::parse(&buf[offset..]).map(|h| ElementaryInfo {
                codec: CodecKind::Mp3,
                sample_rate: h.sample_rate,
                channels: h.channels,
                first_frame_offset: (base + offset) as u64,
                first_frame_len: h.frame_length,
                id3_bytes: base,
            }),
        };
        if let Some(info) = found {
            return Ok(info);
        }
    }
    Err(Error::Decode(format!(
        "No {} frame sync in the first {} bytes",
        format,
        buf.len()
    )))
}
