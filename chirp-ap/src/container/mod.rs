//! Box-tree container reader
//!
//! Locates the first sound track's sample tables and streams its samples as
//! ADTS frames, so container audio goes through the same AAC decoder as
//! elementary `.aac` files.
//!
//! Tables used (offsets relative to the box start):
//! - `stsz`: fixed sample size at +12, count at +16, per-sample sizes at +20
//! - `stco`: chunk count at +12, 32-bit chunk offsets at +16
//! - `stsc`: run count at +12, 12-byte runs (first_chunk, samples_per_chunk,
//!   description index) at +16
//! - `stsd`: first sample entry at content +8; must be `mp4a`
//!
//! Tables are read from storage on demand; nothing proportional to the
//! file is held in memory.

pub mod boxes;

use crate::codec::adts::{self, ADTS_HEADER_LEN, ADTS_MAX_FRAME_LEN};
use crate::error::{Error, Result};
use crate::storage::{SourceHandle, SourceHandleExt};
use boxes::{
    children, find_child, fourcc_str, BoxHeader, VisitBudget, HDLR, MAX_BOX_VISITS, MDAT, MDIA,
    MINF, MOOV, MP4A, SOUN, STBL, STCO, STSC, STSD, STSZ, TRAK,
};
use serde::Serialize;
use tracing::{debug, trace};

/// Defaults when the track has no readable sample description
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u16 = 2;

/// Summary of an opened container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: u32,
    pub chunk_count: u32,
    /// Offset of the media data payload, if an `mdat` box was found
    pub mdat_offset: Option<u64>,
}

/// Table boxes of one track
#[derive(Debug, Default)]
struct TrackTables {
    stsd: Option<BoxHeader>,
    stsz: Option<BoxHeader>,
    stco: Option<BoxHeader>,
    stsc: Option<BoxHeader>,
}

/// Streaming reader over a container's sound track
#[derive(Debug)]
pub struct ContainerParser {
    info: ContainerInfo,

    stsz_offset: u64,
    /// Non-zero when every sample has this size
    fixed_sample_size: u32,
    stco_offset: u64,
    stsc_offset: u64,
    stsc_count: u32,

    /// Next sample to read (0-based)
    current_sample: u32,
    /// Chunk being read (1-based, as in the tables)
    current_chunk: u32,
    samples_in_chunk: u32,
    samples_read_in_chunk: u32,
    /// File offset of the next sample
    current_offset: u64,
    last_frame_offset: Option<u64>,
}

impl ContainerParser {
    /// Walk the box tree and prepare to read the first sound track
    ///
    /// Fails with `CorruptContainer` when no sound track has all of its
    /// sample tables or the traversal budget runs out, and with `Config`
    /// when the track's codec is not AAC.
    pub fn open(src: &mut dyn SourceHandle) -> Result<Self> {
        let file_len = src.len();
        let mut budget = VisitBudget::new(MAX_BOX_VISITS);

        let mut moov = None;
        let mut mdat_offset = None;
        for header in children(src, 0, file_len, &mut budget)? {
            match header.kind {
                MOOV if moov.is_none() => moov = Some(header),
                MDAT if mdat_offset.is_none() => mdat_offset = Some(header.content),
                _ => {}
            }
        }
        let moov = moov.ok_or_else(|| Error::CorruptContainer("No 'moov' box".to_string()))?;

        let mut saw_sound_track = false;
        let mut tables = None;
        for trak in children(src, moov.content, moov.end, &mut budget)? {
            if trak.kind != TRAK {
                continue;
            }
            if let Some(found) = Self::sound_track_tables(src, &trak, &mut budget)? {
                saw_sound_track = true;
                if found.stsz.is_some() && found.stco.is_some() && found.stsc.is_some() {
                    tables = Some(found);
                    break;
                }
            }
        }

        let tables = match tables {
            Some(t) => t,
            None if saw_sound_track => {
                return Err(Error::CorruptContainer(
                    "Sound track is missing stsz, stco or stsc".to_string(),
                ))
            }
            None => return Err(Error::CorruptContainer("No sound track".to_string())),
        };

        let (sample_rate, channels) = match &tables.stsd {
            Some(stsd) => Self::read_sample_entry(src, stsd)?,
            None => (DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS),
        };

        // Table headers, bounds-checked against their boxes
        let (stsz, stco, stsc) = match (tables.stsz, tables.stco, tables.stsc) {
            (Some(stsz), Some(stco), Some(stsc)) => (stsz, stco, stsc),
            _ => return Err(Error::CorruptContainer("Incomplete sample tables".to_string())),
        };
        let fixed_sample_size = read_table_u32(src, &stsz, 12)?;
        let sample_count = read_table_u32(src, &stsz, 16)?;
        if fixed_sample_size == 0 {
            check_table_len(&stsz, 20, sample_count, 4)?;
        }
        let chunk_count = read_table_u32(src, &stco, 12)?;
        check_table_len(&stco, 16, chunk_count, 4)?;
        let stsc_count = read_table_u32(src, &stsc, 12)?;
        check_table_len(&stsc, 16, stsc_count, 12)?;

        if sample_count > 0 && (chunk_count == 0 || stsc_count == 0) {
            return Err(Error::CorruptContainer(format!(
                "{} samples but {} chunks and {} chunk runs",
                sample_count, chunk_count, stsc_count
            )));
        }

        let info = ContainerInfo {
            sample_rate,
            channels,
            sample_count,
            chunk_count,
            mdat_offset,
        };

        let mut parser = Self {
            info,
            stsz_offset: stsz.start,
            fixed_sample_size,
            stco_offset: stco.start,
            stsc_offset: stsc.start,
            stsc_count,
            current_sample: 0,
            current_chunk: 1,
            samples_in_chunk: 0,
            samples_read_in_chunk: 0,
            current_offset: 0,
            last_frame_offset: None,
        };
        if chunk_count > 0 {
            parser.current_offset = src.read_u32_be_at(parser.stco_offset + 16)? as u64;
            parser.samples_in_chunk = parser.samples_per_chunk(src, 1)?;
        }

        debug!(
            "Container opened: {} samples in {} chunks, {} Hz, {} channels",
            sample_count, chunk_count, sample_rate, channels
        );
        Ok(parser)
    }

    /// Table boxes of `trak` if its handler is a sound handler
    fn sound_track_tables(
        src: &mut dyn SourceHandle,
        trak: &BoxHeader,
        budget: &mut VisitBudget,
    ) -> Result<Option<TrackTables>> {
        let Some(mdia) = find_child(src, trak, MDIA, budget)? else {
            return Ok(None);
        };

        let mut handler = None;
        let mut minf = None;
        for child in children(src, mdia.content, mdia.end, budget)? {
            match child.kind {
                HDLR if child.content_len() >= 12 => {
                    let mut kind = [0u8; 4];
                    src.read_exact_at(child.content + 8, &mut kind)?;
                    handler = Some(kind);
                }
                MINF => minf = Some(child),
                _ => {}
            }
        }
        if handler != Some(SOUN) {
            trace!("Skipping non-sound track");
            return Ok(None);
        }

        let mut tables = TrackTables::default();
        let stbl = match minf {
            Some(minf) => find_child(src, &minf, STBL, budget)?,
            None => None,
        };
        if let Some(stbl) = stbl {
            for child in children(src, stbl.content, stbl.end, budget)? {
                match child.kind {
                    STSD => tables.stsd = Some(child),
                    STSZ => tables.stsz = Some(child),
                    STCO => tables.stco = Some(child),
                    STSC => tables.stsc = Some(child),
                    _ => {}
                }
            }
        }
        Ok(Some(tables))
    }

    /// Sample rate and channel count from the first sample entry
    fn read_sample_entry(src: &mut dyn SourceHandle, stsd: &BoxHeader) -> Result<(u32, u16)> {
        let entry = stsd.content + 8;
        if entry + 36 > stsd.end {
            return Ok((DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS));
        }

        let mut format = [0u8; 4];
        src.read_exact_at(entry + 4, &mut format)?;
        if format != MP4A {
            return Err(Error::Config(format!(
                "Unsupported container codec '{}'",
                fourcc_str(&format)
            )));
        }

        let channels = src.read_u16_be_at(entry + 24)?;
        // 16.16 fixed point
        let sample_rate = src.read_u32_be_at(entry + 32)? >> 16;
        if !(1..=2).contains(&channels) || sample_rate == 0 {
            return Err(Error::Config(format!(
                "Unsupported audio format: {} channels at {} Hz",
                channels, sample_rate
            )));
        }
        Ok((sample_rate, channels))
    }

    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    /// File offset of the payload returned by the last `read_next_frame`
    pub fn last_frame_offset(&self) -> Option<u64> {
        self.last_frame_offset
    }

    /// Samples per chunk for `chunk`, from a full scan of the run table
    fn samples_per_chunk(&self, src: &mut dyn SourceHandle, chunk: u32) -> Result<u32> {
        let mut samples = 0;
        for i in 0..self.stsc_count as u64 {
            let mut run = [0u8; 8];
            src.read_exact_at(self.stsc_offset + 16 + i * 12, &mut run)?;
            let first_chunk = u32::from_be_bytes([run[0], run[1], run[2], run[3]]);
            if first_chunk > chunk {
                break;
            }
            samples = u32::from_be_bytes([run[4], run[5], run[6], run[7]]);
        }
        Ok(samples)
    }

    /// Read the next sample into `buf` behind a synthesized ADTS header
    ///
    /// Returns the total frame length, or 0 once every sample has been read.
    pub fn read_next_frame(&mut self, src: &mut dyn SourceHandle, buf: &mut [u8]) -> Result<usize> {
        if self.current_sample >= self.info.sample_count {
            return Ok(0);
        }

        let size = if self.fixed_sample_size != 0 {
            self.fixed_sample_size
        } else {
            src.read_u32_be_at(self.stsz_offset + 20 + self.current_sample as u64 * 4)?
        } as usize;

        let frame_len = size + ADTS_HEADER_LEN;
        if frame_len > ADTS_MAX_FRAME_LEN || frame_len > buf.len() {
            return Err(Error::CorruptContainer(format!(
                "Sample {} of {} bytes does not fit a frame",
                self.current_sample, size
            )));
        }

        while self.samples_read_in_chunk >= self.samples_in_chunk {
            self.current_chunk += 1;
            if self.current_chunk > self.info.chunk_count {
                return Err(Error::CorruptContainer(format!(
                    "Sample {} lies beyond the last chunk",
                    self.current_sample
                )));
            }
            self.samples_read_in_chunk = 0;
            self.current_offset =
                src.read_u32_be_at(self.stco_offset + 16 + (self.current_chunk as u64 - 1) * 4)? as u64;
            self.samples_in_chunk = self.samples_per_chunk(src, self.current_chunk)?;
        }

        src.read_exact_at(self.current_offset, &mut buf[ADTS_HEADER_LEN..frame_len])?;
        adts::write_header(
            &mut buf[..ADTS_HEADER_LEN],
            frame_len,
            self.info.sample_rate,
            self.info.channels,
        );

        self.last_frame_offset = Some(self.current_offset);
        self.current_offset += size as u64;
        self.current_sample += 1;
        self.samples_read_in_chunk += 1;
        Ok(frame_len)
    }
}

fn read_table_u32(src: &mut dyn SourceHandle, table: &BoxHeader, offset: u64) -> Result<u32> {
    if table.start + offset + 4 > table.end {
        return Err(Error::CorruptContainer(format!(
            "Truncated '{}' box",
            fourcc_str(&table.kind)
        )));
    }
    src.read_u32_be_at(table.start + offset)
}

/// Entries declared by a table must lie inside its box
fn check_table_len(table: &BoxHeader, entries_at: u64, count: u32, entry_size: u64) -> Result<()> {
    if table.start + entries_at + count as u64 * entry_size > table.end {
        return Err(Error::CorruptContainer(format!(
            "'{}' declares {} entries beyond its box",
            fourcc_str(&table.kind),
            count
        )));
    }
    Ok(())
}
