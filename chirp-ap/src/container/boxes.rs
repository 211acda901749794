//! Box headers and bounded traversal
//!
//! Every box starts with a 32-bit big-endian size and a four-character type.
//! Size 1 means a 64-bit size follows; size 0 means the box runs to the end
//! of its parent. All traversal draws from one `VisitBudget`, so a corrupt
//! or hostile file costs a bounded number of header reads.

use crate::error::{Error, Result};
use crate::storage::{SourceHandle, SourceHandleExt};

pub type FourCc = [u8; 4];

pub const MOOV: FourCc = *b"moov";
pub const MDAT: FourCc = *b"mdat";
pub const TRAK: FourCc = *b"trak";
pub const MDIA: FourCc = *b"mdia";
pub const HDLR: FourCc = *b"hdlr";
pub const MINF: FourCc = *b"minf";
pub const STBL: FourCc = *b"stbl";
pub const STSD: FourCc = *b"stsd";
pub const STSZ: FourCc = *b"stsz";
pub const STCO: FourCc = *b"stco";
pub const STSC: FourCc = *b"stsc";
pub const MP4A: FourCc = *b"mp4a";
pub const SOUN: FourCc = *b"soun";

/// Header reads allowed while opening one file
pub const MAX_BOX_VISITS: usize = 1000;

/// Counts box headers read; running out is a corrupt file
#[derive(Debug)]
pub struct VisitBudget {
    remaining: usize,
}

impl VisitBudget {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    fn spend(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(Error::CorruptContainer(
                "Box traversal limit exceeded".to_string(),
            ));
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Location of one box in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: FourCc,
    /// Offset of the size field
    pub start: u64,
    /// Offset of the first content byte
    pub content: u64,
    /// One past the last byte, clamped to the parent
    pub end: u64,
}

impl BoxHeader {
    pub fn content_len(&self) -> u64 {
        self.end - self.content
    }
}

/// Printable box type for error messages
pub fn fourcc_str(kind: &FourCc) -> String {
    kind.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Read the box header at `pos` inside a parent ending at `limit`
pub fn read_box_header(
    src: &mut dyn SourceHandle,
    pos: u64,
    limit: u64,
    budget: &mut VisitBudget,
) -> Result<BoxHeader> {
    budget.spend()?;

    let mut header = [0u8; 8];
    src.read_exact_at(pos, &mut header)
        .map_err(|e| Error::CorruptContainer(format!("Truncated box header at {}: {}", pos, e)))?;

    let mut size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let kind = [header[4], header[5], header[6], header[7]];
    let mut header_len = 8u64;

    match size {
        0 => size = limit - pos,
        1 => {
            // 64-bit size; only the low 32 bits are honored
            let mut large = [0u8; 8];
            src.read_exact_at(pos + 8, &mut large).map_err(|e| {
                Error::CorruptContainer(format!("Truncated 64-bit box size at {}: {}", pos, e))
            })?;
            size = u64::from_be_bytes(large) & 0xFFFF_FFFF;
            header_len = 16;
        }
        _ => {}
    }

    if size < header_len {
        return Err(Error::CorruptContainer(format!(
            "Box '{}' at {} has size {} smaller than its header",
            fourcc_str(&kind),
            pos,
            size
        )));
    }

    Ok(BoxHeader {
        kind,
        start: pos,
        content: pos + header_len,
        end: (pos + size).min(limit),
    })
}

/// Headers of the direct children in `[start, end)`
pub fn children(
    src: &mut dyn SourceHandle,
    start: u64,
    end: u64,
    budget: &mut VisitBudget,
) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut pos = start;
    while pos + 8 <= end {
        let header = read_box_header(src, pos, end, budget)?;
        pos = header.end;
        boxes.push(header);
    }
    Ok(boxes)
}

/// First direct child of `parent` with the given type
pub fn find_child(
    src: &mut dyn SourceHandle,
    parent: &BoxHeader,
    kind: FourCc,
    budget: &mut VisitBudget,
) -> Result<Option<BoxHeader>> {
    let mut pos = parent.content;
    while pos + 8 <= parent.end {
        let header = read_box_header(src, pos, parent.end, budget)?;
        if header.kind == kind {
            return Ok(Some(header));
        }
        pos = header.end;
    }
    Ok(None)
}
