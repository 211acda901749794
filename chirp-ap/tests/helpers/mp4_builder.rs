//! Synthetic box-tree container builder
//!
//! Produces `ftyp`, `moov` (one or two tracks) and `mdat`, with sample
//! payloads laid out chunk by chunk as the `stco`/`stsc` tables describe.
//! Chunks can be separated by junk bytes so a reader that ignores the chunk
//! offset table reads the wrong data.

fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// Box with a zero version/flags word before `body`
fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8; 4];
    content.extend_from_slice(body);
    boxed(kind, &content)
}

fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

/// Built file plus where each sample's payload ended up
pub struct M4aFile {
    pub bytes: Vec<u8>,
    pub payload_offsets: Vec<u64>,
}

#[derive(Clone)]
pub struct M4aBuilder {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: [u8; 4],
    pub samples: Vec<Vec<u8>>,
    /// Samples in each chunk, in order
    pub chunks: Vec<u32>,
    /// Junk bytes written before every chunk
    pub chunk_gap: usize,
    /// Leave one of `stsz`, `stco`, `stsc` out
    pub omit_table: Option<[u8; 4]>,
    /// Put a video track ahead of the sound track
    pub video_track_first: bool,
    /// Overrides the `stco` entry count (for bounds tests)
    pub stco_count_override: Option<u32>,
    /// Write one `stsz` sample size for all samples (the first sample's
    /// length) instead of a per-sample table
    pub uniform_sample_size: bool,
}

impl M4aBuilder {
    pub fn new(samples: Vec<Vec<u8>>, chunks: Vec<u32>) -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            codec: *b"mp4a",
            samples,
            chunks,
            chunk_gap: 0,
            omit_table: None,
            video_track_first: false,
            stco_count_override: None,
            uniform_sample_size: false,
        }
    }

    /// `count` samples whose payload bytes all equal their index + 1,
    /// sized 20, 21, 22, ...
    pub fn numbered(count: usize, chunks: Vec<u32>) -> Self {
        let samples = (0..count)
            .map(|i| vec![(i + 1) as u8; 20 + i])
            .collect();
        Self::new(samples, chunks)
    }

    /// Compressed `stsc` runs: (first chunk, samples per chunk)
    pub fn stsc_runs(&self) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for (i, &count) in self.chunks.iter().enumerate() {
            if runs.last().map(|&(_, c)| c) != Some(count) {
                runs.push((i as u32 + 1, count));
            }
        }
        runs
    }

    fn sample_entry(&self) -> Vec<u8> {
        let mut body = vec![0u8; 6];
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 8]);
        body.extend_from_slice(&self.channels.to_be_bytes());
        body.extend_from_slice(&16u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&(self.sample_rate << 16).to_be_bytes());
        boxed(&self.codec, &body)
    }

    fn stbl(&self, chunk_offsets: &[u32]) -> Vec<u8> {
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend_from_slice(&self.sample_entry());

        let uniform = match (self.uniform_sample_size, self.samples.first()) {
            (true, Some(first)) => first.len() as u32,
            _ => 0,
        };
        let mut stsz = uniform.to_be_bytes().to_vec();
        stsz.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        if uniform == 0 {
            for sample in &self.samples {
                stsz.extend_from_slice(&(sample.len() as u32).to_be_bytes());
            }
        }

        let count = self.stco_count_override.unwrap_or(chunk_offsets.len() as u32);
        let mut stco = count.to_be_bytes().to_vec();
        for offset in chunk_offsets {
            stco.extend_from_slice(&offset.to_be_bytes());
        }

        let runs = self.stsc_runs();
        let mut stsc = (runs.len() as u32).to_be_bytes().to_vec();
        for (first, per_chunk) in runs {
            stsc.extend_from_slice(&first.to_be_bytes());
            stsc.extend_from_slice(&per_chunk.to_be_bytes());
            stsc.extend_from_slice(&1u32.to_be_bytes());
        }

        let mut children = vec![full_box(b"stsd", &stsd)];
        for (kind, body) in [(*b"stsz", stsz), (*b"stco", stco), (*b"stsc", stsc)] {
            if self.omit_table != Some(kind) {
                children.push(full_box(&kind, &body));
            }
        }
        boxed(b"stbl", &concat(&children))
    }

    fn trak(handler: &[u8; 4], stbl: Vec<u8>) -> Vec<u8> {
        let mut hdlr = 0u32.to_be_bytes().to_vec();
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);
        let minf = boxed(b"minf", &stbl);
        let mdia = boxed(b"mdia", &concat(&[full_box(b"hdlr", &hdlr), minf]));
        boxed(b"trak", &mdia)
    }

    fn moov(&self, chunk_offsets: &[u32]) -> Vec<u8> {
        let sound = Self::trak(b"soun", self.stbl(chunk_offsets));
        let tracks = if self.video_track_first {
            let video = Self::trak(b"vide", boxed(b"stbl", &[]));
            concat(&[video, sound])
        } else {
            sound
        };
        boxed(b"moov", &tracks)
    }

    pub fn build(&self) -> M4aFile {
        let ftyp = boxed(b"ftyp", b"M4A \0\0\0\0M4A mp42isom");

        // Table sizes do not depend on offset values, so size moov first
        let placeholder = vec![0u32; self.chunks.len()];
        let moov_len = self.moov(&placeholder).len();
        let mdat_content = (ftyp.len() + moov_len + 8) as u32;

        let mut mdat = Vec::new();
        let mut chunk_offsets = Vec::new();
        let mut payload_offsets = Vec::new();
        let mut samples = self.samples.iter();
        for &count in &self.chunks {
            mdat.extend(std::iter::repeat(0xEEu8).take(self.chunk_gap));
            chunk_offsets.push(mdat_content + mdat.len() as u32);
            for sample in samples.by_ref().take(count as usize) {
                payload_offsets.push((mdat_content + mdat.len() as u32) as u64);
                mdat.extend_from_slice(sample);
            }
        }

        let bytes = concat(&[ftyp, self.moov(&chunk_offsets), boxed(b"mdat", &mdat)]);
        M4aFile {
            bytes,
            payload_offsets,
        }
    }
}
