//! MPEG audio frame headers
//!
//! Elementary MP3 files are a sequence of self-delimiting frames, optionally
//! preceded by an ID3v2 tag. The decoder stages bytes until one complete
//! frame is available, so it needs the frame length from the 4-byte header:
//!
//! ```text
//! sync(11) version(2) layer(2) protection(1)
//! bitrate(4) sample_rate(2) padding(1) private(1)
//! channel_mode(2) mode_ext(2) copyright(1) original(1) emphasis(2)
//! ```

/// Frame header length
pub const MPEG_HEADER_LEN: usize = 4;

/// ID3v2 tag header length
pub const ID3_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegLayer {
    Layer1,
    Layer2,
    Layer3,
}

/// Bitrates in kbit/s, index 0 (free format) and 15 (bad) excluded by the parser
const BITRATES_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATES_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44_100, 48_000, 32_000];
const SAMPLE_RATES_V2: [u32; 3] = [22_050, 24_000, 16_000];
const SAMPLE_RATES_V25: [u32; 3] = [11_025, 12_000, 8_000];

/// Decoded MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub padding: bool,
    /// Whole frame length in bytes, header included
    pub frame_length: usize,
}

impl FrameHeader {
    /// Parse a frame header from the start of `buf`
    ///
    /// Free-format and reserved field values are rejected.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < MPEG_HEADER_LEN {
            return None;
        }
        if buf[0] != 0xFF || buf[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (buf[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        let layer = match (buf[1] >> 1) & 0x03 {
            0b01 => MpegLayer::Layer3,
            0b10 => MpegLayer::Layer2,
            0b11 => MpegLayer::Layer1,
            _ => return None,
        };

        let bitrate_index = (buf[2] >> 4) as usize;
        let rate_index = ((buf[2] >> 2) & 0x03) as usize;
        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return None;
        }

        let bitrate_kbps = match (version, layer) {
            (MpegVersion::Mpeg1, MpegLayer::Layer1) => BITRATES_V1_L1[bitrate_index],
            (MpegVersion::Mpeg1, MpegLayer::Layer2) => BITRATES_V1_L2[bitrate_index],
            (MpegVersion::Mpeg1, MpegLayer::Layer3) => BITRATES_V1_L3[bitrate_index],
            (_, MpegLayer::Layer1) => BITRATES_V2_L1[bitrate_index],
            (_, _) => BITRATES_V2_L23[bitrate_index],
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_V2[rate_index],
            MpegVersion::Mpeg25 => SAMPLE_RATES_V25[rate_index],
        };

        let padding = (buf[2] >> 1) & 0x01 == 1;
        let channels = if buf[3] >> 6 == 0b11 { 1 } else { 2 };

        let bitrate = bitrate_kbps * 1000;
        let pad = padding as u32;
        let frame_length = match (version, layer) {
            (_, MpegLayer::Layer1) => (12 * bitrate / sample_rate + pad) * 4,
            (MpegVersion::Mpeg1, _) | (_, MpegLayer::Layer2) => 144 * bitrate / sample_rate + pad,
            (_, MpegLayer::Layer3) => 72 * bitrate / sample_rate + pad,
        } as usize;

        Some(Self {
            version,
            layer,
            bitrate_kbps,
            sample_rate,
            channels,
            padding,
            frame_length,
        })
    }

    /// PCM frames produced per channel by one compressed frame
    pub fn samples_per_frame(&self) -> usize {
        match (self.version, self.layer) {
            (_, MpegLayer::Layer1) => 384,
            (_, MpegLayer::Layer2) | (MpegVersion::Mpeg1, MpegLayer::Layer3) => 1152,
            (_, MpegLayer::Layer3) => 576,
        }
    }
}

/// Total length of an ID3v2 tag starting at `buf[0]`, footer included
///
/// Returns `None` when `buf` does not start with a complete ID3v2 header.
pub fn id3v2_tag_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < ID3_HEADER_LEN || &buf[..3] != b"ID3" {
        return None;
    }
    // Size is four 7-bit bytes (syncsafe)
    if buf[6..10].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = buf[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize);
    let footer = if buf[5] & 0x10 != 0 { ID3_HEADER_LEN } else { 0 };
    Some(ID3_HEADER_LEN + size + footer)
}
