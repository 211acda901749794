//! ADTS framing for AAC
//!
//! ADTS frames carry a 7-byte header (9 with CRC) in front of each raw AAC
//! payload. Elementary `.aac` files are a plain sequence of such frames; the
//! container reader synthesizes the same header in front of each sample so
//! one decoder path serves both.
//!
//! Header layout (bits):
//!
//! ```text
//! syncword(12) id(1) layer(2) protection_absent(1)
//! profile(2) sf_index(4) private(1) channel_config(3)
//! original(1) home(1) copyright_bit(1) copyright_start(1)
//! frame_length(13) buffer_fullness(11) raw_blocks(2)
//! ```

/// Header length without CRC
pub const ADTS_HEADER_LEN: usize = 7;

/// Largest frame the 13-bit length field can describe
pub const ADTS_MAX_FRAME_LEN: usize = 0x1FFF;

/// AAC-LC object type minus one, as stored in the ADTS profile field
const PROFILE_LC: u8 = 1;

/// Sampling frequencies indexed by the 4-bit ADTS frequency index
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Frequency index of the nearest standard rate at or below `sample_rate`
///
/// Rates below the lowest entry map to the lowest entry.
pub fn frequency_index(sample_rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .position(|&rate| sample_rate >= rate)
        .unwrap_or(SAMPLE_RATES.len() - 1) as u8
}

/// Write an AAC-LC, MPEG-4, no-CRC ADTS header for a frame of
/// `frame_len` bytes (header included)
pub fn write_header(header: &mut [u8], frame_len: usize, sample_rate: u32, channels: u16) {
    let freq = frequency_index(sample_rate);
    let channels = (channels & 0x07) as u8;
    let len = (frame_len & ADTS_MAX_FRAME_LEN) as u16;

    header[0] = 0xFF;
    // MPEG-4, layer 0, protection absent
    header[1] = 0xF1;
    header[2] = (PROFILE_LC << 6) | (freq << 2) | ((channels >> 2) & 0x01);
    header[3] = ((channels & 0x03) << 6) | ((len >> 11) as u8 & 0x03);
    header[4] = ((len >> 3) & 0xFF) as u8;
    // Low length bits, buffer fullness 0x7FF (VBR)
    header[5] = (((len & 0x07) as u8) << 5) | 0x1F;
    header[6] = 0xFC;
}

/// Parsed ADTS frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (2 = AAC-LC)
    pub object_type: u8,
    pub frequency_index: u8,
    pub sample_rate: u32,
    pub channels: u16,
    /// Whole frame length, header included
    pub frame_length: usize,
    /// 7, or 9 when a CRC follows the header
    pub header_length: usize,
}

impl AdtsHeader {
    /// Parse a header from the start of `buf`
    ///
    /// Returns `None` when the bytes are not a plausible ADTS header.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < ADTS_HEADER_LEN {
            return None;
        }
        if buf[0] != 0xFF || buf[1] & 0xF0 != 0xF0 {
            return None;
        }
        // Layer is always 0 for ADTS; anything else is MPEG audio
        if (buf[1] >> 1) & 0x03 != 0 {
            return None;
        }

        let protection_absent = buf[1] & 0x01 == 1;
        let profile = buf[2] >> 6;
        let frequency_index = (buf[2] >> 2) & 0x0F;
        let channels = (((buf[2] & 0x01) << 2) | (buf[3] >> 6)) as u16;
        let frame_length = (((buf[3] & 0x03) as usize) << 11)
            | ((buf[4] as usize) << 3)
            | ((buf[5] as usize) >> 5);

        let sample_rate = *SAMPLE_RATES.get(frequency_index as usize)?;
        let header_length = if protection_absent { 7 } else { 9 };
        if frame_length <= header_length {
            return None;
        }

        Some(Self {
            object_type: profile + 1,
            frequency_index,
            sample_rate,
            channels,
            frame_length,
            header_length,
        })
    }

    /// Two-byte AudioSpecificConfig describing this stream
    pub fn audio_specific_config(&self) -> [u8; 2] {
        audio_specific_config(self.object_type, self.frequency_index, self.channels)
    }
}

/// AudioSpecificConfig of the AAC-LC stream `write_header` describes
pub fn lc_audio_specific_config(sample_rate: u32, channels: u16) -> [u8; 2] {
    audio_specific_config(PROFILE_LC + 1, frequency_index(sample_rate), channels)
}

fn audio_specific_config(object_type: u8, frequency_index: u8, channels: u16) -> [u8; 2] {
    let config = ((object_type as u16) << 11)
        | ((frequency_index as u16) << 7)
        | ((channels & 0x0F) << 3);
    config.to_be_bytes()
}
