//! Compressed elementary streams that decode to silence
//!
//! Frames carry real headers and empty payloads, so they exercise the full
//! decode path with known output sizes: 1152 samples per MP3 frame and 1024
//! per AAC frame, per channel.

use chirp_ap::codec::adts;

/// MPEG-1 Layer III, 32 kbit/s, 44.1 kHz, mono: 104 bytes per frame
pub const MP3_FRAME_LEN: usize = 104;

/// Raw AAC-LC payload: one single channel element with no scale factor
/// bands, then the end element
const EMPTY_SCE: [u8; 4] = [0x01, 0x00, 0x00, 0x07];

/// `frames` silent MP3 frames
pub fn silent_mp3(frames: usize) -> Vec<u8> {
    let mut frame = vec![0u8; MP3_FRAME_LEN];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x10, 0xC0]);
    frame.repeat(frames)
}

/// `frames` silent mono ADTS frames at `sample_rate`
pub fn silent_adts(frames: usize, sample_rate: u32) -> Vec<u8> {
    let mut frame = vec![0u8; adts::ADTS_HEADER_LEN];
    adts::write_header(&mut frame, adts::ADTS_HEADER_LEN + EMPTY_SCE.len(), sample_rate, 1);
    frame.extend_from_slice(&EMPTY_SCE);
    frame.repeat(frames)
}

/// Raw payloads for `frames` container samples of the same silent frame
pub fn silent_aac_samples(frames: usize) -> Vec<Vec<u8>> {
    vec![EMPTY_SCE.to_vec(); frames]
}
