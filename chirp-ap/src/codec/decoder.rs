//! Push-mode frame decoders
//!
//! Compressed bytes are staged in arbitrary slices; complete frames are
//! located in a fixed staging buffer, decoded with symphonia one at a time,
//! and the interleaved i16 PCM of each frame is handed to a callback. The
//! decoder never sees the file: the fill engine decides how many bytes to
//! stage and how many frames to decode per tick.
//!
//! The symphonia codec and the interleaving buffer are built with the
//! decoder, when the pool is created. A codec is only rebuilt when a stream
//! arrives in a different format than the one it is bound to, and stream
//! starts do that through `prepare` before any frame is decoded.

use crate::codec::adts::{
    lc_audio_specific_config, AdtsHeader, ADTS_HEADER_LEN, ADTS_MAX_FRAME_LEN, SAMPLE_RATES,
};
use crate::codec::mpeg::{id3v2_tag_len, FrameHeader, MpegLayer, ID3_HEADER_LEN};
use crate::codec::CodecKind;
use crate::error::{Error, Result};
use std::sync::OnceLock;
use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecParameters, CodecRegistry, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_MP3,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, warn};

/// Codec registry limited to the frame codecs this engine plays
fn codec_registry() -> &'static CodecRegistry {
    static CODEC_REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    CODEC_REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::AacDecoder>();
        registry
    })
}

/// Format of one decoded PCM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Frame decoder interface shared by every compressed codec kind
pub trait FrameDecoder: Send {
    fn kind(&self) -> CodecKind;

    /// Bytes this decoder holds for its whole lifetime (staging, scratch and
    /// codec state estimate); charged against the decoder arena
    fn footprint_bytes(&self) -> usize;

    /// Bind the codec to a stream format known before playback
    ///
    /// Called from the control context when a stream starts.
    fn prepare(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Free space in the staging buffer
    fn staging_room(&self) -> usize;

    /// Copy as much of `data` as fits into the staging buffer; returns the
    /// number of bytes taken
    fn stage(&mut self, data: &[u8]) -> usize;

    /// Decode at most one staged frame
    ///
    /// Returns false when no complete frame is staged. After a false return
    /// `staging_room()` is never zero.
    fn decode_next(&mut self, on_pcm: &mut dyn FnMut(FrameInfo, &[i16])) -> Result<bool>;

    /// Stage `data` and decode every frame it completes
    ///
    /// Partial frames stay staged for the next call. Returns the number of
    /// frames consumed.
    fn write(&mut self, data: &[u8], on_pcm: &mut dyn FnMut(FrameInfo, &[i16])) -> Result<usize> {
        let mut input = data;
        let mut frames = 0;
        loop {
            while self.decode_next(on_pcm)? {
                frames += 1;
            }
            if input.is_empty() {
                break;
            }
            let taken = self.stage(input);
            if taken == 0 {
                break;
            }
            input = &input[taken..];
        }
        Ok(frames)
    }

    /// Drop staged bytes and codec history before the next stream
    fn reset(&mut self);
}

/// Staging sizes cover the largest legal frame of each kind
const MP3_STAGING_BYTES: usize = 4096;
const AAC_STAGING_BYTES: usize = ADTS_MAX_FRAME_LEN + 1;

/// Rough per-instance codec state (synthesis filters, spectral buffers)
const MP3_STATE_BYTES: usize = 24 * 1024;
const AAC_STATE_BYTES: usize = 32 * 1024;

/// Format codecs are built for until a stream says otherwise
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u16 = 2;

/// Where the next frame sits in the staging buffer
#[derive(Debug, Clone, Copy)]
struct StagedFrame {
    len: usize,
    payload_start: usize,
    sample_rate: u32,
    channels: u16,
    /// AudioSpecificConfig for AAC frames
    asc: Option<[u8; 2]>,
}

enum Scan {
    NeedMore,
    /// Metadata to discard before the next frame
    Skip(usize),
    Frame(StagedFrame),
}

/// Stream format a symphonia decoder is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CodecConfig {
    sample_rate: u32,
    channels: u16,
    asc: Option<[u8; 2]>,
}

impl CodecConfig {
    fn of_frame(frame: &StagedFrame) -> Self {
        Self {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            asc: frame.asc,
        }
    }

    /// Config the frames of a `kind` stream at this format will carry
    fn for_stream(kind: CodecKind, sample_rate: u32, channels: u16) -> Self {
        match kind {
            CodecKind::Mp3 => Self {
                sample_rate,
                channels,
                asc: None,
            },
            CodecKind::Aac => {
                let index = crate::codec::adts::frequency_index(sample_rate) as usize;
                Self {
                    sample_rate: SAMPLE_RATES[index],
                    channels,
                    asc: Some(lc_audio_specific_config(sample_rate, channels)),
                }
            }
        }
    }
}

fn make_codec(kind: CodecKind, config: CodecConfig) -> Result<Box<dyn Decoder>> {
    let layout = match config.channels {
        1 => Channels::FRONT_LEFT,
        2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
        n => {
            return Err(Error::Config(format!(
                "Unsupported {} channel configuration: {}",
                kind, n
            )))
        }
    };

    let mut params = CodecParameters::new();
    params
        .for_codec(match kind {
            CodecKind::Mp3 => CODEC_TYPE_MP3,
            CodecKind::Aac => CODEC_TYPE_AAC,
        })
        .with_sample_rate(config.sample_rate)
        .with_channels(layout);
    if let Some(asc) = config.asc {
        params.with_extra_data(asc.to_vec().into_boxed_slice());
    }

    let codec = codec_registry()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create {} decoder: {}", kind, e)))?;
    debug!(
        "Built {} decoder: {} Hz, {} channels",
        kind, config.sample_rate, config.channels
    );
    Ok(codec)
}

/// symphonia-backed decoder for elementary MP3 and ADTS AAC frames
pub struct ElementaryDecoder {
    kind: CodecKind,

    /// Bytes staged but not yet consumed as a frame
    staging: Vec<u8>,
    staging_capacity: usize,

    /// Bytes of tag data still to drop
    skip_bytes: usize,

    codec: Box<dyn Decoder>,
    /// None while an MPEG decoder has not locked onto a format yet
    codec_config: Option<CodecConfig>,
    codec_builds: u32,

    /// Interleaving buffer sized for the largest stereo frame
    scratch: SampleBuffer<i16>,

    packets: u64,
    frames_skipped: u64,
}

impl ElementaryDecoder {
    /// Build the decoder and its codec for the default format
    pub fn new(kind: CodecKind) -> Result<Self> {
        let staging_capacity = match kind {
            CodecKind::Mp3 => MP3_STAGING_BYTES,
            CodecKind::Aac => AAC_STAGING_BYTES,
        };
        let config = CodecConfig::for_stream(kind, DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS);
        let codec = make_codec(kind, config)?;
        let stereo = SignalSpec::new(
            DEFAULT_SAMPLE_RATE,
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
        );
        let max_frames = (kind.max_samples_per_frame() / 2) as u64;

        Ok(Self {
            kind,
            staging: Vec::with_capacity(staging_capacity),
            staging_capacity,
            skip_bytes: 0,
            codec,
            codec_config: Self::bound_config(kind, config),
            codec_builds: 1,
            scratch: SampleBuffer::new(max_frames, stereo),
            packets: 0,
            frames_skipped: 0,
        })
    }

    /// The MPEG decoder takes its format from the first frame it sees, and
    /// keeps it across resets
    fn bound_config(kind: CodecKind, config: CodecConfig) -> Option<CodecConfig> {
        match kind {
            CodecKind::Mp3 => None,
            CodecKind::Aac => Some(config),
        }
    }

    /// Frames dropped because the codec rejected them
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Times a symphonia codec was built, construction included
    pub fn codec_builds(&self) -> u32 {
        self.codec_builds
    }

    /// Rebuild the codec unless it already accepts `config`
    fn configure(&mut self, config: CodecConfig) -> Result<()> {
        if self.codec_config.map_or(true, |bound| bound == config) {
            return Ok(());
        }
        self.codec = make_codec(self.kind, config)?;
        self.codec_config = Self::bound_config(self.kind, config);
        self.codec_builds += 1;
        Ok(())
    }

    /// Shortest byte run that can hold a header this decoder recognizes
    fn min_scan_len(&self) -> usize {
        match self.kind {
            CodecKind::Mp3 => ID3_HEADER_LEN,
            CodecKind::Aac => ADTS_HEADER_LEN,
        }
    }

    fn parse_header(&self, buf: &[u8]) -> Option<StagedFrame> {
        match self.kind {
            CodecKind::Mp3 => {
                let header = FrameHeader::parse(buf)?;
                // Layer I/II syncs inside Layer III data are false positives
                if header.layer != MpegLayer::Layer3 {
                    return None;
                }
                Some(StagedFrame {
                    len: header.frame_length,
                    payload_start: 0,
                    sample_rate: header.sample_rate,
                    channels: header.channels,
                    asc: None,
                })
            }
            CodecKind::Aac => {
                let header = AdtsHeader::parse(buf)?;
                Some(StagedFrame {
                    len: header.frame_length,
                    payload_start: header.header_length,
                    sample_rate: header.sample_rate,
                    channels: header.channels,
                    asc: Some(header.audio_specific_config()),
                })
            }
        }
    }

    /// Find the next tag or frame header, dropping any bytes before it
    fn locate_frame(&mut self) -> Scan {
        let min_len = self.min_scan_len();
        let mut offset = 0;
        let found = loop {
            let rest = &self.staging[offset..];
            if rest.len() < min_len {
                break Scan::NeedMore;
            }
            if self.kind == CodecKind::Mp3 {
                if let Some(tag_len) = id3v2_tag_len(rest) {
                    break Scan::Skip(tag_len);
                }
            }
            if let Some(frame) = self.parse_header(rest) {
                break Scan::Frame(frame);
            }
            offset += 1;
        };

        if offset > 0 {
            self.staging.drain(..offset);
        }
        found
    }

    fn decode_frame(
        &mut self,
        frame: &StagedFrame,
        on_pcm: &mut dyn FnMut(FrameInfo, &[i16]),
    ) -> Result<()> {
        let config = CodecConfig::of_frame(frame);
        self.configure(config)?;
        if self.codec_config.is_none() {
            self.codec_config = Some(config);
        }

        let payload = &self.staging[frame.payload_start..frame.len];
        let packet = Packet::new_from_slice(0, self.packets, 0, payload);
        self.packets += 1;

        let reset_required = match self.codec.decode(&packet) {
            Ok(decoded) => {
                if decoded.frames() > 0 {
                    let spec = *decoded.spec();
                    let needed = decoded.frames() * spec.channels.count();
                    if self.scratch.capacity() < needed {
                        warn!("Growing {} scratch to {} samples", self.kind, needed);
                        self.scratch = SampleBuffer::new(decoded.capacity() as u64, spec);
                    }
                    self.scratch.copy_interleaved_ref(decoded);
                    let info = FrameInfo {
                        sample_rate: spec.rate,
                        channels: spec.channels.count() as u16,
                    };
                    on_pcm(info, self.scratch.samples());
                }
                false
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                // Corrupt frame: skip it and keep the stream going
                self.frames_skipped += 1;
                debug!("Skipping undecodable {} frame: {}", self.kind, msg);
                false
            }
            Err(SymphoniaError::ResetRequired) => true,
            Err(e) => {
                return Err(Error::Decode(format!("{} decoder failed: {}", self.kind, e)));
            }
        };
        if reset_required {
            self.codec.reset();
        }
        Ok(())
    }
}

impl FrameDecoder for ElementaryDecoder {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn footprint_bytes(&self) -> usize {
        let state = match self.kind {
            CodecKind::Mp3 => MP3_STATE_BYTES,
            CodecKind::Aac => AAC_STATE_BYTES,
        };
        let scratch = self.kind.max_samples_per_frame() * std::mem::size_of::<i16>();
        self.staging_capacity + scratch + state
    }

    fn prepare(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        self.configure(CodecConfig::for_stream(self.kind, sample_rate, channels))
    }

    fn staging_room(&self) -> usize {
        self.staging_capacity - self.staging.len()
    }

    fn stage(&mut self, data: &[u8]) -> usize {
        let take = self.staging_room().min(data.len());
        self.staging.extend_from_slice(&data[..take]);
        take
    }

    fn decode_next(&mut self, on_pcm: &mut dyn FnMut(FrameInfo, &[i16])) -> Result<bool> {
        loop {
            if self.skip_bytes > 0 {
                let n = self.skip_bytes.min(self.staging.len());
                self.staging.drain(..n);
                self.skip_bytes -= n;
                if self.skip_bytes > 0 {
                    return Ok(false);
                }
            }

            match self.locate_frame() {
                Scan::NeedMore => break,
                Scan::Skip(len) => {
                    debug!("Skipping {} byte ID3v2 tag", len);
                    self.skip_bytes = len;
                }
                Scan::Frame(frame) => {
                    if self.staging.len() < frame.len {
                        break;
                    }
                    let decoded = self.decode_frame(&frame, on_pcm);
                    self.staging.drain(..frame.len);
                    decoded?;
                    return Ok(true);
                }
            }
        }

        if self.staging.len() >= self.staging_capacity {
            // Unreachable with legal frame sizes; never stall on a full buffer
            warn!("{} staging buffer full without a frame, discarding", self.kind);
            self.staging.clear();
        }
        Ok(false)
    }

    fn reset(&mut self) {
        self.staging.clear();
        self.skip_bytes = 0;
        self.packets = 0;
        self.frames_skipped = 0;
        self.codec.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(kind: CodecKind) -> ElementaryDecoder {
        ElementaryDecoder::new(kind).unwrap()
    }

    /// MPEG-1 Layer III, 32 kbit/s, 44.1 kHz, mono; zero side info decodes
    /// to 1152 samples of silence
    fn silent_mp3_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 104];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x10, 0xC0]);
        frame
    }

    /// ADTS AAC-LC mono frame holding one empty single channel element
    fn silent_adts_frame(sample_rate: u32) -> Vec<u8> {
        let payload = [0x01, 0x00, 0x00, 0x07];
        let mut frame = vec![0u8; ADTS_HEADER_LEN];
        crate::codec::adts::write_header(&mut frame, ADTS_HEADER_LEN + payload.len(), sample_rate, 1);
        frame.extend_from_slice(&payload);
        frame
    }

    #[test]
    fn test_footprint_includes_staging() {
        assert!(decoder(CodecKind::Mp3).footprint_bytes() > MP3_STAGING_BYTES);
        assert!(decoder(CodecKind::Aac).footprint_bytes() > AAC_STAGING_BYTES);
    }

    #[test]
    fn test_codec_built_with_decoder() {
        let mp3 = decoder(CodecKind::Mp3);
        let aac = decoder(CodecKind::Aac);
        assert_eq!(mp3.codec_builds(), 1);
        assert_eq!(aac.codec_builds(), 1);
        assert!(mp3.scratch.capacity() >= CodecKind::Mp3.max_samples_per_frame());
        assert!(aac.scratch.capacity() >= CodecKind::Aac.max_samples_per_frame());
    }

    #[test]
    fn test_silent_mp3_frames_decode() {
        let mut decoder = decoder(CodecKind::Mp3);
        let stream: Vec<u8> = (0..3).flat_map(|_| silent_mp3_frame()).collect();

        let mut samples = 0;
        let mut formats = Vec::new();
        let frames = decoder
            .write(&stream, &mut |info, pcm| {
                samples += pcm.len();
                formats.push(info);
            })
            .unwrap();

        assert_eq!(frames, 3);
        assert_eq!(samples, 3 * 1152);
        assert!(formats.iter().all(|f| f.channels == 1 && f.sample_rate == 44_100));
        assert_eq!(decoder.frames_skipped(), 0);
        // Decoding never rebuilds the codec built with the decoder
        assert_eq!(decoder.codec_builds(), 1);
    }

    #[test]
    fn test_decode_next_takes_one_frame_at_a_time() {
        let mut decoder = decoder(CodecKind::Mp3);
        let stream: Vec<u8> = (0..3).flat_map(|_| silent_mp3_frame()).collect();
        assert_eq!(decoder.stage(&stream), stream.len());

        let mut calls = 0;
        assert!(decoder.decode_next(&mut |_, _| calls += 1).unwrap());
        assert_eq!(calls, 1);
        assert_eq!(decoder.staging.len(), 2 * 104);
        assert!(decoder.decode_next(&mut |_, _| calls += 1).unwrap());
        assert!(decoder.decode_next(&mut |_, _| calls += 1).unwrap());
        assert!(!decoder.decode_next(&mut |_, _| calls += 1).unwrap());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_stage_is_bounded_by_staging_room() {
        let mut decoder = decoder(CodecKind::Mp3);
        let big = vec![0u8; MP3_STAGING_BYTES + 100];
        assert_eq!(decoder.stage(&big), MP3_STAGING_BYTES);
        assert_eq!(decoder.staging_room(), 0);

        // A full buffer without a frame is discarded, never left stuck
        assert!(!decoder.decode_next(&mut |_, _| {}).unwrap());
        assert!(decoder.staging_room() > 0);
    }

    #[test]
    fn test_silent_adts_frames_decode() {
        let mut decoder = decoder(CodecKind::Aac);
        decoder.prepare(44_100, 1).unwrap();
        assert_eq!(decoder.codec_builds(), 2);

        let stream: Vec<u8> = (0..4).flat_map(|_| silent_adts_frame(44_100)).collect();
        let mut samples = 0;
        let mut channels = 0;
        let frames = decoder
            .write(&stream, &mut |info, pcm| {
                samples += pcm.len();
                channels = info.channels;
            })
            .unwrap();

        assert_eq!(frames, 4);
        assert_eq!(samples, 4 * 1024);
        assert_eq!(channels, 1);
        // Prepared format matches the frames: nothing rebuilt mid-stream
        assert_eq!(decoder.codec_builds(), 2);
    }

    #[test]
    fn test_prepare_same_format_keeps_codec() {
        let mut aac = decoder(CodecKind::Aac);
        aac.prepare(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS).unwrap();
        aac.prepare(44_100, 2).unwrap();
        assert_eq!(aac.codec_builds(), 1);

        // MPEG decoders take their format from the first frame
        let mut mp3 = decoder(CodecKind::Mp3);
        mp3.prepare(22_050, 1).unwrap();
        assert_eq!(mp3.codec_builds(), 1);
    }

    #[test]
    fn test_mp3_format_change_rebuilds_once() {
        let mut decoder = decoder(CodecKind::Mp3);
        decoder.write(&silent_mp3_frame(), &mut |_, _| {}).unwrap();
        decoder.reset();

        // Locked to 44.1 kHz mono; a stereo stream needs a new codec
        decoder.prepare(44_100, 2).unwrap();
        assert_eq!(decoder.codec_builds(), 2);
        decoder.prepare(44_100, 2).unwrap();
        assert_eq!(decoder.codec_builds(), 2);
    }

    #[test]
    fn test_unsupported_channel_count_rejected() {
        let mut decoder = decoder(CodecKind::Aac);
        assert!(matches!(decoder.prepare(44_100, 6), Err(Error::Config(_))));
    }

    #[test]
    fn test_garbage_is_discarded_without_output() {
        let mut decoder = decoder(CodecKind::Mp3);
        let garbage = vec![0x55u8; 10_000];
        let mut calls = 0;
        let frames = decoder
            .write(&garbage, &mut |_, _| calls += 1)
            .unwrap();
        assert_eq!(frames, 0);
        assert_eq!(calls, 0);
        assert!(decoder.staging.len() < ID3_HEADER_LEN);
    }

    #[test]
    fn test_id3_tag_is_skipped_across_writes() {
        let mut decoder = decoder(CodecKind::Mp3);
        let mut tag = vec![0u8; 10 + 300];
        tag[..3].copy_from_slice(b"ID3");
        tag[3] = 3;
        tag[6..10].copy_from_slice(&[0, 0, 0x02, 0x2C]);
        // Tag body full of sync-like bytes must not be mistaken for frames
        for b in tag[10..].iter_mut() {
            *b = 0xFF;
        }

        let (first, second) = tag.split_at(100);
        decoder.write(first, &mut |_, _| {}).unwrap();
        assert!(decoder.skip_bytes > 0);
        decoder.write(second, &mut |_, _| {}).unwrap();
        assert_eq!(decoder.skip_bytes, 0);
        assert!(decoder.staging.is_empty());
    }

    #[test]
    fn test_partial_frame_stays_staged() {
        let mut decoder = decoder(CodecKind::Aac);
        let mut header = [0u8; ADTS_HEADER_LEN];
        crate::codec::adts::write_header(&mut header, 200, 44_100, 2);

        let frames = decoder.write(&header, &mut |_, _| {}).unwrap();
        assert_eq!(frames, 0);
        assert_eq!(decoder.staging.len(), ADTS_HEADER_LEN);
    }

    #[test]
    fn test_reset_clears_staging() {
        let mut decoder = decoder(CodecKind::Aac);
        let mut header = [0u8; ADTS_HEADER_LEN];
        crate::codec::adts::write_header(&mut header, 200, 44_100, 2);
        decoder.write(&header, &mut |_, _| {}).unwrap();

        decoder.reset();
        assert!(decoder.staging.is_empty());
        assert_eq!(decoder.skip_bytes, 0);
    }
}
