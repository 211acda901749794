//! Playback slots and their lifecycle
//!
//! Each slot is split in two:
//! - `SlotShared`: the ring and a few atomics, shared with the mixer
//! - `AudioStream`: everything else (source, decoder lease, bookkeeping),
//!   owned by the engine and touched only from the control/fill context
//!
//! The mixer reads a slot only while its state is `Playing` or `Draining`.
//! All transitions happen in the control context; the state is published
//! with Release so the mixer never sees `Playing` before the ring is ready.

use crate::audio::ring_buffer::SampleRing;
use crate::codec::{DecoderLease, DecoderPools};
use crate::error::{Error, Result};
use crate::playback::source::{ContainerSource, ElementarySource, PcmSource, StreamSource};
use crate::playback::tone::Chirp;
use crate::playback::types::{SourceFormat, StreamState};
use crate::storage::{SourceHandle, StorageBackend, StorageKind};
use chirp_common::BoundedStr;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stored path length; longer paths are truncated for display
pub const MAX_PATH_LEN: usize = 64;

/// Slot state visible to the mixer
#[derive(Debug)]
pub struct SlotShared {
    ring: SampleRing,
    state: AtomicU8,
    /// f32 bits
    volume: AtomicU32,
    /// Interleaved samples per frame in the ring (1 or 2)
    channels: AtomicU8,
    stop_requested: AtomicBool,
    underruns: AtomicU64,
}

impl SlotShared {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: SampleRing::new(ring_capacity),
            state: AtomicU8::new(StreamState::Inactive as u8),
            volume: AtomicU32::new(1.0f32.to_bits()),
            channels: AtomicU8::new(1),
            stop_requested: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Samples per frame
    ///
    /// Set before the first sample of a stream is pushed, so a reader that
    /// has seen data in the ring also sees the matching channel count.
    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_channels(&self, channels: u16) {
        self.channels.store(channels.clamp(1, 2) as u8, Ordering::Release);
    }

    /// Ask the slot to stop at the next lifecycle tick (any thread)
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::AcqRel)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cross-thread handle that can only request a stop
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<SlotShared>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.request_stop();
    }

    pub fn state(&self) -> StreamState {
        self.0.state()
    }
}

/// Serializable snapshot of one slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub slot: usize,
    pub state: StreamState,
    pub path: String,
    pub volume: f32,
    pub format: Option<SourceFormat>,
    pub storage: Option<StorageKind>,
    pub channels: u16,
    pub sample_rate: u32,
    pub source_exhausted: bool,
    /// Samples waiting in the ring
    pub buffered_samples: usize,
    pub samples_produced: u64,
    /// Decoded samples dropped because the ring was full
    pub overflow_samples: u64,
    /// Mixer ticks that found the ring empty while playing
    pub underruns: u64,
    /// Leased decoder entry, if any
    pub decoder: Option<usize>,
}

/// One playback slot
pub struct AudioStream {
    index: usize,
    pub(crate) shared: Arc<SlotShared>,
    format: Option<SourceFormat>,
    storage: Option<StorageKind>,
    path: BoundedStr<MAX_PATH_LEN>,

    pub(crate) source: Option<StreamSource>,
    pub(crate) lease: Option<DecoderLease>,

    /// Channels pushed into the ring; 0 until the first decoded frame
    pub(crate) channels: u16,
    pub(crate) sample_rate: u32,
    pub(crate) source_exhausted: bool,

    pub(crate) samples_produced: u64,
    pub(crate) overflow_samples: u64,
}

impl AudioStream {
    pub fn new(index: usize, ring_capacity: usize) -> Self {
        Self {
            index,
            shared: Arc::new(SlotShared::new(ring_capacity)),
            format: None,
            storage: None,
            path: BoundedStr::new(),
            source: None,
            lease: None,
            channels: 0,
            sample_rate: 0,
            source_exhausted: false,
            samples_produced: 0,
            overflow_samples: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shared(&self) -> &Arc<SlotShared> {
        &self.shared
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() != StreamState::Inactive
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.shared))
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume.clamp(0.0, 1.0));
    }

    /// Start playing a file; any current occupant is stopped first
    ///
    /// On failure the slot is `Inactive` and holds nothing.
    pub fn start_file(
        &mut self,
        path: &str,
        backend: &dyn StorageBackend,
        pools: &mut DecoderPools,
    ) -> Result<()> {
        self.stop(pools);

        self.path.set(path);
        if self.path.was_truncated() {
            debug!("Slot {} path truncated to {:?}", self.index, self.path.as_str());
        }
        self.storage = Some(backend.kind());
        self.shared.set_state(StreamState::Starting);

        match Self::open_source(path, backend, pools) {
            Ok(opened) => {
                self.activate(opened);
                Ok(())
            }
            Err(e) => {
                warn!("Slot {} failed to start {}: {}", self.index, path, e);
                self.stop(pools);
                Err(e)
            }
        }
    }

    /// Start a generated chirp sweep
    pub fn start_tone(&mut self, chirp: Chirp, pools: &mut DecoderPools) {
        self.stop(pools);
        self.path.set("<chirp>");
        self.shared.set_state(StreamState::Starting);
        let sample_rate = chirp.sample_rate();
        self.activate(Opened {
            source: StreamSource::Tone(chirp),
            lease: None,
            format: SourceFormat::Wav,
            channels: 1,
            sample_rate,
        });
    }

    /// Open, sniff and validate; every resource acquired is released again
    /// on the error path by dropping it
    fn open_source(
        path: &str,
        backend: &dyn StorageBackend,
        pools: &mut DecoderPools,
    ) -> Result<Opened> {
        let mut handle = backend.open(path)?;
        let format = match SourceFormat::from_path(path) {
            Some(format) => format,
            None => sniff(handle.as_mut())?,
        };

        match format {
            SourceFormat::Wav => {
                let pcm = PcmSource::open(handle)?;
                let info = pcm.info;
                Ok(Opened {
                    source: StreamSource::Pcm(pcm),
                    lease: None,
                    format,
                    channels: info.channels,
                    sample_rate: info.sample_rate,
                })
            }
            SourceFormat::Mp3 | SourceFormat::Aac => {
                let kind = format.codec().ok_or_else(|| {
                    Error::Config(format!("No decoder for {}", format))
                })?;
                let first = crate::probe::first_frame(handle.as_mut(), format);
                handle.seek(0)?;
                let mut lease = pools.checkout(kind)?;
                match first {
                    Ok(frame) => {
                        lease = prepare_decoder(pools, lease, frame.sample_rate, frame.channels)?;
                    }
                    // Frames may still turn up past the search window
                    Err(e) => debug!("{}: decoder keeps its format: {}", path, e),
                }
                Ok(Opened {
                    source: StreamSource::Elementary(ElementarySource { handle }),
                    lease: Some(lease),
                    format,
                    channels: 0,
                    sample_rate: 0,
                })
            }
            SourceFormat::M4a => {
                // Parse before claiming a decoder so a corrupt file holds none
                let container = ContainerSource::open(handle)?;
                let info = *container.parser.info();
                let lease = pools.checkout(crate::codec::CodecKind::Aac)?;
                let lease = prepare_decoder(pools, lease, info.sample_rate, info.channels)?;
                Ok(Opened {
                    source: StreamSource::Container(container),
                    lease: Some(lease),
                    format,
                    channels: info.channels,
                    sample_rate: info.sample_rate,
                })
            }
        }
    }

    fn activate(&mut self, opened: Opened) {
        self.format = Some(opened.format);
        self.source = Some(opened.source);
        self.lease = opened.lease;
        self.channels = opened.channels;
        self.sample_rate = opened.sample_rate;
        self.source_exhausted = false;
        self.samples_produced = 0;
        self.overflow_samples = 0;

        self.shared.ring.clear();
        self.shared.underruns.store(0, Ordering::Relaxed);
        if opened.channels > 0 {
            self.shared.set_channels(opened.channels);
        }
        self.shared.set_state(StreamState::Playing);

        info!(
            "Slot {} playing {} ({}, {} Hz, {} ch)",
            self.index,
            self.path,
            opened.format,
            opened.sample_rate,
            opened.channels
        );
    }

    /// Stop immediately and release everything; no-op when inactive
    pub fn stop(&mut self, pools: &mut DecoderPools) {
        let was = self.state();
        self.shared.set_state(StreamState::Inactive);

        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(lease) = self.lease.take() {
            pools.release(lease);
        }
        self.shared.ring.clear();
        self.shared.take_stop_request();

        self.format = None;
        self.storage = None;
        self.path.clear();
        self.channels = 0;
        self.sample_rate = 0;
        self.source_exhausted = false;

        if was != StreamState::Inactive {
            info!("Slot {} stopped", self.index);
        }
    }

    /// Apply autonomous transitions; returns the new state if it changed
    pub fn update_lifecycle(&mut self, pools: &mut DecoderPools) -> Option<StreamState> {
        let state = self.state();
        if state == StreamState::Inactive {
            // A stop request against an idle slot has nothing to stop
            self.shared.take_stop_request();
            return None;
        }

        if self.shared.take_stop_request() {
            self.stop(pools);
            return Some(StreamState::Inactive);
        }

        match state {
            StreamState::Playing if self.source_exhausted => {
                if self.shared.ring.is_empty() {
                    debug!("Slot {} finished", self.index);
                    self.stop(pools);
                    Some(StreamState::Inactive)
                } else {
                    debug!(
                        "Slot {} draining {} samples",
                        self.index,
                        self.shared.ring.available_to_read()
                    );
                    self.shared.set_state(StreamState::Draining);
                    Some(StreamState::Draining)
                }
            }
            StreamState::Draining if self.shared.ring.is_empty() => {
                debug!("Slot {} drained", self.index);
                self.stop(pools);
                Some(StreamState::Inactive)
            }
            _ => None,
        }
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            slot: self.index,
            state: self.state(),
            path: self.path.as_str().to_string(),
            volume: self.shared.volume(),
            format: self.format,
            storage: self.storage,
            channels: self.channels,
            sample_rate: self.sample_rate,
            source_exhausted: self.source_exhausted,
            buffered_samples: self.shared.ring.available_to_read(),
            samples_produced: self.samples_produced,
            overflow_samples: self.overflow_samples,
            underruns: self.shared.underruns(),
            decoder: self.lease.as_ref().map(DecoderLease::index),
        }
    }
}

/// Resources gathered while a stream is `Starting`
struct Opened {
    source: StreamSource,
    lease: Option<DecoderLease>,
    format: SourceFormat,
    channels: u16,
    sample_rate: u32,
}

/// Bind a leased decoder to the stream format before the first fill, so no
/// codec is built on the fill path; the lease is returned on failure
fn prepare_decoder(
    pools: &mut DecoderPools,
    lease: DecoderLease,
    sample_rate: u32,
    channels: u16,
) -> Result<DecoderLease> {
    let prepared = match pools.decoder_mut(&lease) {
        Some(decoder) => decoder.prepare(sample_rate, channels),
        None => Ok(()),
    };
    match prepared {
        Ok(()) => Ok(lease),
        Err(e) => {
            pools.release(lease);
            Err(e)
        }
    }
}

/// Recognize a file without a known extension from its first bytes
fn sniff(handle: &mut dyn SourceHandle) -> Result<SourceFormat> {
    let mut head = [0u8; 12];
    let mut filled = 0;
    handle.seek(0)?;
    while filled < head.len() {
        let n = handle.read_chunk(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    SourceFormat::sniff(&head[..filled])
        .ok_or_else(|| Error::Config("Unrecognized audio format".to_string()))
}
