//! Engine core
//!
//! **Responsibilities:**
//! - Own the slots, decoder pools, storage backends and fill scratch space
//! - Control operations (start, stop, volume, mute) from the control context
//! - Fill and lifecycle ticks, normally driven by a `FillPump`
//!
//! The real-time side only ever sees what `mixer()` hands out: the slots'
//! shared halves and the output controls.

use crate::codec::DecoderPools;
use crate::error::{Error, Result};
use crate::playback::fill::{FillEngine, FillReport};
use crate::playback::mixer::{Mixer, OutputControl};
use crate::playback::stream::{AudioStream, StopHandle};
use crate::playback::tone::{Chirp, ChirpParams};
use crate::playback::types::StreamState;
use crate::storage::{StorageKind, StorageSet};
use chirp_common::EngineConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Multi-stream playback engine
pub struct AudioEngine {
    pub(super) config: EngineConfig,
    pub(super) streams: Vec<AudioStream>,
    pub(super) pools: DecoderPools,
    pub(super) storage: StorageSet,
    pub(super) fill: FillEngine,
    pub(super) output: Arc<OutputControl>,
}

impl AudioEngine {
    /// Create an engine with directory-backed storage from the configured roots
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let storage = StorageSet::from_config(&config);
        let pools = DecoderPools::from_config(&config);
        Self::with_parts(config, storage, pools)
    }

    /// Create an engine from explicit storage backends and decoder pools
    ///
    /// Every ring, decoder and scratch buffer is allocated here; nothing is
    /// allocated per stream afterwards.
    pub fn with_parts(config: EngineConfig, storage: StorageSet, pools: DecoderPools) -> Result<Self> {
        config.validate()?;

        let capacity = config.ring_capacity();
        let streams = (0..config.max_streams)
            .map(|index| AudioStream::new(index, capacity))
            .collect();
        let fill = FillEngine::new(&config);
        let output = Arc::new(OutputControl::new(config.master_volume));

        let usage = pools.usage();
        info!(
            "Audio engine ready: {} slots, ring {} samples, decoders mp3={} aac={}",
            config.max_streams, capacity, usage.mp3_capacity, usage.aac_capacity
        );

        Ok(Self {
            config,
            streams,
            pools,
            storage,
            fill,
            output,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn slot_count(&self) -> usize {
        self.streams.len()
    }

    pub fn storage(&self) -> &StorageSet {
        &self.storage
    }

    /// Mixer for the real-time context
    ///
    /// Holds only the slots' shared halves; may be called more than once,
    /// but only one mixer should consume at a time.
    pub fn mixer(&self) -> Mixer {
        let slots = self.streams.iter().map(|s| Arc::clone(s.shared())).collect();
        Mixer::new(slots, Arc::clone(&self.output))
    }

    pub fn output_control(&self) -> Arc<OutputControl> {
        Arc::clone(&self.output)
    }

    fn stream(&self, slot: usize) -> Result<&AudioStream> {
        self.streams.get(slot).ok_or(Error::InvalidSlot(slot))
    }

    /// Start `path` from `storage` on an explicit slot
    ///
    /// Whatever occupies the slot is stopped first. On error the slot is
    /// left `Inactive` and holds no decoder or handle.
    pub fn start_stream(&mut self, slot: usize, path: &str, storage: StorageKind) -> Result<()> {
        let stream = self.streams.get_mut(slot).ok_or(Error::InvalidSlot(slot))?;
        stream.start_file(path, self.storage.backend(storage), &mut self.pools)?;

        let rate = stream.status().sample_rate;
        if rate != 0 && rate != self.config.output_sample_rate {
            warn!(
                "Slot {} source is {} Hz, output runs at {} Hz; pitch will be off",
                slot, rate, self.config.output_sample_rate
            );
        }
        Ok(())
    }

    /// First inactive slot, else slot 0
    pub fn select_slot(&self) -> usize {
        self.streams
            .iter()
            .position(|s| !s.is_active())
            .unwrap_or(0)
    }

    /// Start `path` on the slot chosen by `select_slot`; returns the slot
    pub fn start_any(&mut self, path: &str, storage: StorageKind) -> Result<usize> {
        let slot = self.select_slot();
        if self.streams[slot].is_active() {
            info!("All slots busy, taking over slot {}", slot);
        }
        self.start_stream(slot, path, storage)?;
        Ok(slot)
    }

    /// Play a generated chirp sweep on `slot` at the output rate
    pub fn start_chirp(&mut self, slot: usize, params: ChirpParams) -> Result<()> {
        let chirp = Chirp::new(params, self.config.output_sample_rate)?;
        let stream = self.streams.get_mut(slot).ok_or(Error::InvalidSlot(slot))?;
        stream.start_tone(chirp, &mut self.pools);
        Ok(())
    }

    /// Stop a slot immediately; stopping an idle slot is a no-op
    pub fn stop_stream(&mut self, slot: usize) -> Result<()> {
        let stream = self.streams.get_mut(slot).ok_or(Error::InvalidSlot(slot))?;
        stream.stop(&mut self.pools);
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for stream in &mut self.streams {
            stream.stop(&mut self.pools);
        }
        debug!("All slots stopped");
    }

    /// Flag a slot to stop on the next lifecycle tick
    pub fn request_stop(&self, slot: usize) -> Result<()> {
        self.stream(slot)?.shared().request_stop();
        Ok(())
    }

    /// Handle that lets another thread request a stop of `slot`
    pub fn stop_handle(&self, slot: usize) -> Result<StopHandle> {
        Ok(self.stream(slot)?.stop_handle())
    }

    /// Set a slot's volume, clamped to [0, 1]
    pub fn set_volume(&self, slot: usize, volume: f32) -> Result<()> {
        self.stream(slot)?.set_volume(volume);
        Ok(())
    }

    /// Set the master volume, clamped to [0, 1]
    pub fn set_master_volume(&self, volume: f32) {
        self.output.set_master_volume(volume);
    }

    /// Open or close the mute gate
    pub fn set_audio_allowed(&self, allowed: bool) {
        debug!("Audio output {}", if allowed { "allowed" } else { "muted" });
        self.output.set_audio_allowed(allowed);
    }

    pub fn state(&self, slot: usize) -> Result<StreamState> {
        Ok(self.stream(slot)?.state())
    }

    pub fn is_slot_active(&self, slot: usize) -> bool {
        self.streams.get(slot).is_some_and(AudioStream::is_active)
    }

    /// True when no slot is active
    pub fn is_idle(&self) -> bool {
        self.streams.iter().all(|s| !s.is_active())
    }

    /// Run the fill engine over every slot once
    pub fn fill_tick(&mut self) -> FillReport {
        self.fill.fill(&mut self.streams, &mut self.pools)
    }

    /// Apply lifecycle transitions; returns how many slots went inactive
    pub fn update_lifecycle(&mut self) -> usize {
        let mut stopped = 0;
        for stream in &mut self.streams {
            if stream.update_lifecycle(&mut self.pools) == Some(StreamState::Inactive) {
                stopped += 1;
            }
        }
        stopped
    }

    /// One scheduling tick: fill, then lifecycle
    pub fn tick(&mut self) -> FillReport {
        let report = self.fill_tick();
        self.update_lifecycle();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageLock};

    fn wav(samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&88_200u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        out
    }

    fn engine(streams: usize) -> AudioEngine {
        let config = EngineConfig {
            max_streams: streams,
            ring_capacity: Some(64),
            ..Default::default()
        };
        let flash = MemoryStorage::new(StorageKind::Flash);
        flash.insert("one.wav", wav(&[100; 10]));
        flash.insert("two.wav", wav(&[200; 10]));
        let storage = StorageSet::new(
            Box::new(MemoryStorage::new(StorageKind::Card)),
            Box::new(flash),
            StorageLock::new(),
        );
        let pools = DecoderPools::from_config(&config);
        AudioEngine::with_parts(config, storage, pools).unwrap()
    }

    #[test]
    fn test_invalid_slot_errors() {
        let mut engine = engine(2);
        assert!(matches!(
            engine.start_stream(2, "one.wav", StorageKind::Flash),
            Err(Error::InvalidSlot(2))
        ));
        assert!(matches!(engine.stop_stream(5), Err(Error::InvalidSlot(5))));
        assert!(matches!(engine.set_volume(9, 0.5), Err(Error::InvalidSlot(9))));
        assert!(matches!(engine.request_stop(2), Err(Error::InvalidSlot(2))));
    }

    #[test]
    fn test_start_any_prefers_free_slot_then_steals_zero() {
        let mut engine = engine(2);
        assert_eq!(engine.start_any("one.wav", StorageKind::Flash).unwrap(), 0);
        assert_eq!(engine.start_any("two.wav", StorageKind::Flash).unwrap(), 1);
        assert_eq!(engine.start_any("two.wav", StorageKind::Flash).unwrap(), 0);
        assert!(engine.is_slot_active(0));
        assert!(engine.is_slot_active(1));
    }

    #[test]
    fn test_missing_file_leaves_slot_inactive() {
        let mut engine = engine(1);
        assert!(engine.start_stream(0, "nope.wav", StorageKind::Card).is_err());
        assert_eq!(engine.state(0).unwrap(), StreamState::Inactive);
    }

    #[test]
    fn test_stop_all_and_idle() {
        let mut engine = engine(2);
        engine.start_stream(0, "one.wav", StorageKind::Flash).unwrap();
        engine.start_chirp(1, ChirpParams::default()).unwrap();
        assert!(!engine.is_idle());
        engine.stop_all();
        assert!(engine.is_idle());
        // Idempotent
        engine.stop_stream(0).unwrap();
    }

    #[test]
    fn test_tick_plays_wav_through_to_inactive() {
        let mut engine = engine(1);
        let mut mixer = engine.mixer();
        engine.start_stream(0, "one.wav", StorageKind::Flash).unwrap();

        let report = engine.tick();
        assert_eq!(report.samples_pushed, 10);
        assert_eq!(engine.state(0).unwrap(), StreamState::Draining);

        let mut out = [0i16; 20];
        mixer.render(&mut out);
        assert_eq!(&out[..4], &[100, 100, 100, 100]);

        engine.tick();
        assert_eq!(engine.state(0).unwrap(), StreamState::Inactive);
    }

    #[test]
    fn test_request_stop_applies_on_tick() {
        let mut engine = engine(1);
        engine.start_stream(0, "one.wav", StorageKind::Flash).unwrap();
        engine.request_stop(0).unwrap();
        assert!(engine.is_slot_active(0));
        assert_eq!(engine.update_lifecycle(), 1);
        assert!(!engine.is_slot_active(0));
    }

    #[test]
    fn test_chirp_rejects_out_of_range_sweep() {
        let mut engine = engine(1);
        let params = ChirpParams {
            end_hz: 40_000,
            ..Default::default()
        };
        assert!(matches!(engine.start_chirp(0, params), Err(Error::Config(_))));
        assert!(engine.is_idle());
    }
}
