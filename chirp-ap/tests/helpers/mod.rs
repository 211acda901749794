//! Shared helpers for chirp-ap integration tests
//!
//! - `audio_generator`: deterministic WAV bytes and files (hound)
//! - `mp4_builder`: synthetic box-tree containers with chosen sample tables
//! - `frames`: silent MP3 and ADTS streams with real frame headers
//! - engine construction over in-memory storage

#![allow(dead_code)]

pub mod audio_generator;
pub mod frames;
pub mod mp4_builder;

pub use audio_generator::{ramp_wav, write_wav_file, wav_bytes};
pub use frames::{silent_aac_samples, silent_adts, silent_mp3};
pub use mp4_builder::{M4aBuilder, M4aFile};

use chirp_ap::codec::DecoderPools;
use chirp_ap::storage::{MemoryStorage, StorageLock};
use chirp_ap::{AudioEngine, StorageKind, StorageSet};
use chirp_common::EngineConfig;

/// Small engine config: `streams` slots with `ring` samples each
pub fn test_config(streams: usize, ring: usize) -> EngineConfig {
    EngineConfig {
        max_streams: streams,
        ring_capacity: Some(ring),
        ..Default::default()
    }
}

/// Engine over in-memory card and flash, each pre-loaded with `files`
pub fn memory_engine(config: EngineConfig, files: &[(&str, Vec<u8>)]) -> AudioEngine {
    let card = MemoryStorage::new(StorageKind::Card);
    let flash = MemoryStorage::new(StorageKind::Flash);
    for (path, bytes) in files {
        card.insert(path, bytes.clone());
        flash.insert(path, bytes.clone());
    }
    let storage = StorageSet::new(Box::new(card), Box::new(flash), StorageLock::new());
    let pools = DecoderPools::from_config(&config);
    AudioEngine::with_parts(config, storage, pools).expect("engine")
}
