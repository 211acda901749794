//! Diagnostics and status accessors
//!
//! Snapshots are plain serializable values; taking one never blocks the
//! mixer.

use super::core::AudioEngine;
use crate::codec::PoolUsage;
use crate::error::{Error, Result};
use crate::playback::stream::{AudioStream, StreamStatus};
use serde::Serialize;

/// Engine-wide snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineDiagnostics {
    pub slots: Vec<StreamStatus>,
    pub pools: PoolUsage,
    pub ring_capacity: usize,
    pub frames_mixed: u64,
    pub clipped_samples: u64,
    pub audio_allowed: bool,
    pub master_volume: f32,
}

impl AudioEngine {
    /// Status of one slot
    ///
    /// # Returns
    /// Snapshot of state, source details and counters, or `InvalidSlot`
    pub fn query_status(&self, slot: usize) -> Result<StreamStatus> {
        self.streams
            .get(slot)
            .map(AudioStream::status)
            .ok_or(Error::InvalidSlot(slot))
    }

    /// Decoder pool occupancy
    pub fn pool_usage(&self) -> PoolUsage {
        self.pools.usage()
    }

    /// Snapshot of every slot plus pool and output counters
    pub fn diagnostics(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            slots: self.streams.iter().map(AudioStream::status).collect(),
            pools: self.pools.usage(),
            ring_capacity: self.config.ring_capacity(),
            frames_mixed: self.output.frames_mixed(),
            clipped_samples: self.output.clipped_samples(),
            audio_allowed: self.output.audio_allowed(),
            master_volume: self.output.master_volume(),
        }
    }
}
