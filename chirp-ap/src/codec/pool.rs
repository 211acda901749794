//! Decoder Pool
//!
//! Fixed-size pools of frame decoders, one pool per codec kind. Decoders are
//! created once at engine initialization and admitted against a byte budget
//! (the decoder arena); nothing is created or destroyed afterwards.
//!
//! Checkout hands out a `DecoderLease` that names one entry exclusively.
//! Leases are not `Clone`, so an entry can only be released once and two
//! streams can never hold the same entry. Checkout and release happen only
//! in the control context (stream start/stop), so no locking is needed.

use crate::codec::decoder::{ElementaryDecoder, FrameDecoder};
use crate::codec::CodecKind;
use crate::error::{Error, Result};
use chirp_common::EngineConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Fixed byte budget that decoder instances are admitted against
#[derive(Debug, Clone, Copy)]
pub struct DecoderArena {
    budget_bytes: usize,
    used_bytes: usize,
}

impl DecoderArena {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            used_bytes: 0,
        }
    }

    /// Reserve `bytes`; false if the budget would be exceeded
    pub fn reserve(&mut self, bytes: usize) -> bool {
        match self.used_bytes.checked_add(bytes) {
            Some(total) if total <= self.budget_bytes => {
                self.used_bytes = total;
                true
            }
            _ => false,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }
}

/// Exclusive claim on one pool entry
///
/// Returned by checkout, consumed by release.
#[derive(Debug, PartialEq, Eq)]
pub struct DecoderLease {
    kind: CodecKind,
    index: usize,
}

impl DecoderLease {
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Entry index within the pool of this kind
    pub fn index(&self) -> usize {
        self.index
    }
}

struct PoolEntry {
    decoder: Box<dyn FrameDecoder>,
    in_use: bool,
}

/// Pool of decoders of a single codec kind
pub struct DecoderPool {
    kind: CodecKind,
    entries: Vec<PoolEntry>,
}

impl DecoderPool {
    pub fn new(kind: CodecKind, decoders: Vec<Box<dyn FrameDecoder>>) -> Self {
        let entries = decoders
            .into_iter()
            .map(|decoder| PoolEntry {
                decoder,
                in_use: false,
            })
            .collect();
        Self { kind, entries }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| e.in_use).count()
    }

    /// Claim the first free entry
    pub fn checkout(&mut self) -> Result<DecoderLease> {
        let kind = self.kind;
        let (index, entry) = self
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| !e.in_use)
            .ok_or_else(|| {
                Error::ResourceExhausted(format!("No free {} decoder", kind))
            })?;

        entry.in_use = true;
        debug!("Checked out {} decoder {}", kind, index);
        Ok(DecoderLease { kind, index })
    }

    /// Return an entry; its decoder is reset for the next stream
    pub fn release(&mut self, lease: DecoderLease) {
        match self.entries.get_mut(lease.index) {
            Some(entry) if lease.kind == self.kind => {
                entry.decoder.reset();
                entry.in_use = false;
                debug!("Released {} decoder {}", self.kind, lease.index);
            }
            _ => warn!(
                "Ignoring release of {} lease {} into {} pool",
                lease.kind, lease.index, self.kind
            ),
        }
    }

    /// Decoder behind a lease
    pub fn decoder_mut(&mut self, lease: &DecoderLease) -> Option<&mut dyn FrameDecoder> {
        if lease.kind != self.kind {
            return None;
        }
        self.entries
            .get_mut(lease.index)
            .filter(|e| e.in_use)
            .map(|e| e.decoder.as_mut() as &mut dyn FrameDecoder)
    }
}

/// Factory for the symphonia-backed decoders engines run with
pub fn elementary_decoder(kind: CodecKind) -> Result<Box<dyn FrameDecoder>> {
    Ok(Box::new(ElementaryDecoder::new(kind)?))
}

/// Pool occupancy snapshot for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub mp3_capacity: usize,
    pub mp3_in_use: usize,
    pub aac_capacity: usize,
    pub aac_in_use: usize,
    pub arena_used_bytes: usize,
    pub arena_budget_bytes: usize,
}

/// All decoder pools of an engine
pub struct DecoderPools {
    mp3: DecoderPool,
    aac: DecoderPool,
    arena: DecoderArena,
}

impl DecoderPools {
    /// Build the pools from configured sizes and the arena budget
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_factory(
            config.max_mp3_decoders,
            config.max_aac_decoders,
            config.decoder_arena_kb * 1024,
            elementary_decoder,
        )
    }

    /// Build pools with decoders from `factory`
    ///
    /// Decoders are admitted alternately per kind until the requested counts
    /// are reached or the arena is full, so a tight budget shrinks both pools
    /// evenly rather than starving one. A kind whose decoder cannot be built
    /// stops growing at the decoders it already has.
    pub fn with_factory<F>(mp3_count: usize, aac_count: usize, budget_bytes: usize, mut factory: F) -> Self
    where
        F: FnMut(CodecKind) -> Result<Box<dyn FrameDecoder>>,
    {
        let mut arena = DecoderArena::new(budget_bytes);
        let mut mp3 = Vec::with_capacity(mp3_count);
        let mut aac = Vec::with_capacity(aac_count);
        let mut mp3_full = mp3_count == 0;
        let mut aac_full = aac_count == 0;

        while !(mp3_full && aac_full) {
            for (kind, decoders, wanted, full) in [
                (CodecKind::Mp3, &mut mp3, mp3_count, &mut mp3_full),
                (CodecKind::Aac, &mut aac, aac_count, &mut aac_full),
            ] {
                if *full {
                    continue;
                }
                let decoder = match factory(kind) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        warn!("Failed to build {} decoder: {}", kind, e);
                        *full = true;
                        continue;
                    }
                };
                if arena.reserve(decoder.footprint_bytes()) {
                    decoders.push(decoder);
                    *full = decoders.len() >= wanted;
                } else {
                    *full = true;
                }
            }
        }

        if mp3.len() < mp3_count || aac.len() < aac_count {
            warn!(
                "Decoder arena of {} bytes holds {}/{} mp3 and {}/{} aac decoders",
                budget_bytes,
                mp3.len(),
                mp3_count,
                aac.len(),
                aac_count
            );
        }
        info!(
            "Decoder pools: {} mp3, {} aac ({} of {} arena bytes)",
            mp3.len(),
            aac.len(),
            arena.used_bytes(),
            arena.budget_bytes()
        );

        Self {
            mp3: DecoderPool::new(CodecKind::Mp3, mp3),
            aac: DecoderPool::new(CodecKind::Aac, aac),
            arena,
        }
    }

    pub fn pool(&self, kind: CodecKind) -> &DecoderPool {
        match kind {
            CodecKind::Mp3 => &self.mp3,
            CodecKind::Aac => &self.aac,
        }
    }

    fn pool_mut(&mut self, kind: CodecKind) -> &mut DecoderPool {
        match kind {
            CodecKind::Mp3 => &mut self.mp3,
            CodecKind::Aac => &mut self.aac,
        }
    }

    pub fn checkout(&mut self, kind: CodecKind) -> Result<DecoderLease> {
        self.pool_mut(kind).checkout()
    }

    pub fn release(&mut self, lease: DecoderLease) {
        self.pool_mut(lease.kind).release(lease)
    }

    pub fn decoder_mut(&mut self, lease: &DecoderLease) -> Option<&mut dyn FrameDecoder> {
        self.pool_mut(lease.kind).decoder_mut(lease)
    }

    pub fn usage(&self) -> PoolUsage {
        PoolUsage {
            mp3_capacity: self.mp3.capacity(),
            mp3_in_use: self.mp3.in_use(),
            aac_capacity: self.aac.capacity(),
            aac_in_use: self.aac.in_use(),
            arena_used_bytes: self.arena.used_bytes(),
            arena_budget_bytes: self.arena.budget_bytes(),
        }
    }
}
