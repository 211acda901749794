//! Storage backends
//!
//! Sound files live on one of two backends: the removable card or internal
//! flash. Both expose the same narrow interface (open a path, then read, seek
//! and close the handle) so the fill engine never knows which device it is
//! reading.
//!
//! The card is shared with management operations outside the playback
//! engine (directory scans, flash sync), so every card access takes the
//! `StorageLock`. The mixer never touches storage.

pub mod directory;
pub mod memory;

pub use directory::DirectoryStorage;
pub use memory::MemoryStorage;

use crate::error::{Error, Result};
use chirp_common::EngineConfig;
use serde::Serialize;
use std::path::{Component, Path};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which device a file is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Removable card
    Card,
    /// Internal flash
    Flash,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Card => write!(f, "card"),
            StorageKind::Flash => write!(f, "flash"),
        }
    }
}

/// Mutual exclusion for a physical device shared with other subsystems
#[derive(Debug, Clone, Default)]
pub struct StorageLock(Arc<Mutex<()>>);

impl StorageLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the device until the guard drops
    ///
    /// A panic while holding the lock leaves no state behind it, so a
    /// poisoned lock is simply taken over.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open file on a storage backend
pub trait SourceHandle: Send {
    /// Total file length in bytes
    fn len(&self) -> u64;

    /// Current read offset
    fn position(&self) -> u64;

    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes at the current offset
    ///
    /// Returns 0 at end of file.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the underlying file
    fn close(&mut self) {}

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positioned reads on top of `SourceHandle`
pub trait SourceHandleExt: SourceHandle {
    /// Fill `buf` from absolute offset `pos`
    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.seek(pos)?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_chunk(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::Storage(format!(
                    "Unexpected end of file reading {} bytes at offset {}",
                    buf.len(),
                    pos
                )));
            }
            filled += n;
        }
        Ok(())
    }

    fn read_u16_be_at(&mut self, pos: u64) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.read_exact_at(pos, &mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_u32_be_at(&mut self, pos: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact_at(pos, &mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl<T: SourceHandle + ?Sized> SourceHandleExt for T {}

/// A device files can be opened from
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    fn open(&self, path: &str) -> Result<Box<dyn SourceHandle>>;

    fn exists(&self, path: &str) -> bool;
}

/// Reject paths that could escape the backend root
pub(crate) fn validate_relative(path: &str) -> Result<&Path> {
    let relative = Path::new(path.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(Error::Storage(format!("Invalid path: {:?}", path)));
    }
    Ok(relative)
}

/// The card and flash backends of one engine
pub struct StorageSet {
    card: Box<dyn StorageBackend>,
    flash: Box<dyn StorageBackend>,
    card_lock: StorageLock,
}

impl StorageSet {
    pub fn new(card: Box<dyn StorageBackend>, flash: Box<dyn StorageBackend>, card_lock: StorageLock) -> Self {
        Self {
            card,
            flash,
            card_lock,
        }
    }

    /// Directory-backed card and flash at the configured roots
    pub fn from_config(config: &EngineConfig) -> Self {
        let card_lock = StorageLock::new();
        Self {
            card: Box::new(DirectoryStorage::card(&config.card_root, card_lock.clone())),
            flash: Box::new(DirectoryStorage::flash(&config.flash_root)),
            card_lock,
        }
    }

    pub fn backend(&self, kind: StorageKind) -> &dyn StorageBackend {
        match kind {
            StorageKind::Card => self.card.as_ref(),
            StorageKind::Flash => self.flash.as_ref(),
        }
    }

    /// Lock shared with card management operations
    pub fn card_lock(&self) -> StorageLock {
        self.card_lock.clone()
    }
}
