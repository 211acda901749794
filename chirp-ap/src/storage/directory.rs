//! Filesystem-backed storage
//!
//! Each backend is rooted at a directory; device paths like `/sounds/a.wav`
//! resolve beneath it. The card backend takes the shared storage lock around
//! every open, read and seek.

use super::{validate_relative, SourceHandle, StorageBackend, StorageKind, StorageLock};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory acting as a storage device
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    kind: StorageKind,
    root: PathBuf,
    lock: Option<StorageLock>,
}

impl DirectoryStorage {
    /// Removable card: every access serialized through `lock`
    pub fn card(root: impl AsRef<Path>, lock: StorageLock) -> Self {
        Self {
            kind: StorageKind::Card,
            root: root.as_ref().to_path_buf(),
            lock: Some(lock),
        }
    }

    /// Internal flash: no sharing, no lock
    pub fn flash(root: impl AsRef<Path>) -> Self {
        Self {
            kind: StorageKind::Flash,
            root: root.as_ref().to_path_buf(),
            lock: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_relative(path)?))
    }
}

impl StorageBackend for DirectoryStorage {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn open(&self, path: &str) -> Result<Box<dyn SourceHandle>> {
        let full = self.resolve(path)?;
        let _guard = self.lock.as_ref().map(StorageLock::lock);

        let file = File::open(&full)
            .map_err(|e| Error::Storage(format!("Failed to open {} on {}: {}", path, self.kind, e)))?;
        let len = file
            .metadata()
            .map_err(|e| Error::Storage(format!("Failed to stat {}: {}", path, e)))?
            .len();

        debug!("Opened {} on {} ({} bytes)", path, self.kind, len);
        Ok(Box::new(FileHandle {
            file: Some(file),
            len,
            pos: 0,
            lock: self.lock.clone(),
        }))
    }

    fn exists(&self, path: &str) -> bool {
        let Ok(full) = self.resolve(path) else {
            return false;
        };
        let _guard = self.lock.as_ref().map(StorageLock::lock);
        full.is_file()
    }
}

/// Open file on a directory backend
pub struct FileHandle {
    /// `None` once closed
    file: Option<File>,
    len: u64,
    pos: u64,
    lock: Option<StorageLock>,
}

impl FileHandle {
    /// Open a file outside any backend (used by the probe command)
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Some(file),
            len,
            pos: 0,
            lock: None,
        })
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Storage("Read from closed handle".to_string()))
    }
}

impl SourceHandle for FileHandle {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos == self.pos {
            return Ok(());
        }
        let lock = self.lock.clone();
        let _guard = lock.as_ref().map(StorageLock::lock);
        self.file()?
            .seek(SeekFrom::Start(pos))
            .map_err(|e| Error::Storage(format!("Seek to {} failed: {}", pos, e)))?;
        self.pos = pos;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let lock = self.lock.clone();
        let _guard = lock.as_ref().map(StorageLock::lock);
        let pos = self.pos;
        let n = self
            .file()?
            .read(buf)
            .map_err(|e| Error::Storage(format!("Read at {} failed: {}", pos, e)))?;
        self.pos += n as u64;
        Ok(n)
    }

    fn close(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceHandleExt;
    use std::io::Write;

    #[test]
    fn test_open_read_seek() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("data.bin")).unwrap();
        file.write_all(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();

        let storage = DirectoryStorage::flash(dir.path());
        assert!(storage.exists("/data.bin"));
        assert!(!storage.exists("/missing.bin"));

        let mut handle = storage.open("/data.bin").unwrap();
        assert_eq!(handle.len(), 8);

        let mut buf = [0u8; 3];
        assert_eq!(handle.read_chunk(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0, 1, 2]);
        assert_eq!(handle.position(), 3);

        handle.read_exact_at(6, &mut buf[..2]).unwrap();
        assert_eq!(&buf[..2], &[6, 7]);
        assert_eq!(handle.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_card_handle_holds_no_lock_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), [0u8; 16]).unwrap();

        let lock = StorageLock::new();
        let storage = DirectoryStorage::card(dir.path(), lock.clone());
        let mut handle = storage.open("a.wav").unwrap();

        let mut buf = [0u8; 4];
        handle.read_chunk(&mut buf).unwrap();
        // Management side can take the device between reads
        drop(lock.lock());
        handle.read_chunk(&mut buf).unwrap();
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::flash(dir.path());
        assert!(matches!(storage.open("/nope.wav"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_closed_handle_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), [1u8; 4]).unwrap();
        let storage = DirectoryStorage::flash(dir.path());
        let mut handle = storage.open("a.bin").unwrap();
        handle.close();
        let mut buf = [0u8; 1];
        assert!(handle.read_chunk(&mut buf).is_err());
    }
}
