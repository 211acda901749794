//! In-memory storage backend for tests and tools

use super::{validate_relative, SourceHandle, StorageBackend, StorageKind};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Files held in memory, keyed by normalized path
#[derive(Debug)]
pub struct MemoryStorage {
    kind: StorageKind,
    files: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl MemoryStorage {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Add or replace a file
    pub fn insert(&self, path: &str, data: impl Into<Arc<[u8]>>) {
        let key = normalize(path);
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, data.into());
    }

    fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&normalize(path))
            .cloned()
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl StorageBackend for MemoryStorage {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn open(&self, path: &str) -> Result<Box<dyn SourceHandle>> {
        validate_relative(path)?;
        let data = self
            .get(path)
            .ok_or_else(|| Error::Storage(format!("File not found on {}: {}", self.kind, path)))?;
        Ok(Box::new(MemoryHandle { data, pos: 0 }))
    }

    fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

/// Read cursor over shared bytes
pub struct MemoryHandle {
    data: Arc<[u8]>,
    pos: u64,
}

impl SourceHandle for MemoryHandle {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}
