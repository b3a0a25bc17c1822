use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tessera_types::FileId;

use crate::error::{StoreError, StoreResult};
use crate::object::FileEntry;
use crate::traits::StoreBackend;

/// In-memory, map-based store backend.
///
/// Intended for tests and embedding. Content lives in a `BTreeMap` behind a
/// `RwLock`, so listings come out sorted by path.
pub struct InMemoryBackend {
    files: RwLock<BTreeMap<FileId, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a backend pre-populated with `files`.
    pub fn with_files<I, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (FileId, C)>,
        C: Into<Vec<u8>>,
    {
        let backend = Self::new();
        for (id, content) in files {
            backend.insert(id, content);
        }
        backend
    }

    /// Add or replace a file.
    pub fn insert(&self, id: FileId, content: impl Into<Vec<u8>>) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, content.into());
    }

    /// Remove a file. Returns `true` if it existed.
    pub fn remove(&self, id: &FileId) -> bool {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::StoreClosed("in-memory backend".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for InMemoryBackend {
    fn list_files(&self) -> StoreResult<Vec<FileEntry>> {
        self.ensure_open()?;
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .iter()
            .map(|(id, content)| FileEntry::new(id.clone(), content.len() as u64))
            .collect())
    }

    fn read_content(&self, file: &FileId) -> StoreResult<Vec<u8>> {
        self.ensure_open()?;
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(file)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(file.clone()))
    }

    fn contains(&self, file: &FileId) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(file))
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("file_count", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
