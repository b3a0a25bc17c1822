use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_types::{ConsumerId, FileId, Locator};
use tracing::{info, warn};

use crate::cache::ObjectCache;
use crate::error::{StoreError, StoreResult};
use crate::object::{FileEntry, LoadedObject};
use crate::traits::{Closeable, EnumerateFiles, StoreBackend};

/// A tree of file entries backed by one location, with its object cache.
///
/// The store owns its [`ObjectCache`]; every object handed out by
/// [`open_object`](Self::open_object) is materialized from the backend at
/// most once while held.
pub struct DataStore {
    locator: Locator,
    backend: Arc<dyn StoreBackend>,
    cache: ObjectCache,
    closed: AtomicBool,
}

impl DataStore {
    pub fn new(locator: Locator, backend: Arc<dyn StoreBackend>) -> Self {
        let cache = ObjectCache::new(locator.to_string());
        Self {
            locator,
            backend,
            cache,
            closed: AtomicBool::new(false),
        }
    }

    /// The locator this store was opened from.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn name(&self) -> &str {
        self.locator.name()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::StoreClosed(self.locator.to_string()));
        }
        Ok(())
    }

    /// Every file entry in the store, sorted by path.
    pub fn files(&self) -> StoreResult<Vec<FileEntry>> {
        self.ensure_open()?;
        self.backend.list_files()
    }

    pub fn contains(&self, file: &FileId) -> StoreResult<bool> {
        self.ensure_open()?;
        self.backend.contains(file)
    }

    /// Get the shared object for `file`, holding it on behalf of `consumer`.
    pub fn open_object(
        &self,
        file: &FileId,
        consumer: &ConsumerId,
    ) -> StoreResult<Arc<LoadedObject>> {
        self.ensure_open()?;
        self.cache
            .acquire(file, consumer, || self.backend.read_content(file))
    }

    /// Drop `consumer`'s hold on `file`.
    pub fn release_object(&self, file: &FileId, consumer: &ConsumerId) -> bool {
        self.cache.release(file, consumer)
    }

    /// Drop every hold `consumer` has on objects from this store.
    pub fn release_all(&self, consumer: &ConsumerId) -> usize {
        self.cache.release_all(consumer)
    }

    /// Files with at least one consumer, sorted by path.
    pub fn open_files(&self) -> Vec<FileId> {
        self.cache.snapshot_open()
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    fn shutdown(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let evicted = self.cache.evict_all();
        if !evicted.is_empty() {
            warn!(
                store = %self.locator,
                evicted = evicted.len(),
                "closing store with open objects"
            );
        }
        self.backend.close()?;
        info!(store = %self.locator, "store closed");
        Ok(())
    }
}

impl EnumerateFiles for DataStore {
    type Error = StoreError;

    fn file_ids(&self) -> StoreResult<Vec<FileId>> {
        Ok(self.files()?.into_iter().map(|entry| entry.id).collect())
    }
}

impl Closeable for DataStore {
    type Output = StoreResult<()>;

    /// Close the store, force-evicting any objects still held.
    ///
    /// Idempotent: closing an already-closed store succeeds without effect.
    fn close(&self) -> StoreResult<()> {
        self.shutdown()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("locator", &self.locator.to_string())
            .field("closed", &self.is_closed())
            .field("cache", &self.cache)
            .finish()
    }
}
