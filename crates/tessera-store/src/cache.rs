//! Consumer-reference-counted object cache.
//!
//! [`ObjectCache`] maps a [`FileId`] to a shared [`LoadedObject`] together
//! with the set of consumers holding it. There is no capacity bound: an entry
//! is evicted exactly when its consumer set becomes empty.
//!
//! All slot bookkeeping happens under one short-held mutex. A cache miss
//! parks a `Loading` slot carrying a [`Gate`], drops the mutex, and loads
//! outside it; other acquirers of the same file wait on the gate and retry,
//! while acquirers of other files proceed untouched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tessera_types::{ConsumerId, FileId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::gate::Gate;
use crate::object::LoadedObject;

/// Counters exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful loads from the backend.
    pub loads: u64,
    /// Acquires served from an existing entry.
    pub hits: u64,
    /// Entries evicted because their consumer set emptied (or on close).
    pub evictions: u64,
}

struct Entry {
    object: Arc<LoadedObject>,
    consumers: HashSet<ConsumerId>,
}

enum Slot {
    Loading(Arc<Gate>),
    Ready(Entry),
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<FileId, Slot>,
    closed: bool,
}

/// Settles a `Loading` slot even if the loader panics, so waiters never hang.
struct PendingLoad<'a> {
    cache: &'a ObjectCache,
    file: &'a FileId,
    gate: Arc<Gate>,
}

impl PendingLoad<'_> {
    /// Whether the slot for this file is still the one we installed.
    fn owns(&self, state: &CacheState) -> bool {
        matches!(state.slots.get(self.file), Some(Slot::Loading(g)) if Arc::ptr_eq(g, &self.gate))
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.cache.lock();
            if self.owns(&state) {
                state.slots.remove(self.file);
            }
        }
        self.gate.open();
    }
}

/// Shared, consumer-counted cache of loaded objects for one data store.
pub struct ObjectCache {
    owner: String,
    state: Mutex<CacheState>,
    loads: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl ObjectCache {
    /// Create an empty cache. `owner` names the store in log output.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: Mutex::new(CacheState::default()),
            loads: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the object for `file`, registering `consumer` as a holder.
    ///
    /// An existing entry is shared; otherwise `load` produces the bytes and a
    /// new entry is inserted with `consumer` as its only holder. A failed
    /// load returns [`StoreError::LoadFailed`] and inserts nothing.
    pub fn acquire<F>(
        &self,
        file: &FileId,
        consumer: &ConsumerId,
        load: F,
    ) -> StoreResult<Arc<LoadedObject>>
    where
        F: Fn() -> StoreResult<Vec<u8>>,
    {
        loop {
            let mut state = self.lock();
            if state.closed {
                return Err(StoreError::StoreClosed(self.owner.clone()));
            }
            let in_flight = match state.slots.get_mut(file) {
                Some(Slot::Ready(entry)) => {
                    entry.consumers.insert(consumer.clone());
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&entry.object));
                }
                Some(Slot::Loading(gate)) => Some(Arc::clone(gate)),
                None => None,
            };

            match in_flight {
                Some(gate) => {
                    drop(state);
                    debug!(store = %self.owner, %file, "waiting for in-flight load");
                    gate.wait();
                }
                None => {
                    let gate = Arc::new(Gate::new());
                    state
                        .slots
                        .insert(file.clone(), Slot::Loading(Arc::clone(&gate)));
                    drop(state);

                    let pending = PendingLoad {
                        cache: self,
                        file,
                        gate,
                    };
                    let loaded = load();
                    return self.complete_load(pending, consumer, loaded);
                }
            }
        }
    }

    fn complete_load(
        &self,
        pending: PendingLoad<'_>,
        consumer: &ConsumerId,
        loaded: StoreResult<Vec<u8>>,
    ) -> StoreResult<Arc<LoadedObject>> {
        let file = pending.file;
        let mut state = self.lock();
        let data = match loaded {
            Ok(data) => data,
            Err(source) => {
                if pending.owns(&state) {
                    state.slots.remove(file);
                }
                debug!(store = %self.owner, %file, error = %source, "load failed");
                return Err(StoreError::LoadFailed {
                    file: file.clone(),
                    source: Box::new(source),
                });
            }
        };
        if state.closed || !pending.owns(&state) {
            return Err(StoreError::StoreClosed(self.owner.clone()));
        }

        let object = Arc::new(LoadedObject::new(file.clone(), data));
        let mut consumers = HashSet::new();
        consumers.insert(consumer.clone());
        state.slots.insert(
            file.clone(),
            Slot::Ready(Entry {
                object: Arc::clone(&object),
                consumers,
            }),
        );
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(store = %self.owner, %file, %consumer, bytes = object.len(), "object loaded");
        Ok(object)
    }

    /// Drop `consumer`'s hold on `file`, evicting the entry if it was the last.
    ///
    /// Returns `false` if `consumer` held nothing for `file`.
    pub fn release(&self, file: &FileId, consumer: &ConsumerId) -> bool {
        let mut state = self.lock();
        let now_empty = match state.slots.get_mut(file) {
            Some(Slot::Ready(entry)) => {
                if !entry.consumers.remove(consumer) {
                    return false;
                }
                entry.consumers.is_empty()
            }
            _ => return false,
        };
        let evicted = if now_empty {
            state.slots.remove(file)
        } else {
            None
        };
        drop(state);

        if let Some(Slot::Ready(entry)) = evicted {
            self.dispose(file, &entry.object);
        }
        true
    }

    /// Drop every hold `consumer` has in this cache.
    ///
    /// Returns the number of entries evicted as a result.
    pub fn release_all(&self, consumer: &ConsumerId) -> usize {
        let mut evicted = Vec::new();
        {
            let mut state = self.lock();
            state.slots.retain(|file, slot| match slot {
                Slot::Ready(entry) => {
                    if entry.consumers.remove(consumer) && entry.consumers.is_empty() {
                        evicted.push((file.clone(), Arc::clone(&entry.object)));
                        false
                    } else {
                        true
                    }
                }
                Slot::Loading(_) => true,
            });
        }
        for (file, object) in &evicted {
            self.dispose(file, object);
        }
        evicted.len()
    }

    /// Files currently held by at least one consumer, sorted by path.
    pub fn snapshot_open(&self) -> Vec<FileId> {
        let state = self.lock();
        let mut open: Vec<FileId> = state
            .slots
            .iter()
            .filter_map(|(file, slot)| match slot {
                Slot::Ready(entry) if !entry.consumers.is_empty() => Some(file.clone()),
                _ => None,
            })
            .collect();
        open.sort();
        open
    }

    /// Whether `file` is currently held.
    pub fn is_open(&self, file: &FileId) -> bool {
        matches!(self.lock().slots.get(file), Some(Slot::Ready(_)))
    }

    /// Consumers currently holding `file`.
    pub fn consumers(&self, file: &FileId) -> Vec<ConsumerId> {
        match self.lock().slots.get(file) {
            Some(Slot::Ready(entry)) => entry.consumers.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            loads: self.loads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Close the cache and force-evict every loaded entry.
    ///
    /// Subsequent acquires fail with `StoreClosed`. Returns the evicted
    /// files, sorted by path.
    pub fn evict_all(&self) -> Vec<FileId> {
        let drained: Vec<(FileId, Entry)> = {
            let mut state = self.lock();
            state.closed = true;
            let ready: Vec<FileId> = state
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(file, _)| file.clone())
                .collect();
            ready
                .into_iter()
                .filter_map(|file| match state.slots.remove(&file) {
                    Some(Slot::Ready(entry)) => Some((file, entry)),
                    _ => None,
                })
                .collect()
        };

        let mut evicted = Vec::with_capacity(drained.len());
        for (file, entry) in drained {
            if !entry.consumers.is_empty() {
                warn!(
                    store = %self.owner,
                    %file,
                    consumers = entry.consumers.len(),
                    "force-evicting object still held by consumers"
                );
            }
            self.dispose(&file, &entry.object);
            evicted.push(file);
        }
        evicted.sort();
        evicted
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn dispose(&self, file: &FileId, object: &LoadedObject) {
        object.dispose();
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(store = %self.owner, %file, "object evicted");
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("owner", &self.owner)
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
