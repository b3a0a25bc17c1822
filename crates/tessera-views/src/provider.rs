//! Connection providers: how a [`Locator`] becomes a [`DataStore`].
//!
//! The registry never opens stores itself; it asks a [`ConnectionProvider`].
//! Providers are expected to bound their own connection attempts, but the
//! registry additionally enforces a deadline so a hung provider cannot wedge
//! the project.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tessera_store::{DataStore, FsBackend, InMemoryBackend, StoreBackend};
use tessera_types::{FileId, Locator};
use tracing::debug;

use crate::error::{ViewError, ViewResult};

/// Opens the backing store named by a locator.
///
/// Every successful call returns a fresh [`DataStore`]; identity stability
/// across calls is the registry's job, not the provider's.
pub trait ConnectionProvider: Send + Sync {
    /// Open or attach the store for `locator`.
    ///
    /// Reports `ConnectFailed`, `InvalidLocator`, or `AuthRequired`.
    fn connect(&self, locator: &Locator) -> ViewResult<Arc<DataStore>>;
}

enum Registration {
    /// Snapshot of file contents; every connect gets its own backend.
    Files(Vec<(FileId, Vec<u8>)>),
    /// A shared backend handed to every connect.
    Backend(Arc<dyn StoreBackend>),
    AuthRequired,
}

/// Provider over a fixed table of locators.
///
/// Used for embedding and tests. Unknown locators fail with
/// `ConnectFailed`; [`connect_count`](Self::connect_count) exposes how many
/// stores were actually opened.
#[derive(Default)]
pub struct StaticProvider {
    table: RwLock<HashMap<Locator, Registration>>,
    connects: AtomicUsize,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `locator` as a store containing `files`.
    pub fn register_files<I, C>(&self, locator: Locator, files: I)
    where
        I: IntoIterator<Item = (FileId, C)>,
        C: Into<Vec<u8>>,
    {
        let files = files.into_iter().map(|(id, c)| (id, c.into())).collect();
        self.insert(locator, Registration::Files(files));
    }

    /// Register `locator` as a store over an existing backend.
    pub fn register_backend(&self, locator: Locator, backend: Arc<dyn StoreBackend>) {
        self.insert(locator, Registration::Backend(backend));
    }

    /// Make `locator` fail with `AuthRequired`.
    pub fn require_auth(&self, locator: Locator) {
        self.insert(locator, Registration::AuthRequired);
    }

    fn insert(&self, locator: Locator, registration: Registration) {
        self.table
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(locator, registration);
    }

    /// Number of stores opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for StaticProvider {
    fn connect(&self, locator: &Locator) -> ViewResult<Arc<DataStore>> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let backend: Arc<dyn StoreBackend> = match table.get(locator) {
            Some(Registration::Files(files)) => Arc::new(InMemoryBackend::with_files(
                files.iter().map(|(id, c)| (id.clone(), c.clone())),
            )),
            Some(Registration::Backend(backend)) => Arc::clone(backend),
            Some(Registration::AuthRequired) => {
                return Err(ViewError::AuthRequired(locator.to_string()))
            }
            None => return Err(ViewError::connect_failed(locator, "no such store")),
        };
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(%locator, "static store opened");
        Ok(Arc::new(DataStore::new(locator.clone(), backend)))
    }
}

/// Provider for projects on the local filesystem.
///
/// `tessera:/<directory>/<name>` opens the directory `<directory>/<name>`
/// as an [`FsBackend`]. Remote locators are not served.
#[derive(Debug, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionProvider for LocalProvider {
    fn connect(&self, locator: &Locator) -> ViewResult<Arc<DataStore>> {
        let path = locator.local_path().ok_or_else(|| {
            ViewError::connect_failed(locator, "remote repositories are not served locally")
        })?;
        let backend = FsBackend::open(&path)
            .map_err(|e| ViewError::connect_failed(locator, e.to_string()))?;
        debug!(%locator, path = %path.display(), "local store opened");
        Ok(Arc::new(DataStore::new(locator.clone(), Arc::new(backend))))
    }
}
