//! Data stores and the shared object cache for Tessera.
//!
//! A [`DataStore`] is a tree of file entries backed by one location, either a
//! directory on disk or an in-memory map. Opening a file materializes a
//! [`LoadedObject`] through the store's [`ObjectCache`], which shares one
//! instance among every consumer that asks for it and disposes of it as soon
//! as the last consumer lets go.
//!
//! # Backends
//!
//! All backends implement the [`StoreBackend`] trait:
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based backend for tests and embedding
//! - [`FsBackend`] -- directory tree on the local filesystem
//!
//! # Cache Rules
//!
//! 1. An object lives exactly as long as at least one consumer holds it.
//! 2. Consumers are a set: acquiring twice holds once, releasing once clears.
//! 3. Loads run outside the cache lock; a miss never blocks other files.
//! 4. A failed load leaves no trace in the cache.
//! 5. Closing a store force-evicts whatever is still held.

pub mod cache;
pub mod error;
pub mod fs;
pub mod gate;
pub mod memory;
pub mod object;
pub mod store;
pub mod traits;

pub use cache::{CacheStats, ObjectCache};
pub use error::{StoreError, StoreResult};
pub use fs::FsBackend;
pub use gate::Gate;
pub use memory::InMemoryBackend;
pub use object::{FileEntry, LoadedObject};
pub use store::DataStore;
pub use traits::{Closeable, EnumerateFiles, StoreBackend};
