use tessera_types::FileId;

use crate::error::StoreResult;
use crate::object::FileEntry;

/// Physical or remote location backing a [`DataStore`](crate::DataStore).
///
/// All implementations must satisfy these invariants:
/// - `read_content` never caches; the object cache above it does that.
/// - A file missing from the backend is reported as `StoreError::NotFound`.
/// - All I/O errors are propagated, never silently ignored.
pub trait StoreBackend: Send + Sync {
    /// List every file entry, sorted by path.
    fn list_files(&self) -> StoreResult<Vec<FileEntry>>;

    /// Read the raw bytes of a file.
    fn read_content(&self, file: &FileId) -> StoreResult<Vec<u8>>;

    /// Check whether a file exists.
    ///
    /// Default implementation scans `list_files()`. Backends may override
    /// with a direct lookup.
    fn contains(&self, file: &FileId) -> StoreResult<bool> {
        Ok(self.list_files()?.iter().any(|entry| &entry.id == file))
    }

    /// Release any resources held by the backend.
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Something whose files can be enumerated.
pub trait EnumerateFiles {
    type Error;

    /// Identities of every file, sorted by path.
    fn file_ids(&self) -> Result<Vec<FileId>, Self::Error>;
}

/// Something with an explicit, idempotent close.
pub trait Closeable {
    type Output;

    fn close(&self) -> Self::Output;

    fn is_closed(&self) -> bool;
}
