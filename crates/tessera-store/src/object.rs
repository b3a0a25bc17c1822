use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tessera_types::{ContentId, FileId};

/// A file entry as listed by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    /// Size of the file's content in bytes.
    pub size: u64,
}

impl FileEntry {
    pub fn new(id: FileId, size: u64) -> Self {
        Self { id, size }
    }
}

/// In-memory materialization of a file's content.
///
/// Only [`ObjectCache`](crate::ObjectCache) creates and disposes of these.
/// Callers receive shared handles; once the last consumer releases the
/// object the cache marks it disposed, and a caller still holding an `Arc`
/// can observe that through [`is_disposed`](Self::is_disposed).
pub struct LoadedObject {
    file: FileId,
    content_id: ContentId,
    data: Vec<u8>,
    disposed: AtomicBool,
}

impl LoadedObject {
    pub(crate) fn new(file: FileId, data: Vec<u8>) -> Self {
        Self {
            content_id: ContentId::of(&data),
            file,
            data,
            disposed: AtomicBool::new(false),
        }
    }

    /// The file this object was loaded from.
    pub fn file(&self) -> &FileId {
        &self.file
    }

    /// Digest of the loaded bytes.
    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the cache has evicted this object.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for LoadedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedObject")
            .field("file", &self.file)
            .field("content_id", &self.content_id)
            .field("len", &self.data.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
