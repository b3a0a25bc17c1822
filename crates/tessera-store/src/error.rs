use tessera_types::FileId;

/// Errors from data store and cache operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested file is not part of the store.
    #[error("file not found: {0}")]
    NotFound(FileId),

    /// Materializing a file's object failed. Nothing was cached.
    #[error("failed to load {file}: {source}")]
    LoadFailed {
        file: FileId,
        #[source]
        source: Box<StoreError>,
    },

    /// The store (or its cache) has been closed.
    #[error("store is closed: {0}")]
    StoreClosed(String),

    /// A backend reported data it cannot interpret.
    #[error("corrupt entry {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for the `LoadFailed` variant.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, StoreError::LoadFailed { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
