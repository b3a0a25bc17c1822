//! Error types for view operations.

use tessera_store::StoreError;
use tessera_types::TypeError;
use thiserror::Error;

/// Errors that can occur while resolving or managing views.
#[derive(Debug, Error)]
pub enum ViewError {
    /// The locator is malformed or names nothing the provider can open.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// Opening or attaching the backing store failed.
    #[error("failed to connect to {locator}: {reason}")]
    ConnectFailed { locator: String, reason: String },

    /// The backing store requires credentials.
    #[error("authentication required for {0}")]
    AuthRequired(String),

    /// The registry has been closed.
    #[error("view registry is closed")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ViewError {
    pub fn connect_failed(locator: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<TypeError> for ViewError {
    fn from(err: TypeError) -> Self {
        Self::InvalidLocator(err.to_string())
    }
}

/// Convenience type alias for view operations.
pub type ViewResult<T> = std::result::Result<T, ViewError>;
