use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid locator {input:?}: {reason}")]
    InvalidLocator { input: String, reason: String },

    #[error("invalid file path {input:?}: {reason}")]
    InvalidPath { input: String, reason: String },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl TypeError {
    pub(crate) fn locator(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLocator {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn path(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
