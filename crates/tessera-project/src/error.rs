use tessera_store::StoreError;
use tessera_types::TypeError;
use tessera_views::ViewError;
use thiserror::Error;

/// Errors surfaced by [`Project`](crate::Project) operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// The project has been closed; only `name`, `locator` and
    /// `is_closed` remain available.
    #[error("project {0} is closed")]
    ProjectClosed(String),

    #[error("failed to connect to {locator}: {reason}")]
    ConnectFailed { locator: String, reason: String },

    #[error("authentication required for {0}")]
    AuthRequired(String),

    /// A file's object could not be materialized. The cache is unchanged.
    #[error("failed to load {file}: {reason}")]
    LoadFailed { file: String, reason: String },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("view error: {0}")]
    View(ViewError),

    /// Saving or restoring project metadata failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ProjectError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LoadFailed { file, source } => Self::LoadFailed {
                file: file.to_string(),
                reason: source.to_string(),
            },
            other => Self::Store(other),
        }
    }
}

impl From<ViewError> for ProjectError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::InvalidLocator(msg) => Self::InvalidLocator(msg),
            ViewError::ConnectFailed { locator, reason } => Self::ConnectFailed { locator, reason },
            ViewError::AuthRequired(locator) => Self::AuthRequired(locator),
            ViewError::Store(e) => e.into(),
            other => Self::View(other),
        }
    }
}

impl From<TypeError> for ProjectError {
    fn from(err: TypeError) -> Self {
        Self::InvalidLocator(err.to_string())
    }
}

impl From<serde_json::Error> for ProjectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for ProjectError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenience type alias for project operations.
pub type ProjectResult<T> = Result<T, ProjectError>;
