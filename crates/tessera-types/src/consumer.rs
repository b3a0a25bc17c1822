use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token identifying a holder of loaded objects.
///
/// Consumers are compared by their UUID only. The optional label is carried
/// for log output and never affects equality, so two tokens created with the
/// same label are still distinct consumers.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConsumerId {
    id: Uuid,
    label: Option<String>,
}

impl ConsumerId {
    /// Create a fresh, unlabeled consumer token.
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            label: None,
        }
    }

    /// Create a fresh consumer token with a label for diagnostics.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            label: Some(label.into()),
        }
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ConsumerId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConsumerId {}

impl Hash for ConsumerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsumerId({self})")
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.id.simple().to_string();
        match &self.label {
            Some(label) => write!(f, "{label}@{}", &simple[simple.len() - 8..]),
            None => write!(f, "consumer@{}", &simple[simple.len() - 8..]),
        }
    }
}
