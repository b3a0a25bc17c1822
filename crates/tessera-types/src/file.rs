use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a file entry inside one data store.
///
/// A `FileId` is a normalized absolute path (`/folder/name`). It is only
/// meaningful relative to the store that owns it: two stores may both contain
/// `/firmware.bin` and those are unrelated files.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Parse and validate a store path.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        if path.is_empty() {
            return Err(TypeError::path(path, "empty path"));
        }
        if !path.starts_with('/') {
            return Err(TypeError::path(path, "path must be absolute"));
        }
        if path == "/" {
            return Err(TypeError::path(path, "root folder is not a file"));
        }
        for segment in path[1..].split('/') {
            match segment {
                "" => return Err(TypeError::path(path, "empty path segment")),
                "." | ".." => return Err(TypeError::path(path, "relative path segment")),
                _ => {}
            }
        }
        Ok(Self(path.to_string()))
    }

    /// The full path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The containing folder path; `/` for top-level files.
    pub fn parent(&self) -> &str {
        match self.0.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.0[..idx],
        }
    }
}

impl FromStr for FileId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FileId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
