//! Directory-tree backend.
//!
//! [`FsBackend`] exposes every regular file under a root directory as a file
//! entry whose [`FileId`] is the path relative to that root. Entries whose
//! relative path is not valid UTF-8 or not a valid `FileId` are skipped with
//! a debug log rather than failing the whole listing.

use std::io;
use std::path::{Component, Path, PathBuf};

use tessera_types::FileId;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::object::FileEntry;
use crate::traits::StoreBackend;

#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open an existing directory as a backend.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file: &FileId) -> PathBuf {
        let mut path = self.root.clone();
        for segment in file.as_str().split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn file_id_of(&self, path: &Path) -> Option<FileId> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut id = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    id.push('/');
                    id.push_str(part.to_str()?);
                }
                _ => return None,
            }
        }
        FileId::parse(&id).ok()
    }
}

impl StoreBackend for FsBackend {
    fn list_files(&self) -> StoreResult<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => StoreError::Io(io),
                None => StoreError::Corrupt {
                    path: self.root.display().to_string(),
                    reason: "filesystem loop".into(),
                },
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.file_id_of(entry.path()) {
                Some(id) => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    entries.push(FileEntry::new(id, size));
                }
                None => {
                    debug!(path = %entry.path().display(), "skipping unrepresentable path");
                }
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn read_content(&self, file: &FileId) -> StoreResult<Vec<u8>> {
        match std::fs::read(self.path_of(file)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(file.clone())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn contains(&self, file: &FileId) -> StoreResult<bool> {
        Ok(self.path_of(file).is_file())
    }
}
