//! Persisted project metadata and where it lives.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_types::Locator;
use tracing::debug;

use crate::error::{ProjectError, ProjectResult};
use crate::state::{StateMap, TemplateMap};

/// One view as recorded at save time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedView {
    pub locator: Locator,
    pub visible: bool,
}

/// Everything a project saves: its views and keyed state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    /// Views in attach order.
    #[serde(default)]
    pub views: Vec<SavedView>,
    #[serde(default)]
    pub states: StateMap,
    #[serde(default)]
    pub templates: TemplateMap,
    pub saved_at: DateTime<Utc>,
}

impl ProjectMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            views: Vec::new(),
            states: StateMap::new(),
            templates: TemplateMap::new(),
            saved_at: Utc::now(),
        }
    }
}

/// Durable home for [`ProjectMetadata`].
pub trait MetadataStore: Send + Sync {
    fn save(&self, metadata: &ProjectMetadata) -> ProjectResult<()>;

    /// `Ok(None)` if nothing has been saved yet.
    fn load(&self) -> ProjectResult<Option<ProjectMetadata>>;
}

/// Metadata kept in memory. Used for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    slot: RwLock<Option<ProjectMetadata>>,
    saves: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `metadata` already saved.
    pub fn with_metadata(metadata: ProjectMetadata) -> Self {
        Self {
            slot: RwLock::new(Some(metadata)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn save(&self, metadata: &ProjectMetadata) -> ProjectResult<()> {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(metadata.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> ProjectResult<Option<ProjectMetadata>> {
        Ok(self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Metadata stored as a pretty-printed JSON file.
///
/// Saves go to a sibling temp file that is then renamed over the target, so
/// a crash mid-save leaves the previous metadata intact.
#[derive(Clone, Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
}

impl FileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MetadataStore for FileMetadataStore {
    fn save(&self, metadata: &ProjectMetadata) -> ProjectResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(metadata)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "project metadata written");
        Ok(())
    }

    fn load(&self) -> ProjectResult<Option<ProjectMetadata>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            ProjectError::Persistence(format!("{}: {e}", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SaveState, ToolTemplate};

    fn sample() -> ProjectMetadata {
        let mut meta = ProjectMetadata::new("router");
        meta.views.push(SavedView {
            locator: Locator::parse("tessera://host/libc").unwrap(),
            visible: true,
        });
        let mut state = SaveState::new();
        state.put("zoom", 2).unwrap();
        meta.states.insert("listing".into(), state);
        meta.templates
            .insert("default".into(), ToolTemplate::new("CodeBrowser", b"tpl".to_vec()));
        meta
    }

    #[test]
    fn in_memory_store_keeps_last_save() {
        let store = InMemoryMetadataStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        store.save(&ProjectMetadata::new("renamed")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().name, "renamed");
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path().join("nested/router.tessera.json"));
        assert!(store.load().unwrap().is_none());

        let meta = sample();
        store.save(&meta).unwrap();
        assert_eq!(store.load().unwrap(), Some(meta));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn file_store_reports_corrupt_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.tessera.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = FileMetadataStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ProjectError::Persistence(_)));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let raw = r#"{ "name": "bare", "saved_at": "2026-01-02T03:04:05Z" }"#;
        let meta: ProjectMetadata = serde_json::from_str(raw).unwrap();
        assert!(meta.views.is_empty());
        assert!(meta.states.is_empty());
        assert!(meta.templates.is_empty());
    }
}
