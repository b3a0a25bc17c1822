//! Keyed tool state and tool templates.
//!
//! Both maps are last-write-wins and travel with the project's save/restore
//! cycle. Values are opaque to the project: [`SaveState`] is a bag of named
//! JSON values, [`ToolTemplate`] a named byte blob.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProjectResult;

/// Named values saved on behalf of one tool or subsystem.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaveState {
    values: BTreeMap<String, Value>,
}

impl SaveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, replacing any previous value.
    pub fn put<T: Serialize>(&mut self, name: impl Into<String>, value: T) -> ProjectResult<()> {
        self.values.insert(name.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Read `name` back as `T`. `Ok(None)` if it was never stored.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> ProjectResult<Option<T>> {
        match self.values.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Opaque template blob saved by the tool subsystem.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTemplate {
    name: String,
    #[serde(with = "hex_bytes")]
    data: Vec<u8>,
}

impl ToolTemplate {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for ToolTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolTemplate")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

pub type StateMap = BTreeMap<String, SaveState>;
pub type TemplateMap = BTreeMap<String, ToolTemplate>;

#[derive(Default)]
struct StateInner {
    states: StateMap,
    templates: TemplateMap,
    dirty: bool,
}

/// Key → [`SaveState`] and tag → [`ToolTemplate`] maps with a dirty flag.
#[derive(Default)]
pub struct KeyedStateStore {
    inner: RwLock<StateInner>,
}

impl KeyedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clean store holding the given contents.
    pub fn from_parts(states: StateMap, templates: TemplateMap) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                states,
                templates,
                dirty: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StateInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StateInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, key: impl Into<String>, state: SaveState) {
        let mut inner = self.write();
        inner.states.insert(key.into(), state);
        inner.dirty = true;
    }

    pub fn state(&self, key: &str) -> Option<SaveState> {
        self.read().states.get(key).cloned()
    }

    pub fn save_template(&self, tag: impl Into<String>, template: ToolTemplate) {
        let mut inner = self.write();
        inner.templates.insert(tag.into(), template);
        inner.dirty = true;
    }

    pub fn template(&self, tag: &str) -> Option<ToolTemplate> {
        self.read().templates.get(tag).cloned()
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn mark_clean(&self) {
        self.write().dirty = false;
    }

    pub fn mark_dirty(&self) {
        self.write().dirty = true;
    }

    /// Snapshot both maps and clear the dirty flag in one step.
    ///
    /// Writes that land after the snapshot mark the store dirty again. The
    /// returned flag is the dirty state before the snapshot, for putting
    /// back if the save fails.
    pub fn snapshot_for_save(&self) -> (StateMap, TemplateMap, bool) {
        let mut inner = self.write();
        let was_dirty = std::mem::replace(&mut inner.dirty, false);
        (inner.states.clone(), inner.templates.clone(), was_dirty)
    }

    /// Copy of both maps, for persistence.
    pub fn to_parts(&self) -> (StateMap, TemplateMap) {
        let inner = self.read();
        (inner.states.clone(), inner.templates.clone())
    }

    /// Replace both maps wholesale and mark the store clean.
    pub fn replace(&self, states: StateMap, templates: TemplateMap) {
        let mut inner = self.write();
        inner.states = states;
        inner.templates = templates;
        inner.dirty = false;
    }
}

impl std::fmt::Debug for KeyedStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("KeyedStateStore")
            .field("states", &inner.states.len())
            .field("templates", &inner.templates.len())
            .field("dirty", &inner.dirty)
            .finish()
    }
}
