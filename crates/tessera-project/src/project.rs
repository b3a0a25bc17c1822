//! The project coordinator.
//!
//! A [`Project`] owns one primary [`DataStore`] and any number of views
//! attached through a [`ViewRegistry`]. It fans consumer releases out to
//! every store, reports which files are open anywhere, notifies listeners
//! when visible views come and go, and saves/restores its view list and
//! keyed state through a [`MetadataStore`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::Utc;
use tessera_store::{Closeable, DataStore, EnumerateFiles, StoreResult};
use tessera_types::{ConsumerId, FileId, Locator};
use tessera_views::{
    ConnectionProvider, ListenerHub, LocalProvider, SubscriptionId, ViewEvent, ViewListener,
    ViewRegistry,
};
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::error::{ProjectError, ProjectResult};
use crate::metadata::{FileMetadataStore, MetadataStore, ProjectMetadata, SavedView};
use crate::state::{KeyedStateStore, SaveState, ToolTemplate};

/// A file with at least one consumer, and the store it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpenFile {
    pub store: Locator,
    pub file: FileId,
}

/// A view whose store failed to close.
#[derive(Clone, Debug)]
pub struct ViewCloseFailure {
    pub locator: Locator,
    pub message: String,
}

/// Outcome of [`Project::close`].
#[derive(Clone, Debug, Default)]
pub struct CloseReport {
    /// The project was already closed; nothing was done.
    pub already_closed: bool,
    pub views_closed: usize,
    pub failures: Vec<ViewCloseFailure>,
    /// Set if closing the primary store failed.
    pub primary_error: Option<String>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.primary_error.is_none()
    }
}

/// A saved view that could not be re-attached.
#[derive(Clone, Debug)]
pub struct RestoreFailure {
    pub locator: Locator,
    pub message: String,
}

/// Outcome of [`Project::restore`].
#[derive(Clone, Debug, Default)]
pub struct RestoreReport {
    /// Saved metadata existed.
    pub found: bool,
    pub attached: Vec<Locator>,
    pub detached: Vec<Locator>,
    pub failures: Vec<RestoreFailure>,
}

pub struct Project {
    name: String,
    locator: Locator,
    primary: Arc<DataStore>,
    registry: ViewRegistry,
    listeners: ListenerHub,
    state: KeyedStateStore,
    metadata: Arc<dyn MetadataStore>,
    /// Operations hold the read side while they touch project state; `close`
    /// takes the write side. Never held while listeners run.
    lifecycle: RwLock<()>,
    closed: AtomicBool,
    views_changed: AtomicBool,
}

impl Project {
    /// Build a project around `primary` without touching saved metadata.
    pub fn new(
        config: ProjectConfig,
        primary: Arc<DataStore>,
        provider: Arc<dyn ConnectionProvider>,
        metadata: Arc<dyn MetadataStore>,
    ) -> ProjectResult<Self> {
        let locator = primary.locator().clone();
        if let Some(configured) = &config.locator {
            if *configured != locator {
                return Err(ProjectError::Config(format!(
                    "configured locator {configured} does not match primary store {locator}"
                )));
            }
        }
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| locator.name().to_string());
        Ok(Self {
            name,
            locator,
            primary,
            registry: ViewRegistry::new(provider, config.connect_timeout()),
            listeners: ListenerHub::new(),
            state: KeyedStateStore::new(),
            metadata,
            lifecycle: RwLock::new(()),
            closed: AtomicBool::new(false),
            views_changed: AtomicBool::new(false),
        })
    }

    /// Build a project and restore whatever was last saved.
    pub fn open(
        config: ProjectConfig,
        primary: Arc<DataStore>,
        provider: Arc<dyn ConnectionProvider>,
        metadata: Arc<dyn MetadataStore>,
    ) -> ProjectResult<Self> {
        let project = Self::new(config, primary, provider, metadata)?;
        let report = project.restore()?;
        for failure in &report.failures {
            warn!(
                project = %project.name,
                view = %failure.locator,
                error = %failure.message,
                "saved view could not be restored"
            );
        }
        info!(
            project = %project.name,
            locator = %project.locator,
            views = report.attached.len(),
            "project opened"
        );
        Ok(project)
    }

    /// Open the local project named by `config.locator`.
    ///
    /// The project directory becomes the primary store, views are served by
    /// a [`LocalProvider`], and metadata lives in a JSON file next to the
    /// project directory.
    pub fn open_local(config: ProjectConfig) -> ProjectResult<Self> {
        let locator = config
            .locator
            .clone()
            .ok_or_else(|| ProjectError::Config("no project locator configured".into()))?;
        let metadata = Arc::new(FileMetadataStore::new(config.metadata_path(&locator)?));
        let provider = Arc::new(LocalProvider::new());
        let primary = provider.connect(&locator)?;
        Self::open(config, primary, provider, metadata)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn guard(&self) -> ProjectResult<RwLockReadGuard<'_, ()>> {
        let guard = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(ProjectError::ProjectClosed(self.name.clone()));
        }
        Ok(guard)
    }

    fn announce(&self, event: &ViewEvent) {
        match event {
            ViewEvent::Added(locator) => self.listeners.fire_added(locator),
            ViewEvent::Removed(locator) => self.listeners.fire_removed(locator),
        };
    }

    // ---- Stores and views ----

    /// The project's own store.
    pub fn project_data(&self) -> ProjectResult<Arc<DataStore>> {
        let _open = self.guard()?;
        Ok(Arc::clone(&self.primary))
    }

    /// The store for `locator`: the primary store for the project's own
    /// locator, otherwise any attached view, visible or hidden.
    pub fn project_data_for(&self, locator: &Locator) -> ProjectResult<Option<Arc<DataStore>>> {
        let _open = self.guard()?;
        if *locator == self.locator {
            return Ok(Some(Arc::clone(&self.primary)));
        }
        Ok(self.registry.get(locator))
    }

    /// Attach the store at `locator` as a view and return it.
    ///
    /// Visible views are announced to listeners. Re-adding an attached view
    /// returns the same store; a hidden view re-added as visible is
    /// promoted and announced then.
    pub fn add_view(&self, locator: &Locator, visible: bool) -> ProjectResult<Arc<DataStore>> {
        if *locator == self.locator {
            return self.project_data();
        }
        let lease = self.registry.lock_locator(locator);
        let outcome = {
            let _serial = lease.lock();
            let attached = self
                .guard()
                .and_then(|_open| self.attach_view(locator, visible));
            attached.map(|(store, event)| {
                if let Some(event) = event {
                    self.announce(&event);
                }
                store
            })
        };
        self.registry.release_lease(locator, lease);
        outcome
    }

    pub fn add_view_str(&self, locator: &str, visible: bool) -> ProjectResult<Arc<DataStore>> {
        let locator = Locator::parse(locator)?;
        self.add_view(&locator, visible)
    }

    /// Resolve `locator` and report the event to announce, if any. The
    /// caller holds the locator's lease and the lifecycle read guard.
    fn attach_view(
        &self,
        locator: &Locator,
        visible: bool,
    ) -> ProjectResult<(Arc<DataStore>, Option<ViewEvent>)> {
        if *locator == self.locator {
            return Ok((Arc::clone(&self.primary), None));
        }
        let resolved = self.registry.resolve(locator, visible)?;
        if !resolved.became_visible {
            return Ok((resolved.store, None));
        }
        self.views_changed.store(true, Ordering::Release);
        info!(project = %self.name, view = %locator, "view added");
        Ok((resolved.store, Some(ViewEvent::Added(locator.clone()))))
    }

    /// Detach and close the view at `locator`. Unknown locators are ignored.
    ///
    /// Objects still open in the view are force-evicted with a warning.
    pub fn remove_view(&self, locator: &Locator) -> ProjectResult<()> {
        let lease = self.registry.lock_locator(locator);
        let outcome = {
            let _serial = lease.lock();
            let detached = self.guard().map(|_open| self.detach_view(locator));
            match detached {
                Ok(Some((event, closed))) => {
                    if let Some(event) = event {
                        self.announce(&event);
                    }
                    closed.map_err(ProjectError::from)
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            }
        };
        self.registry.release_lease(locator, lease);
        outcome
    }

    /// Detach and close `locator`'s store. `None` if it was not attached;
    /// otherwise the event to announce and the store's close result.
    fn detach_view(
        &self,
        locator: &Locator,
    ) -> Option<(Option<ViewEvent>, StoreResult<()>)> {
        let entry = self.registry.remove(locator)?;
        let open = entry.store.open_files().len();
        if open > 0 {
            warn!(
                project = %self.name,
                view = %locator,
                open,
                "removing view with open objects; forcing eviction"
            );
        }
        let closed = entry.store.close();
        if !entry.visible {
            return Some((None, closed));
        }
        self.views_changed.store(true, Ordering::Release);
        info!(project = %self.name, view = %locator, "view removed");
        Some((Some(ViewEvent::Removed(locator.clone())), closed))
    }

    /// Visible views, in attach order.
    pub fn views(&self) -> ProjectResult<Vec<Locator>> {
        let _open = self.guard()?;
        Ok(self
            .registry
            .visible_entries()
            .into_iter()
            .map(|entry| entry.locator)
            .collect())
    }

    /// Stores of the visible views, in attach order.
    pub fn viewed_project_data(&self) -> ProjectResult<Vec<Arc<DataStore>>> {
        let _open = self.guard()?;
        Ok(self
            .registry
            .visible_entries()
            .into_iter()
            .map(|entry| entry.store)
            .collect())
    }

    fn all_stores(&self) -> Vec<Arc<DataStore>> {
        let mut stores = vec![Arc::clone(&self.primary)];
        stores.extend(self.registry.stores());
        stores
    }

    // ---- Open files ----

    /// Every file with at least one consumer, across the primary store and
    /// all attached views.
    pub fn open_data(&self) -> ProjectResult<Vec<OpenFile>> {
        let _open = self.guard()?;
        Ok(self
            .all_stores()
            .iter()
            .flat_map(|store| {
                store.open_files().into_iter().map(move |file| OpenFile {
                    store: store.locator().clone(),
                    file,
                })
            })
            .collect())
    }

    /// Drop every hold `consumer` has on any store in the project.
    ///
    /// Returns the number of objects evicted as a result.
    pub fn release_files(&self, consumer: &ConsumerId) -> ProjectResult<usize> {
        let _open = self.guard()?;
        let evicted: usize = self
            .all_stores()
            .iter()
            .map(|store| store.release_all(consumer))
            .sum();
        info!(project = %self.name, %consumer, evicted, "consumer released");
        Ok(evicted)
    }

    /// Files in the primary store.
    pub fn files(&self) -> ProjectResult<Vec<FileId>> {
        let _open = self.guard()?;
        Ok(self.primary.file_ids()?)
    }

    // ---- Listeners ----

    pub fn add_view_listener(
        &self,
        listener: Arc<dyn ViewListener>,
    ) -> ProjectResult<SubscriptionId> {
        let _open = self.guard()?;
        Ok(self.listeners.subscribe(listener))
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn remove_view_listener(&self, id: SubscriptionId) -> ProjectResult<bool> {
        let _open = self.guard()?;
        Ok(self.listeners.unsubscribe(id))
    }

    // ---- Keyed state ----

    pub fn set_saveable_data(&self, key: impl Into<String>, state: SaveState) -> ProjectResult<()> {
        let _open = self.guard()?;
        self.state.set_state(key, state);
        Ok(())
    }

    pub fn saveable_data(&self, key: &str) -> ProjectResult<Option<SaveState>> {
        let _open = self.guard()?;
        Ok(self.state.state(key))
    }

    pub fn save_tool_template(
        &self,
        tag: impl Into<String>,
        template: ToolTemplate,
    ) -> ProjectResult<()> {
        let _open = self.guard()?;
        self.state.save_template(tag, template);
        Ok(())
    }

    pub fn tool_template(&self, tag: &str) -> ProjectResult<Option<ToolTemplate>> {
        let _open = self.guard()?;
        Ok(self.state.template(tag))
    }

    // ---- Save / restore ----

    /// Whether the visible views or keyed state changed since the last
    /// save or restore.
    pub fn has_changed(&self) -> ProjectResult<bool> {
        let _open = self.guard()?;
        Ok(self.views_changed.load(Ordering::Acquire) || self.state.is_dirty())
    }

    /// Write the visible views and keyed state to the metadata store.
    ///
    /// Changes made while the write is in progress are not part of it and
    /// leave the project marked changed.
    pub fn save(&self) -> ProjectResult<()> {
        let _open = self.guard()?;
        let views_were_changed = self.views_changed.swap(false, Ordering::AcqRel);
        let (states, templates, state_was_dirty) = self.state.snapshot_for_save();
        let views: Vec<SavedView> = self
            .registry
            .visible_entries()
            .into_iter()
            .map(|entry| SavedView {
                locator: entry.locator,
                visible: entry.visible,
            })
            .collect();
        let metadata = ProjectMetadata {
            name: self.name.clone(),
            views,
            states,
            templates,
            saved_at: Utc::now(),
        };
        if let Err(e) = self.metadata.save(&metadata) {
            if views_were_changed {
                self.views_changed.store(true, Ordering::Release);
            }
            if state_was_dirty {
                self.state.mark_dirty();
            }
            warn!(project = %self.name, error = %e, "project save failed");
            return Err(e);
        }
        info!(project = %self.name, views = metadata.views.len(), "project saved");
        Ok(())
    }

    /// Bring views and keyed state back to what was last saved.
    ///
    /// Visible views missing from the saved list are detached; saved views
    /// that fail to attach are reported, not fatal. Listeners hear about
    /// the changes once the restore is complete.
    pub fn restore(&self) -> ProjectResult<RestoreReport> {
        let (report, events) = {
            let _open = self.guard()?;
            self.restore_views()?
        };
        for event in &events {
            self.announce(event);
        }
        info!(
            project = %self.name,
            attached = report.attached.len(),
            detached = report.detached.len(),
            failed = report.failures.len(),
            "project restored"
        );
        Ok(report)
    }

    fn restore_views(&self) -> ProjectResult<(RestoreReport, Vec<ViewEvent>)> {
        let Some(metadata) = self.metadata.load()? else {
            return Ok((RestoreReport::default(), Vec::new()));
        };
        let mut report = RestoreReport {
            found: true,
            ..Default::default()
        };
        let mut events = Vec::new();

        let saved: HashSet<&Locator> = metadata.views.iter().map(|v| &v.locator).collect();
        for entry in self.registry.visible_entries() {
            if saved.contains(&entry.locator) {
                continue;
            }
            let lease = self.registry.lock_locator(&entry.locator);
            let detached = {
                let _serial = lease.lock();
                self.detach_view(&entry.locator)
            };
            self.registry.release_lease(&entry.locator, lease);
            if let Some((event, closed)) = detached {
                if let Err(e) = closed {
                    warn!(view = %entry.locator, error = %e, "failed to close stale view");
                }
                events.extend(event);
                report.detached.push(entry.locator);
            }
        }

        for view in &metadata.views {
            let lease = self.registry.lock_locator(&view.locator);
            let attached = {
                let _serial = lease.lock();
                self.attach_view(&view.locator, view.visible)
            };
            self.registry.release_lease(&view.locator, lease);
            match attached {
                Ok((_, event)) => {
                    events.extend(event);
                    report.attached.push(view.locator.clone());
                }
                Err(e) => report.failures.push(RestoreFailure {
                    locator: view.locator.clone(),
                    message: e.to_string(),
                }),
            }
        }

        self.state.replace(metadata.states, metadata.templates);
        self.views_changed.store(false, Ordering::Release);
        Ok((report, events))
    }

    // ---- Close ----

    fn shutdown(&self) -> CloseReport {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return CloseReport {
                already_closed: true,
                ..Default::default()
            };
        }

        let mut report = CloseReport::default();
        for entry in self.registry.drain() {
            match entry.store.close() {
                Ok(()) => report.views_closed += 1,
                Err(e) => {
                    warn!(project = %self.name, view = %entry.locator, error = %e, "failed to close view");
                    report.failures.push(ViewCloseFailure {
                        locator: entry.locator,
                        message: e.to_string(),
                    });
                }
            }
        }
        if let Err(e) = self.primary.close() {
            warn!(project = %self.name, error = %e, "failed to close primary store");
            report.primary_error = Some(e.to_string());
        }
        info!(
            project = %self.name,
            views = report.views_closed,
            failures = report.failures.len(),
            "project closed"
        );
        report
    }
}

impl EnumerateFiles for Project {
    type Error = ProjectError;

    fn file_ids(&self) -> ProjectResult<Vec<FileId>> {
        self.files()
    }
}

impl Closeable for Project {
    type Output = CloseReport;

    /// Close every view and the primary store.
    ///
    /// Waits for in-flight operations to finish. Closing twice returns a
    /// report flagged `already_closed`.
    fn close(&self) -> CloseReport {
        self.shutdown()
    }

    fn is_closed(&self) -> bool {
        Project::is_closed(self)
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("locator", &self.locator.to_string())
            .field("closed", &self.is_closed())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Mutex, Weak};
    use std::thread;
    use std::time::{Duration, Instant};
    use tessera_store::{Gate, InMemoryBackend, StoreBackend};
    use tessera_views::{ChannelListener, StaticProvider, ViewEvent, ViewResult};

    fn loc(raw: &str) -> Locator {
        Locator::parse(raw).unwrap()
    }

    fn fid(raw: &str) -> FileId {
        FileId::parse(raw).unwrap()
    }

    const PRIMARY: &str = "tessera:/work/router";
    const V1: &str = "tessera://host/libc";
    const V2: &str = "tessera://host/busybox";

    struct Fixture {
        project: Project,
        provider: Arc<StaticProvider>,
        metadata: Arc<InMemoryMetadataStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryMetadataStore::new()))
    }

    fn fixture_with(metadata: Arc<InMemoryMetadataStore>) -> Fixture {
        let provider = Arc::new(StaticProvider::new());
        provider.register_files(loc(V1), [(fid("/libc.so"), "libc"), (fid("/ld.so"), "ld")]);
        provider.register_files(loc(V2), [(fid("/busybox"), "bb")]);
        let primary = Arc::new(DataStore::new(
            loc(PRIMARY),
            Arc::new(InMemoryBackend::with_files([
                (fid("/firmware.bin"), b"fw".to_vec()),
                (fid("/boot/loader"), b"ld".to_vec()),
            ])),
        ));
        let project = Project::open(
            ProjectConfig::default(),
            primary,
            provider.clone(),
            metadata.clone(),
        )
        .unwrap();
        Fixture {
            project,
            provider,
            metadata,
        }
    }

    fn listen(project: &Project) -> Receiver<ViewEvent> {
        let (listener, rx) = ChannelListener::new();
        project.add_view_listener(Arc::new(listener)).unwrap();
        rx
    }

    // ---- Basics ----

    #[test]
    fn name_and_primary_store() {
        let fx = fixture();
        assert_eq!(fx.project.name(), "router");
        assert_eq!(fx.project.locator(), &loc(PRIMARY));
        assert_eq!(
            fx.project.files().unwrap(),
            vec![fid("/boot/loader"), fid("/firmware.bin")]
        );
    }

    #[test]
    fn mismatched_config_locator_rejected() {
        let primary = Arc::new(DataStore::new(
            loc(PRIMARY),
            Arc::new(InMemoryBackend::new()),
        ));
        let err = Project::new(
            ProjectConfig::for_locator(loc("tessera:/work/other")),
            primary,
            Arc::new(StaticProvider::new()),
            Arc::new(InMemoryMetadataStore::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ProjectError::Config(_)));
    }

    #[test]
    fn own_locator_returns_primary_without_view() {
        let fx = fixture();
        let rx = listen(&fx.project);
        let store = fx.project.add_view(&loc(PRIMARY), true).unwrap();
        assert!(Arc::ptr_eq(&store, &fx.project.project_data().unwrap()));
        assert!(fx.project.views().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
        assert!(!fx.project.has_changed().unwrap());
    }

    // ---- Views ----

    #[test]
    fn add_view_is_identity_stable() {
        let fx = fixture();
        let a = fx.project.add_view(&loc(V1), true).unwrap();
        let b = fx.project.add_view_str("tessera://HOST:13100/libc", true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fx.provider.connect_count(), 1);
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);
    }

    #[test]
    fn add_view_errors() {
        let fx = fixture();
        assert!(matches!(
            fx.project.add_view_str("not a locator", true),
            Err(ProjectError::InvalidLocator(_))
        ));
        assert!(matches!(
            fx.project.add_view(&loc("tessera://host/unknown"), true),
            Err(ProjectError::ConnectFailed { .. })
        ));
        fx.provider.require_auth(loc("tessera://host/secret"));
        assert!(matches!(
            fx.project.add_view(&loc("tessera://host/secret"), true),
            Err(ProjectError::AuthRequired(_))
        ));
        assert!(fx.project.views().unwrap().is_empty());
    }

    #[test]
    fn hidden_views_are_silent_until_promoted() {
        let fx = fixture();
        let rx = listen(&fx.project);

        let hidden = fx.project.add_view(&loc(V1), false).unwrap();
        assert!(fx.project.views().unwrap().is_empty());
        assert!(fx.project.viewed_project_data().unwrap().is_empty());
        assert!(Arc::ptr_eq(
            &fx.project.project_data_for(&loc(V1)).unwrap().unwrap(),
            &hidden
        ));
        assert!(rx.try_recv().is_err());
        assert!(!fx.project.has_changed().unwrap());

        let promoted = fx.project.add_view(&loc(V1), true).unwrap();
        assert!(Arc::ptr_eq(&hidden, &promoted));
        assert_eq!(rx.try_recv().unwrap(), ViewEvent::Added(loc(V1)));
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);

        fx.project.add_view(&loc(V1), false).unwrap();
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removing_hidden_view_fires_nothing() {
        let fx = fixture();
        let rx = listen(&fx.project);
        let store = fx.project.add_view(&loc(V1), false).unwrap();
        fx.project.remove_view(&loc(V1)).unwrap();
        assert!(store.is_closed());
        assert!(rx.try_recv().is_err());
        assert!(fx.project.project_data_for(&loc(V1)).unwrap().is_none());
    }

    #[test]
    fn remove_unknown_view_is_a_no_op() {
        let fx = fixture();
        fx.project.remove_view(&loc(V2)).unwrap();
        assert!(!fx.project.has_changed().unwrap());
    }

    #[test]
    fn remove_view_force_evicts_open_objects() {
        let fx = fixture();
        let holder = ConsumerId::labeled("decompiler");
        let view = fx.project.add_view(&loc(V1), true).unwrap();
        let obj = view.open_object(&fid("/libc.so"), &holder).unwrap();

        fx.project.remove_view(&loc(V1)).unwrap();
        assert!(obj.is_disposed());
        assert!(view.is_closed());
        assert!(fx.project.open_data().unwrap().is_empty());
    }

    #[test]
    fn listener_failure_does_not_abort_add() {
        struct Grumpy;
        impl ViewListener for Grumpy {
            fn view_added(&self, _: &Locator) -> Result<(), tessera_views::ListenerError> {
                Err("no thanks".into())
            }
            fn view_removed(&self, _: &Locator) -> Result<(), tessera_views::ListenerError> {
                Ok(())
            }
        }

        let fx = fixture();
        fx.project.add_view_listener(Arc::new(Grumpy)).unwrap();
        let rx = listen(&fx.project);
        fx.project.add_view(&loc(V1), true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ViewEvent::Added(loc(V1)));
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);
    }

    #[test]
    fn removed_listener_gets_nothing() {
        let fx = fixture();
        let (listener, rx) = ChannelListener::new();
        let id = fx.project.add_view_listener(Arc::new(listener)).unwrap();
        assert!(fx.project.remove_view_listener(id).unwrap());
        fx.project.add_view(&loc(V1), true).unwrap();
        assert!(rx.try_recv().is_err());
    }

    // ---- Open data and release ----

    #[test]
    fn release_files_spans_primary_and_views() {
        let fx = fixture();
        let c = ConsumerId::labeled("analyzer");
        let other = ConsumerId::labeled("listing");

        let primary = fx.project.project_data().unwrap();
        let v1 = fx.project.add_view(&loc(V1), true).unwrap();
        let v2 = fx.project.add_view(&loc(V2), false).unwrap();

        primary.open_object(&fid("/firmware.bin"), &c).unwrap();
        v1.open_object(&fid("/libc.so"), &c).unwrap();
        v1.open_object(&fid("/ld.so"), &other).unwrap();
        v2.open_object(&fid("/busybox"), &c).unwrap();
        assert_eq!(fx.project.open_data().unwrap().len(), 4);

        assert_eq!(fx.project.release_files(&c).unwrap(), 3);
        assert_eq!(
            fx.project.open_data().unwrap(),
            vec![OpenFile {
                store: loc(V1),
                file: fid("/ld.so"),
            }]
        );
        assert_eq!(fx.project.release_files(&c).unwrap(), 0);
    }

    #[test]
    fn concrete_view_scenario() {
        let fx = fixture();
        let rx = listen(&fx.project);
        let a = ConsumerId::labeled("A");
        let b = ConsumerId::labeled("B");
        let f = fid("/libc.so");

        let v1 = fx.project.add_view(&loc(V1), true).unwrap();
        let first = v1.open_object(&f, &a).unwrap();
        let second = v1.open_object(&f, &b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let open = fx.project.open_data().unwrap();
        assert_eq!(open.iter().filter(|o| o.file == f).count(), 1);

        assert!(v1.release_object(&f, &a));
        assert!(fx.project.open_data().unwrap().iter().any(|o| o.file == f));

        assert!(v1.release_object(&f, &b));
        assert!(!fx.project.open_data().unwrap().iter().any(|o| o.file == f));
        assert!(first.is_disposed());

        fx.project.remove_view(&loc(V1)).unwrap();
        assert!(fx.project.views().unwrap().is_empty());

        let events: Vec<ViewEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![ViewEvent::Added(loc(V1)), ViewEvent::Removed(loc(V1))]
        );
    }

    // ---- Keyed state ----

    #[test]
    fn keyed_state_and_templates_mark_changed() {
        let fx = fixture();
        assert!(!fx.project.has_changed().unwrap());

        let mut state = SaveState::new();
        state.put("cursor", "0x8000").unwrap();
        fx.project.set_saveable_data("listing", state.clone()).unwrap();
        assert!(fx.project.has_changed().unwrap());
        assert_eq!(fx.project.saveable_data("listing").unwrap(), Some(state));

        fx.project.save().unwrap();
        assert!(!fx.project.has_changed().unwrap());

        fx.project
            .save_tool_template("default", ToolTemplate::new("CodeBrowser", b"t".to_vec()))
            .unwrap();
        assert!(fx.project.has_changed().unwrap());
        assert_eq!(
            fx.project.tool_template("default").unwrap().unwrap().name(),
            "CodeBrowser"
        );
    }

    // ---- Save / restore ----

    #[test]
    fn save_records_visible_views_only() {
        let fx = fixture();
        fx.project.add_view(&loc(V1), true).unwrap();
        fx.project.add_view(&loc(V2), false).unwrap();
        assert!(fx.project.has_changed().unwrap());

        fx.project.save().unwrap();
        let saved = fx.metadata.load().unwrap().unwrap();
        assert_eq!(
            saved.views,
            vec![SavedView {
                locator: loc(V1),
                visible: true,
            }]
        );
        assert_eq!(saved.name, "router");
        assert!(!fx.project.has_changed().unwrap());
    }

    #[test]
    fn restore_rolls_back_views_and_state() {
        let fx = fixture();
        fx.project.add_view(&loc(V1), true).unwrap();
        let mut state = SaveState::new();
        state.put("n", 1).unwrap();
        fx.project.set_saveable_data("k", state.clone()).unwrap();
        fx.project.save().unwrap();

        fx.project.remove_view(&loc(V1)).unwrap();
        fx.project.add_view(&loc(V2), true).unwrap();
        fx.project.set_saveable_data("k", SaveState::new()).unwrap();
        assert!(fx.project.has_changed().unwrap());

        let rx = listen(&fx.project);
        let report = fx.project.restore().unwrap();
        assert!(report.found);
        assert_eq!(report.attached, vec![loc(V1)]);
        assert_eq!(report.detached, vec![loc(V2)]);
        assert!(report.failures.is_empty());

        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);
        assert_eq!(fx.project.saveable_data("k").unwrap(), Some(state));
        assert!(!fx.project.has_changed().unwrap());
        let events: Vec<ViewEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![ViewEvent::Removed(loc(V2)), ViewEvent::Added(loc(V1))]
        );
    }

    #[test]
    fn open_restores_saved_views_and_reports_failures() {
        let mut meta = ProjectMetadata::new("router");
        meta.views = vec![
            SavedView {
                locator: loc(V1),
                visible: true,
            },
            SavedView {
                locator: loc("tessera://host/gone"),
                visible: true,
            },
        ];
        let fx = fixture_with(Arc::new(InMemoryMetadataStore::with_metadata(meta)));
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);

        let report = fx.project.restore().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].locator, loc("tessera://host/gone"));
    }

    #[test]
    fn restore_without_metadata_changes_nothing() {
        let fx = fixture();
        fx.project.add_view(&loc(V1), true).unwrap();
        let report = fx.project.restore().unwrap();
        assert!(!report.found);
        assert_eq!(fx.project.views().unwrap(), vec![loc(V1)]);
    }

    #[test]
    fn open_local_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().to_str().unwrap();
        std::fs::create_dir(dir.path().join("router")).unwrap();
        std::fs::write(dir.path().join("router/fw.bin"), b"fw").unwrap();
        std::fs::create_dir(dir.path().join("libc")).unwrap();
        std::fs::write(dir.path().join("libc/libc.so"), b"libc").unwrap();

        let primary = Locator::local(work, "router").unwrap();
        let view = Locator::local(work, "libc").unwrap();
        let config = ProjectConfig::for_locator(primary.clone());

        let project = Project::open_local(config.clone()).unwrap();
        assert_eq!(project.files().unwrap(), vec![fid("/fw.bin")]);
        project.add_view(&view, true).unwrap();
        project.save().unwrap();
        assert!(dir.path().join("router.tessera.json").exists());
        assert!(project.close().is_clean());

        let reopened = Project::open_local(config).unwrap();
        assert_eq!(reopened.views().unwrap(), vec![view]);
    }

    // ---- Close ----

    #[test]
    fn close_is_idempotent_and_final() {
        let fx = fixture();
        let (listener, _rx) = ChannelListener::new();
        let id = fx.project.add_view_listener(Arc::new(listener)).unwrap();
        let v1 = fx.project.add_view(&loc(V1), true).unwrap();
        let hidden = fx.project.add_view(&loc(V2), false).unwrap();
        let primary = fx.project.project_data().unwrap();

        let report = fx.project.close();
        assert!(!report.already_closed);
        assert_eq!(report.views_closed, 2);
        assert!(report.is_clean());
        assert!(v1.is_closed() && hidden.is_closed() && primary.is_closed());
        assert!(fx.project.is_closed());

        assert!(fx.project.close().already_closed);
        assert_eq!(fx.project.name(), "router");
        assert_eq!(fx.project.locator(), &loc(PRIMARY));

        let c = ConsumerId::new();
        assert!(matches!(fx.project.project_data(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.add_view(&loc(V1), true), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.remove_view(&loc(V1)), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.views(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.open_data(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.release_files(&c), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.save(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.restore(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.files(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(fx.project.has_changed(), Err(ProjectError::ProjectClosed(_))));
        assert!(matches!(
            fx.project.remove_view_listener(id),
            Err(ProjectError::ProjectClosed(_))
        ));
    }

    #[test]
    fn close_collects_view_failures() {
        struct FailingClose;
        impl StoreBackend for FailingClose {
            fn list_files(&self) -> tessera_store::StoreResult<Vec<tessera_store::FileEntry>> {
                Ok(Vec::new())
            }
            fn read_content(&self, file: &FileId) -> tessera_store::StoreResult<Vec<u8>> {
                Err(tessera_store::StoreError::NotFound(file.clone()))
            }
            fn close(&self) -> tessera_store::StoreResult<()> {
                Err(std::io::Error::other("disk gone").into())
            }
        }

        let fx = fixture();
        fx.provider
            .register_backend(loc("tessera://host/flaky"), Arc::new(FailingClose));
        fx.project.add_view(&loc("tessera://host/flaky"), true).unwrap();
        fx.project.add_view(&loc(V1), true).unwrap();

        let report = fx.project.close();
        assert_eq!(report.views_closed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].locator, loc("tessera://host/flaky"));
        assert!(fx.project.is_closed());
    }

    // ---- Concurrency ----

    #[test]
    fn concurrent_add_view_connects_once_and_fires_once() {
        let fx = Arc::new(fixture());
        let rx = listen(&fx.project);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fx = Arc::clone(&fx);
                thread::spawn(move || fx.project.add_view(&loc(V1), true).unwrap())
            })
            .collect();
        let stores: Vec<Arc<DataStore>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(stores.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(fx.provider.connect_count(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn close_is_not_wedged_by_hung_provider() {
        struct Hung;
        impl ConnectionProvider for Hung {
            fn connect(&self, _: &Locator) -> ViewResult<Arc<DataStore>> {
                thread::sleep(Duration::from_secs(5));
                Err(tessera_views::ViewError::Closed)
            }
        }

        let primary = Arc::new(DataStore::new(
            loc(PRIMARY),
            Arc::new(InMemoryBackend::new()),
        ));
        let config = ProjectConfig {
            connect_timeout_ms: 50,
            ..Default::default()
        };
        let project = Arc::new(
            Project::new(
                config,
                primary,
                Arc::new(Hung),
                Arc::new(InMemoryMetadataStore::new()),
            )
            .unwrap(),
        );

        let adder = {
            let project = Arc::clone(&project);
            thread::spawn(move || project.add_view(&loc(V1), true))
        };
        thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        let report = project.close();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!report.already_closed);
        assert!(adder.join().unwrap().is_err());
    }

    #[test]
    fn release_during_view_churn() {
        let fx = Arc::new(fixture());
        let c = ConsumerId::labeled("churn");
        let v1 = fx.project.add_view(&loc(V1), true).unwrap();
        v1.open_object(&fid("/libc.so"), &c).unwrap();

        let churn = {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                for _ in 0..20 {
                    fx.project.add_view(&loc(V2), true).unwrap();
                    fx.project.remove_view(&loc(V2)).unwrap();
                }
            })
        };
        fx.project.release_files(&c).unwrap();
        churn.join().unwrap();

        assert!(!v1.cache().is_open(&fid("/libc.so")));
        assert!(fx.project.views().unwrap() == vec![loc(V1)]);
        assert_eq!(fx.project.registry.lease_count(), 0);
    }

    #[test]
    fn reentrant_listener_does_not_wedge_close() {
        struct Reentrant {
            project: Mutex<Weak<Project>>,
            entered: Gate,
        }
        impl ViewListener for Reentrant {
            fn view_added(&self, _: &Locator) -> Result<(), tessera_views::ListenerError> {
                self.entered.open();
                thread::sleep(Duration::from_millis(150));
                let project = self.project.lock().unwrap().upgrade();
                if let Some(project) = project {
                    // Closed or not, the call must return.
                    let _ = project.views();
                }
                Ok(())
            }
            fn view_removed(&self, _: &Locator) -> Result<(), tessera_views::ListenerError> {
                Ok(())
            }
        }

        let fx = fixture();
        let project = Arc::new(fx.project);
        let listener = Arc::new(Reentrant {
            project: Mutex::new(Weak::new()),
            entered: Gate::new(),
        });
        *listener.project.lock().unwrap() = Arc::downgrade(&project);
        project.add_view_listener(listener.clone()).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let adder = {
            let project = Arc::clone(&project);
            let done = done_tx.clone();
            thread::spawn(move || {
                let added = project.add_view(&loc(V1), true).is_ok();
                done.send(("add", added)).unwrap();
            })
        };
        assert!(listener.entered.wait_timeout(Duration::from_secs(2)));
        let closer = {
            let project = Arc::clone(&project);
            thread::spawn(move || {
                let report = project.close();
                done_tx.send(("close", !report.already_closed)).unwrap();
            })
        };

        let mut finished = Vec::new();
        for _ in 0..2 {
            finished.push(done_rx.recv_timeout(Duration::from_secs(3)).unwrap());
        }
        finished.sort();
        assert_eq!(finished, vec![("add", true), ("close", true)]);
        adder.join().unwrap();
        closer.join().unwrap();
        assert!(project.is_closed());
    }

    /// Metadata store that parks inside `save` until released.
    struct GatedMetadata {
        entered: Gate,
        proceed: Gate,
        inner: InMemoryMetadataStore,
    }

    impl MetadataStore for GatedMetadata {
        fn save(&self, metadata: &ProjectMetadata) -> ProjectResult<()> {
            self.entered.open();
            self.proceed.wait();
            self.inner.save(metadata)
        }

        fn load(&self) -> ProjectResult<Option<ProjectMetadata>> {
            self.inner.load()
        }
    }

    #[test]
    fn change_during_save_stays_unsaved() {
        let metadata = Arc::new(GatedMetadata {
            entered: Gate::new(),
            proceed: Gate::new(),
            inner: InMemoryMetadataStore::new(),
        });
        let primary = Arc::new(DataStore::new(
            loc(PRIMARY),
            Arc::new(InMemoryBackend::new()),
        ));
        let project = Arc::new(
            Project::new(
                ProjectConfig::default(),
                primary,
                Arc::new(StaticProvider::new()),
                metadata.clone(),
            )
            .unwrap(),
        );
        project.set_saveable_data("before", SaveState::new()).unwrap();

        let saver = {
            let project = Arc::clone(&project);
            thread::spawn(move || project.save())
        };
        assert!(metadata.entered.wait_timeout(Duration::from_secs(2)));
        project.set_saveable_data("during", SaveState::new()).unwrap();
        metadata.proceed.open();
        saver.join().unwrap().unwrap();

        assert!(project.has_changed().unwrap());
        let saved = metadata.inner.load().unwrap().unwrap();
        assert!(saved.states.contains_key("before"));
        assert!(!saved.states.contains_key("during"));

        project.save().unwrap();
        assert!(!project.has_changed().unwrap());
    }

    #[test]
    fn failed_save_keeps_changes_pending() {
        #[derive(Default)]
        struct Flaky {
            failing: AtomicBool,
            inner: InMemoryMetadataStore,
        }
        impl MetadataStore for Flaky {
            fn save(&self, metadata: &ProjectMetadata) -> ProjectResult<()> {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(ProjectError::Persistence("read-only volume".into()));
                }
                self.inner.save(metadata)
            }
            fn load(&self) -> ProjectResult<Option<ProjectMetadata>> {
                self.inner.load()
            }
        }

        let provider = Arc::new(StaticProvider::new());
        provider.register_files(loc(V1), [(fid("/libc.so"), "libc")]);
        let primary = Arc::new(DataStore::new(
            loc(PRIMARY),
            Arc::new(InMemoryBackend::new()),
        ));
        let metadata = Arc::new(Flaky::default());
        let project = Project::new(
            ProjectConfig::default(),
            primary,
            provider,
            metadata.clone(),
        )
        .unwrap();

        metadata.failing.store(true, Ordering::SeqCst);
        project.set_saveable_data("k", SaveState::new()).unwrap();
        assert!(matches!(project.save(), Err(ProjectError::Persistence(_))));
        assert!(project.has_changed().unwrap());

        metadata.failing.store(false, Ordering::SeqCst);
        project.save().unwrap();
        assert!(!project.has_changed().unwrap());

        metadata.failing.store(true, Ordering::SeqCst);
        project.add_view(&loc(V1), true).unwrap();
        assert!(project.save().is_err());
        assert!(project.has_changed().unwrap());
        assert!(metadata.inner.load().unwrap().unwrap().views.is_empty());
    }
}
