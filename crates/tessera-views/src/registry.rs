//! Locator → store registry with identity-stable caching.
//!
//! [`ViewRegistry`] holds at most one [`ViewEntry`] per locator. Resolving a
//! locator that is already attached returns the same `Arc<DataStore>`; an
//! unseen locator is connected through the [`ConnectionProvider`] exactly
//! once, even when several threads ask for it at the same moment.
//!
//! Connection attempts run on a helper thread and are abandoned after the
//! configured timeout. A store that arrives after its caller gave up is
//! closed and discarded.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tessera_store::{Closeable, DataStore, Gate};
use tessera_types::Locator;
use tracing::{debug, info, warn};

use crate::error::{ViewError, ViewResult};
use crate::provider::ConnectionProvider;

/// An attached view.
#[derive(Clone, Debug)]
pub struct ViewEntry {
    pub locator: Locator,
    pub store: Arc<DataStore>,
    /// Hidden views are tracked for lifecycle only.
    pub visible: bool,
    seq: u64,
}

/// Outcome of [`ViewRegistry::resolve`].
#[derive(Clone, Debug)]
pub struct Resolved {
    pub store: Arc<DataStore>,
    /// A new store was connected by this call.
    pub attached: bool,
    /// The view is visible now and was not visible before this call.
    pub became_visible: bool,
}

enum ViewSlot {
    Connecting(Arc<Gate>),
    Attached(ViewEntry),
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<Locator, ViewSlot>,
    next_seq: u64,
    closed: bool,
}

/// Settles a `Connecting` slot on every exit path so waiters always wake.
struct PendingConnect<'a> {
    registry: &'a ViewRegistry,
    locator: &'a Locator,
    gate: Arc<Gate>,
}

impl PendingConnect<'_> {
    fn owns(&self, state: &RegistryState) -> bool {
        matches!(state.slots.get(self.locator), Some(ViewSlot::Connecting(g)) if Arc::ptr_eq(g, &self.gate))
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.registry.lock();
            if self.owns(&state) {
                state.slots.remove(self.locator);
            }
        }
        self.gate.open();
    }
}

/// Per-locator serialization handle.
///
/// Holding the guard from [`lock`](Self::lock) serializes attach, detach and
/// notification for one locator while leaving other locators free.
#[derive(Clone, Debug)]
pub struct LocatorLease(Arc<Mutex<()>>);

impl LocatorLease {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ViewRegistry {
    provider: Arc<dyn ConnectionProvider>,
    connect_timeout: Duration,
    state: Mutex<RegistryState>,
    leases: Mutex<HashMap<Locator, LocatorLease>>,
}

impl ViewRegistry {
    pub fn new(provider: Arc<dyn ConnectionProvider>, connect_timeout: Duration) -> Self {
        Self {
            provider,
            connect_timeout,
            state: Mutex::new(RegistryState::default()),
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease used to serialize work on one locator.
    ///
    /// Hand the lease back with [`release_lease`](Self::release_lease) once
    /// its guard is dropped so idle locators do not accumulate.
    pub fn lock_locator(&self, locator: &Locator) -> LocatorLease {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(locator.clone())
            .or_insert_with(|| LocatorLease(Arc::new(Mutex::new(()))))
            .clone()
    }

    /// Return a lease taken with [`lock_locator`](Self::lock_locator).
    ///
    /// The locator's entry is dropped when no other caller holds a clone.
    pub fn release_lease(&self, locator: &Locator, lease: LocatorLease) {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = matches!(leases.get(locator), Some(held) if Arc::ptr_eq(&held.0, &lease.0))
            && Arc::strong_count(&lease.0) == 2;
        if idle {
            leases.remove(locator);
        }
    }

    /// Number of locators with an outstanding lease.
    pub fn lease_count(&self) -> usize {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Return the store for `locator`, connecting it if it is not attached.
    ///
    /// Resolving an attached hidden view with `visible = true` promotes it;
    /// a visible view is never demoted.
    pub fn resolve(&self, locator: &Locator, visible: bool) -> ViewResult<Resolved> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let mut state = self.lock();
            if state.closed {
                return Err(ViewError::Closed);
            }
            let in_flight = match state.slots.get_mut(locator) {
                Some(ViewSlot::Attached(entry)) => {
                    let became_visible = visible && !entry.visible;
                    if became_visible {
                        entry.visible = true;
                        info!(view = %locator, "hidden view made visible");
                    }
                    return Ok(Resolved {
                        store: Arc::clone(&entry.store),
                        attached: false,
                        became_visible,
                    });
                }
                Some(ViewSlot::Connecting(gate)) => Some(Arc::clone(gate)),
                None => None,
            };

            match in_flight {
                Some(gate) => {
                    drop(state);
                    debug!(view = %locator, "waiting for in-flight connection");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if !gate.wait_timeout(remaining) {
                        return Err(ViewError::connect_failed(
                            locator,
                            "timed out waiting for in-flight connection",
                        ));
                    }
                }
                None => {
                    let gate = Arc::new(Gate::new());
                    state
                        .slots
                        .insert(locator.clone(), ViewSlot::Connecting(Arc::clone(&gate)));
                    drop(state);

                    let pending = PendingConnect {
                        registry: self,
                        locator,
                        gate,
                    };
                    let connected = self.connect_bounded(locator);
                    return self.complete_connect(pending, visible, connected);
                }
            }
        }
    }

    /// Run the provider on a helper thread, giving up after the timeout.
    fn connect_bounded(&self, locator: &Locator) -> ViewResult<Arc<DataStore>> {
        let (tx, rx) = mpsc::sync_channel::<ViewResult<Arc<DataStore>>>(1);
        let provider = Arc::clone(&self.provider);
        let target = locator.clone();
        thread::Builder::new()
            .name(format!("tessera-connect-{}", locator.name()))
            .spawn(move || {
                let result = provider.connect(&target);
                if let Err(mpsc::SendError(Ok(store))) = tx.send(result) {
                    warn!(view = %target, "connection completed after deadline; discarding");
                    if let Err(e) = store.close() {
                        warn!(view = %target, error = %e, "failed to close late connection");
                    }
                }
            })
            .map_err(|e| ViewError::connect_failed(locator, format!("spawn failed: {e}")))?;

        match rx.recv_timeout(self.connect_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ViewError::connect_failed(
                locator,
                format!("timed out after {:?}", self.connect_timeout),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(ViewError::connect_failed(
                locator,
                "connection attempt aborted",
            )),
        }
    }

    fn complete_connect(
        &self,
        pending: PendingConnect<'_>,
        visible: bool,
        connected: ViewResult<Arc<DataStore>>,
    ) -> ViewResult<Resolved> {
        let locator = pending.locator;
        let mut state = self.lock();
        let store = match connected {
            Ok(store) => store,
            Err(e) => {
                if pending.owns(&state) {
                    state.slots.remove(locator);
                }
                warn!(view = %locator, error = %e, "view connection failed");
                return Err(e);
            }
        };

        if state.closed || !pending.owns(&state) {
            drop(state);
            if let Err(e) = store.close() {
                warn!(view = %locator, error = %e, "failed to close orphaned store");
            }
            return Err(ViewError::Closed);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.slots.insert(
            locator.clone(),
            ViewSlot::Attached(ViewEntry {
                locator: locator.clone(),
                store: Arc::clone(&store),
                visible,
                seq,
            }),
        );
        info!(view = %locator, visible, "view attached");
        Ok(Resolved {
            store,
            attached: true,
            became_visible: visible,
        })
    }

    /// Detach `locator` and return its entry. The store is not closed.
    pub fn remove(&self, locator: &Locator) -> Option<ViewEntry> {
        let mut state = self.lock();
        match state.slots.get(locator) {
            Some(ViewSlot::Attached(_)) => match state.slots.remove(locator) {
                Some(ViewSlot::Attached(entry)) => Some(entry),
                _ => None,
            },
            _ => None,
        }
    }

    /// The attached store for `locator`, visible or hidden.
    pub fn get(&self, locator: &Locator) -> Option<Arc<DataStore>> {
        match self.lock().slots.get(locator) {
            Some(ViewSlot::Attached(entry)) => Some(Arc::clone(&entry.store)),
            _ => None,
        }
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.get(locator).is_some()
    }

    /// Every attached entry, in attach order.
    pub fn entries(&self) -> Vec<ViewEntry> {
        let state = self.lock();
        let mut entries: Vec<ViewEntry> = state
            .slots
            .values()
            .filter_map(|slot| match slot {
                ViewSlot::Attached(entry) => Some(entry.clone()),
                ViewSlot::Connecting(_) => None,
            })
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    /// Visible entries, in attach order.
    pub fn visible_entries(&self) -> Vec<ViewEntry> {
        self.entries().into_iter().filter(|e| e.visible).collect()
    }

    /// Snapshot of every attached store.
    pub fn stores(&self) -> Vec<Arc<DataStore>> {
        self.entries().into_iter().map(|e| e.store).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the registry and hand back every attached entry.
    ///
    /// Later resolves fail with [`ViewError::Closed`]. The stores are not
    /// closed here.
    pub fn drain(&self) -> Vec<ViewEntry> {
        let mut state = self.lock();
        state.closed = true;
        let attached: Vec<Locator> = state
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, ViewSlot::Attached(_)))
            .map(|(locator, _)| locator.clone())
            .collect();
        let mut entries: Vec<ViewEntry> = attached
            .into_iter()
            .filter_map(|locator| match state.slots.remove(&locator) {
                Some(ViewSlot::Attached(entry)) => Some(entry),
                _ => None,
            })
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        drop(state);
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lease| Arc::strong_count(&lease.0) > 1);
        entries
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl std::fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("views", &self.len())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
