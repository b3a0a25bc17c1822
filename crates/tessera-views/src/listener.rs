//! View-change notification.
//!
//! [`ListenerHub`] delivers [`ViewEvent`]s synchronously, in subscription
//! order, to a snapshot of the subscribers taken when the event fires. A
//! listener that fails or panics is recorded in the [`DeliveryReport`] and
//! delivery moves on to the next one.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tessera_types::Locator;
use tracing::{debug, warn};

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of view attach/detach.
pub trait ViewListener: Send + Sync {
    fn view_added(&self, locator: &Locator) -> Result<(), ListenerError>;

    fn view_removed(&self, locator: &Locator) -> Result<(), ListenerError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewEvent {
    Added(Locator),
    Removed(Locator),
}

impl ViewEvent {
    pub fn locator(&self) -> &Locator {
        match self {
            Self::Added(locator) | Self::Removed(locator) => locator,
        }
    }
}

impl fmt::Display for ViewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added(locator) => write!(f, "added {locator}"),
            Self::Removed(locator) => write!(f, "removed {locator}"),
        }
    }
}

/// Handle returned by [`ListenerHub::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A listener that returned an error or panicked.
#[derive(Clone, Debug)]
pub struct ListenerFailure {
    pub subscription: SubscriptionId,
    pub event: ViewEvent,
    pub message: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listener {} failed on {}: {}",
            self.subscription, self.event, self.message
        )
    }
}

/// Outcome of one fire.
#[derive(Clone, Debug, Default)]
pub struct DeliveryReport {
    /// Listeners that handled the event successfully.
    pub delivered: usize,
    pub failures: Vec<ListenerFailure>,
}

impl DeliveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Subscriber {
    id: SubscriptionId,
    listener: Arc<dyn ViewListener>,
}

/// Ordered fan-out of view events.
#[derive(Default)]
pub struct ListenerHub {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

fn same_listener(a: &Arc<dyn ViewListener>, b: &Arc<dyn ViewListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl ListenerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` to the end of the delivery order.
    ///
    /// Subscribing the same `Arc` again returns its existing id.
    pub fn subscribe(&self, listener: Arc<dyn ViewListener>) -> SubscriptionId {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = subs.iter().find(|s| same_listener(&s.listener, &listener)) {
            return existing.id;
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        subs.push(Subscriber { id, listener });
        debug!(subscription = %id, "view listener subscribed");
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fire_added(&self, locator: &Locator) -> DeliveryReport {
        self.fire(ViewEvent::Added(locator.clone()))
    }

    pub fn fire_removed(&self, locator: &Locator) -> DeliveryReport {
        self.fire(ViewEvent::Removed(locator.clone()))
    }

    fn fire(&self, event: ViewEvent) -> DeliveryReport {
        let snapshot: Vec<(SubscriptionId, Arc<dyn ViewListener>)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| (s.id, Arc::clone(&s.listener)))
            .collect();

        let mut report = DeliveryReport::default();
        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &event {
                ViewEvent::Added(locator) => listener.view_added(locator),
                ViewEvent::Removed(locator) => listener.view_removed(locator),
            }));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            let failure = ListenerFailure {
                subscription: id,
                event: event.clone(),
                message,
            };
            warn!(%failure, "view listener failed");
            report.failures.push(failure);
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

impl fmt::Debug for ListenerHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHub")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Listener that forwards every event into a channel.
pub struct ChannelListener {
    sender: Mutex<Sender<ViewEvent>>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<ViewEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(tx),
            },
            rx,
        )
    }

    fn send(&self, event: ViewEvent) -> Result<(), ListenerError> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event)
            .map_err(|_| "event receiver dropped".into())
    }
}

impl ViewListener for ChannelListener {
    fn view_added(&self, locator: &Locator) -> Result<(), ListenerError> {
        self.send(ViewEvent::Added(locator.clone()))
    }

    fn view_removed(&self, locator: &Locator) -> Result<(), ListenerError> {
        self.send(ViewEvent::Removed(locator.clone()))
    }
}
