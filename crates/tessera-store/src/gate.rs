use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// One-shot completion signal for work that other threads wait on.
///
/// The cache parks one of these in a slot while a load is in flight; the view
/// registry does the same for a connection attempt. Once opened a gate stays
/// open.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the gate opens.
    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .cond
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the gate opens or `timeout` elapses.
    ///
    /// Returns `true` if the gate is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            open = self
                .cond
                .wait_timeout(open, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
