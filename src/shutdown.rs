//! Process-wide shutdown signal
//!
//! Hooks run on plain OS threads and need a blocking, cancellable sleep for
//! the delay grace period; the audit timer is a tokio task and wants a
//! `watch` receiver. `ShutdownSignal` serves both from one trigger.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    cond: Condvar,
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            triggered: Mutex::new(false),
            cond: Condvar::new(),
            tx,
        }
    }

    /// Wake every sleeper and notify async subscribers
    pub fn trigger(&self) {
        *self.triggered.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for async tasks
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Block the current thread for `duration` or until triggered.
    ///
    /// Returns `true` if the sleep was cut short by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.triggered.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = self
            .cond
            .wait_timeout_while(guard, duration, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
