//! Interruptible waits for the replication run loop
//!
//! The run loop registers a [`WaitHandle`] whenever it suspends (sleeping
//! before a retry, connecting, reading from the master). Anyone holding the
//! shared [`Interrupter`] can wake that wait early. The interrupter only keeps
//! a weak reference, so it never extends the lifetime of the wait itself.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::debug;

/// Signalling side of the run loop's current suspension point
#[derive(Debug, Default)]
pub struct Interrupter {
    active: Mutex<Option<Weak<Notify>>>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new wait; replaces any stale registration
    pub fn register(&self) -> WaitHandle<'_> {
        let notify = Arc::new(Notify::new());
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|w| w.strong_count() > 0) {
            debug!("Replacing a still-registered wait handle");
        }
        *active = Some(Arc::downgrade(&notify));

        WaitHandle {
            owner: self,
            notify,
        }
    }

    /// Wake the registered wait, if any. Returns true when a wait was signalled.
    pub fn pulse(&self) -> bool {
        let active = self.active.lock();
        match active.as_ref().and_then(Weak::upgrade) {
            Some(notify) => {
                // notify_one keeps a permit if the waiter has not polled yet
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}

/// Owning side of a registered wait; deregisters on drop
#[derive(Debug)]
pub struct WaitHandle<'a> {
    owner: &'a Interrupter,
    notify: Arc<Notify>,
}

impl WaitHandle<'_> {
    /// Resolves once the interrupter pulses this handle
    pub async fn interrupted(&self) {
        self.notify.notified().await;
    }
}

impl Drop for WaitHandle<'_> {
    fn drop(&mut self) {
        let mut active = self.owner.active.lock();
        let ours = active
            .as_ref()
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.notify)));
        if ours {
            *active = None;
        }
    }
}
