//! Registration Sync
//!
//! Keeps a derived snapshot of every registration up to date for UI layers.
//! The consumer subscribes to lifecycle events before its initial read so
//! nothing published in between is lost, and coalesces a burst of events
//! published within one scheduler tick into a single recomputation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use log::debug;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::events::{Subscription, WILDCARD};
use crate::plugin::manager::{PluginManager, PluginRegistration};

/// Debounced observer of the manager's registrations
pub struct RegistrationSync {
    manager: Weak<PluginManager>,
    snapshot: Mutex<Arc<Vec<PluginRegistration>>>,
    scheduled: AtomicBool,
    recomputations: AtomicUsize,
    version: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
}

impl RegistrationSync {
    /// Subscribe to the manager, then take the initial snapshot
    pub fn attach(manager: &Arc<PluginManager>) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        let sync = Arc::new(Self {
            manager: Arc::downgrade(manager),
            snapshot: Mutex::new(Arc::new(Vec::new())),
            scheduled: AtomicBool::new(false),
            recomputations: AtomicUsize::new(0),
            version,
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&sync);
        let subscription = manager.subscribe(WILDCARD, move |_| {
            if let Some(sync) = weak.upgrade() {
                sync.schedule();
            }
            Ok(())
        });
        *sync.subscription.lock() = Some(subscription);

        sync.flush();
        sync
    }

    /// Queue a recomputation for the next tick; repeated calls before it
    /// runs are merged. Without a runtime the snapshot is recomputed inline.
    fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let sync = Arc::clone(self);
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    sync.flush();
                });
            }
            Err(_) => self.flush(),
        }
    }

    /// Recompute the snapshot now
    pub fn flush(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        let registrations = manager.get_all_registrations();
        self.recomputations.fetch_add(1, Ordering::SeqCst);

        let mut snapshot = self.snapshot.lock();
        if **snapshot != registrations {
            *snapshot = Arc::new(registrations);
            self.version.send_modify(|version| *version += 1);
            debug!("Registration snapshot updated ({} plugins)", snapshot.len());
        }
    }

    /// Current snapshot; the same `Arc` until registrations change
    pub fn snapshot(&self) -> Arc<Vec<PluginRegistration>> {
        self.snapshot.lock().clone()
    }

    /// Number of times the snapshot was recomputed
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::SeqCst)
    }

    /// Incremented whenever the snapshot changes
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver notified on every snapshot change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Stop observing the manager
    pub fn detach(&self) -> bool {
        self.subscription
            .lock()
            .take()
            .is_some_and(Subscription::unsubscribe)
    }
}

impl Drop for RegistrationSync {
    fn drop(&mut self) {
        self.detach();
    }
}
