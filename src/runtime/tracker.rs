//! Live resource accounting for blocking clean-up
//!
//! Every engine task and callback dispatcher holds a [`ResourceLease`] for as
//! long as it runs. `clean_up()` waits for the count to reach zero before it
//! tears the event loop down.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::debug;

/// Counter of live resources with a drain barrier
#[derive(Debug, Default)]
pub struct ResourceTracker {
    live: Mutex<usize>,
    drained: Condvar,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register one live resource until the returned lease is dropped
    pub fn acquire(self: &Arc<Self>, kind: &'static str) -> ResourceLease {
        let mut live = self.lock();
        *live += 1;
        debug!(kind, live = *live, "resource lease acquired");
        ResourceLease {
            tracker: Arc::clone(self),
            kind,
        }
    }

    /// Number of resources currently holding a lease
    pub fn live(&self) -> usize {
        *self.lock()
    }

    /// Block until every lease has been dropped
    ///
    /// Never returns while a lease is leaked or held by a resource that is
    /// still reachable.
    pub fn wait_for_drain(&self) {
        let mut live = self.lock();
        while *live > 0 {
            debug!(live = *live, "waiting for resources to drain");
            live = self
                .drained
                .wait(live)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn release(&self, kind: &'static str) {
        let mut live = self.lock();
        *live = live.saturating_sub(1);
        debug!(kind, live = *live, "resource lease released");
        if *live == 0 {
            self.drained.notify_all();
        }
    }
}

/// RAII registration of one live resource
#[derive(Debug)]
pub struct ResourceLease {
    tracker: Arc<ResourceTracker>,
    kind: &'static str,
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.tracker.release(self.kind);
    }
}
