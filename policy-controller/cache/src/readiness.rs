use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::watch;
use warden_policy_controller_core::{CfDataKey, Gvk, ReadinessTracker};

/// Publishes the set of kinds whose replay has completed.
#[derive(Clone, Debug)]
pub struct ReplayReadiness {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    replayed: watch::Sender<BTreeSet<Gvk>>,
    observed: AtomicU64,
    cancelled: AtomicU64,
}

// === impl ReplayReadiness ===

impl Default for ReplayReadiness {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayReadiness {
    pub fn new() -> Self {
        let (replayed, _) = watch::channel(BTreeSet::new());
        Self {
            inner: Arc::new(Inner {
                replayed,
                observed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<Gvk>> {
        self.inner.replayed.subscribe()
    }

    pub fn is_replayed(&self, gvk: &Gvk) -> bool {
        self.inner.replayed.borrow().contains(gvk)
    }

    /// Returns the number of objects written and the number of objects skipped or removed.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.inner.observed.load(Ordering::Relaxed),
            self.inner.cancelled.load(Ordering::Relaxed),
        )
    }
}

impl ReadinessTracker for ReplayReadiness {
    fn observe(&self, _key: &CfDataKey) {
        self.inner.observed.fetch_add(1, Ordering::Relaxed);
    }

    fn cancel_expect(&self, _key: &CfDataKey) {
        self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn replay_complete(&self, gvk: &Gvk) {
        self.inner
            .replayed
            .send_if_modified(|replayed| replayed.insert(gvk.clone()));
    }
}
