use crate::{CfDataKey, Gvk};

/// Receives fire-and-forget notifications used to gate readiness on the cache being populated.
///
/// The cache's own correctness never depends on a tracker.
pub trait ReadinessTracker: Send + Sync + 'static {
    /// An object was written to the cache.
    fn observe(&self, _key: &CfDataKey) {}

    /// An object will not be written to the cache (e.g. it was excluded or deleted).
    fn cancel_expect(&self, _key: &CfDataKey) {}

    /// A kind's replay finished populating the cache.
    fn replay_complete(&self, gvk: &Gvk);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTracker;

impl ReadinessTracker for NoopTracker {
    fn replay_complete(&self, _gvk: &Gvk) {}
}
