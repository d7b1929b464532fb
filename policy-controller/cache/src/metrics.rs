use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use warden_policy_controller_core::Gvk;

#[derive(Clone, Debug, Default)]
pub struct CacheMetrics {
    watched_kinds: Gauge,
    objects: Gauge,
    replays: Family<ReplayLabels, Counter>,
    list_failures: Family<KindLabels, Counter>,
    wiped_objects: Counter,
    excluded_objects: Counter,
    reconcile_kicks_dropped: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    group: String,
    version: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReplayLabels {
    group: String,
    version: String,
    kind: String,
    outcome: ReplayOutcome,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum ReplayOutcome {
    Complete,
    Exhausted,
    Stale,
}

// === impl CacheMetrics ===

impl CacheMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let watched_kinds = Gauge::default();
        prom.register(
            "watched_kinds",
            "Number of kinds with an active watch",
            watched_kinds.clone(),
        );

        let objects = Gauge::default();
        prom.register(
            "objects",
            "Number of objects held in the cache",
            objects.clone(),
        );

        let replays = Family::default();
        prom.register(
            "replays",
            "Count of finished replays by outcome",
            replays.clone(),
        );

        let list_failures = Family::default();
        prom.register(
            "list_failures",
            "Count of failed replay lists",
            list_failures.clone(),
        );

        let wiped_objects = Counter::default();
        prom.register(
            "wiped_objects",
            "Count of objects removed because their kind is no longer synced",
            wiped_objects.clone(),
        );

        let excluded_objects = Counter::default();
        prom.register(
            "excluded_objects",
            "Count of objects skipped or pruned because their namespace is excluded",
            excluded_objects.clone(),
        );

        let reconcile_kicks_dropped = Counter::default();
        prom.register(
            "reconcile_kicks_dropped",
            "Count of reconcile requests coalesced into a pending request",
            reconcile_kicks_dropped.clone(),
        );

        Self {
            watched_kinds,
            objects,
            replays,
            list_failures,
            wiped_objects,
            excluded_objects,
            reconcile_kicks_dropped,
        }
    }

    pub(crate) fn set_sizes(&self, watched: usize, objects: usize) {
        self.watched_kinds.set(watched as i64);
        self.objects.set(objects as i64);
    }

    pub(crate) fn replay_finished(&self, gvk: &Gvk, outcome: ReplayOutcome) {
        self.replays
            .get_or_create(&ReplayLabels {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
                outcome,
            })
            .inc();
    }

    pub(crate) fn list_failed(&self, gvk: &Gvk) {
        self.list_failures
            .get_or_create(&KindLabels {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
            })
            .inc();
    }

    pub(crate) fn wiped(&self, n: usize) {
        self.wiped_objects.inc_by(n as u64);
    }

    pub(crate) fn excluded(&self, n: usize) {
        self.excluded_objects.inc_by(n as u64);
    }

    pub(crate) fn kick_dropped(&self) {
        self.reconcile_kicks_dropped.inc();
    }
}
