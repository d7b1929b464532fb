use ahash::AHashSet as HashSet;
use futures::prelude::*;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_policy_controller_cache::CacheManager;
use warden_policy_controller_core::{Gvk, NamespacePattern, Process, ProcessExcluder, SyncSource};
use warden_policy_controller_k8s_api::{
    watcher, Config, GvkEntry, MatchEntry, ResourceExt, SyncSet,
};

/// Applies the controller's `Config` resource to the cache.
///
/// Only the resource named `name` in `namespace` is honored; any other `Config` is ignored.
pub struct ConfigIndex {
    cache: CacheManager,
    namespace: String,
    name: String,

    /// Exclusions that apply whether or not a `Config` exists.
    defaults: ProcessExcluder,
}

// === impl ConfigIndex ===

impl ConfigIndex {
    pub fn new(
        cache: CacheManager,
        namespace: String,
        name: String,
        defaults: ProcessExcluder,
    ) -> Self {
        Self {
            cache,
            namespace,
            name,
            defaults,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn source(&self) -> SyncSource {
        SyncSource::config(&self.namespace, &self.name)
    }

    fn is_configured(&self, namespace: &str, name: &str) -> bool {
        namespace == self.namespace && name == self.name
    }
}

impl kubert::index::IndexNamespacedResource<Config> for ConfigIndex {
    fn apply(&mut self, config: Config) {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_unchecked();
        if !self.is_configured(&namespace, &name) {
            debug!(%namespace, %name, "Ignoring unconfigured Config");
            return;
        }

        let gvks = parse_gvks(&config.spec.sync.sync_only);
        info!(kinds = gvks.len(), "Applying Config");
        if let Err(error) = self.cache.upsert_source(self.source(), gvks) {
            warn!(%error, "Failed to sync Config kinds");
        }

        let mut excluder = self.defaults.clone();
        excluder.merge(&parse_excluder(&config.spec.match_));
        self.cache.exclude_processes(excluder);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if !self.is_configured(&namespace, &name) {
            return;
        }
        info!(%namespace, %name, "Config deleted");
        if let Err(error) = self.cache.remove_source(&self.source()) {
            warn!(%error, "Failed to remove Config kinds");
        }
        self.cache.exclude_processes(self.defaults.clone());
    }
}

/// Applies `SyncSet` events to the cache until the stream ends.
///
/// When the watch restarts, sets that disappeared while it was disconnected are removed.
pub async fn index_sync_sets(
    cache: CacheManager,
    events: impl Stream<Item = watcher::Event<SyncSet>>,
) {
    tokio::pin!(events);

    // Sets currently applied to the cache, and the sets seen during a restart.
    let mut known = HashSet::<String>::default();
    let mut restarting = None::<HashSet<String>>;

    while let Some(event) = events.next().await {
        match event {
            watcher::Event::Init => {
                restarting = Some(HashSet::default());
            }
            watcher::Event::InitApply(set) | watcher::Event::Apply(set) => {
                let name = set.name_unchecked();
                let gvks = parse_gvks(&set.spec.gvks);
                debug!(%name, kinds = gvks.len(), "Applying SyncSet");
                if let Err(error) = cache.upsert_source(SyncSource::sync_set(&name), gvks) {
                    warn!(%name, %error, "Failed to sync SyncSet kinds");
                }
                if let Some(seen) = restarting.as_mut() {
                    seen.insert(name.clone());
                }
                known.insert(name);
            }
            watcher::Event::Delete(set) => {
                let name = set.name_unchecked();
                debug!(%name, "Removing SyncSet");
                remove_sync_set(&cache, &name);
                known.remove(&name);
            }
            watcher::Event::InitDone => {
                let seen = restarting.take().unwrap_or_default();
                for name in known.difference(&seen) {
                    info!(%name, "SyncSet removed while disconnected");
                    remove_sync_set(&cache, name);
                }
                known = seen;
            }
        }
    }
}

fn remove_sync_set(cache: &CacheManager, name: &str) {
    if let Err(error) = cache.remove_source(&SyncSource::sync_set(name)) {
        warn!(%name, %error, "Failed to remove SyncSet kinds");
    }
}

/// Converts policy kind entries, skipping malformed ones.
pub fn parse_gvks(entries: &[GvkEntry]) -> Vec<Gvk> {
    entries
        .iter()
        .filter_map(|entry| {
            let gvk = Gvk::new(&entry.group, &entry.version, &entry.kind);
            if gvk.is_valid() {
                Some(gvk)
            } else {
                warn!(group = %entry.group, version = %entry.version, kind = %entry.kind, "Skipping invalid kind");
                None
            }
        })
        .collect()
}

/// Builds an excluder from `Config` match entries, skipping invalid processes and patterns.
pub fn parse_excluder(entries: &[MatchEntry]) -> ProcessExcluder {
    let mut excluder = ProcessExcluder::default();
    for entry in entries {
        let processes = entry
            .processes
            .iter()
            .filter_map(|p| match p.parse::<Process>() {
                Ok(process) => Some(process),
                Err(error) => {
                    warn!(%error, "Skipping process");
                    None
                }
            })
            .collect::<Vec<_>>();
        let patterns = entry
            .excluded_namespaces
            .iter()
            .filter_map(|ns| match ns.parse::<NamespacePattern>() {
                Ok(pattern) => Some(pattern),
                Err(error) => {
                    warn!(%error, "Skipping namespace pattern");
                    None
                }
            })
            .collect::<Vec<_>>();
        excluder.add(processes, patterns);
    }
    excluder
}
