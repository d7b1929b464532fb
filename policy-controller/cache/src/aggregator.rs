//! A bidirectional index of the kinds each sync source requires.
//!
//! `by_source` is the source of truth; `by_gvk` is its derived reverse index. Upserting a source
//! replaces its full kind-set, and a kind that loses its last source is dropped from the index.

use crate::Error;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use warden_policy_controller_core::{Gvk, SyncSource};

#[derive(Debug, Default)]
pub struct GvkAggregator {
    index: RwLock<Index>,
}

#[derive(Debug, Default)]
struct Index {
    by_source: HashMap<SyncSource, HashSet<Gvk>>,
    by_gvk: HashMap<Gvk, HashSet<SyncSource>>,
}

// === impl GvkAggregator ===

impl GvkAggregator {
    /// Replaces the kinds required by `source`.
    ///
    /// An empty kind-set removes the source.
    pub fn upsert(
        &self,
        source: SyncSource,
        gvks: impl IntoIterator<Item = Gvk>,
    ) -> Result<(), Error> {
        if !source.is_valid() {
            return Err(Error::InvalidSource(source));
        }
        let gvks = gvks.into_iter().collect::<HashSet<_>>();
        if let Some(gvk) = gvks.iter().find(|gvk| !gvk.is_valid()) {
            return Err(Error::InvalidKind(gvk.clone()));
        }

        let mut index = self.index.write();
        if gvks.is_empty() {
            index.remove(&source);
        } else {
            index.upsert(source, gvks);
        }
        Ok(())
    }

    /// Removes all of `source`'s kinds. Returns false if the source was unknown.
    pub fn remove(&self, source: &SyncSource) -> bool {
        self.index.write().remove(source)
    }

    /// Returns a copy of the kinds currently required by `source`.
    pub fn list(&self, source: &SyncSource) -> HashSet<Gvk> {
        self.index
            .read()
            .by_source
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_present(&self, gvk: &Gvk) -> bool {
        self.index.read().by_gvk.contains_key(gvk)
    }

    /// Returns every kind required by at least one source.
    pub fn gvks(&self) -> Vec<Gvk> {
        self.index.read().by_gvk.keys().cloned().collect()
    }

    pub fn sources_for(&self, gvk: &Gvk) -> Vec<SyncSource> {
        self.index
            .read()
            .by_gvk
            .get(gvk)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().by_source.is_empty()
    }
}

// === impl Index ===

impl Index {
    fn upsert(&mut self, source: SyncSource, gvks: HashSet<Gvk>) {
        let previous = self.by_source.remove(&source).unwrap_or_default();
        let added = gvks.difference(&previous).cloned().collect::<Vec<_>>();
        let removed = previous.difference(&gvks).cloned().collect::<Vec<_>>();
        self.by_source.insert(source.clone(), gvks);

        for gvk in &removed {
            self.unlink(&source, gvk);
        }
        for gvk in added {
            self.by_gvk.entry(gvk).or_default().insert(source.clone());
        }
    }

    fn remove(&mut self, source: &SyncSource) -> bool {
        let Some(previous) = self.by_source.remove(source) else {
            return false;
        };
        for gvk in &previous {
            self.unlink(source, gvk);
        }
        true
    }

    fn unlink(&mut self, source: &SyncSource, gvk: &Gvk) {
        let Some(sources) = self.by_gvk.get_mut(gvk) else {
            return self.heal(source, gvk);
        };
        if !sources.remove(source) {
            return self.heal(source, gvk);
        }
        if sources.is_empty() {
            self.by_gvk.remove(gvk);
        }
    }

    /// The reverse index is missing a link that the forward index had.
    fn heal(&mut self, source: &SyncSource, gvk: &Gvk) {
        debug_assert!(false, "{gvk} is not linked to {source}");
        tracing::error!(%source, %gvk, "Kind index is inconsistent; rebuilding");
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut by_gvk = HashMap::<Gvk, HashSet<SyncSource>>::default();
        for (source, gvks) in &self.by_source {
            for gvk in gvks {
                by_gvk.entry(gvk.clone()).or_default().insert(source.clone());
            }
        }
        self.by_gvk = by_gvk;
    }
}
