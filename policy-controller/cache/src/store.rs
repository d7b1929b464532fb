use ahash::AHashMap as HashMap;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use warden_policy_controller_core::{CfDataKey, DataStore, DynamicObject, Gvk};

/// Holds cached objects in memory, grouped by kind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    by_gvk: RwLock<HashMap<Gvk, HashMap<CfDataKey, DynamicObject>>>,
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn get(&self, key: &CfDataKey) -> Option<DynamicObject> {
        self.by_gvk.read().get(&key.gvk)?.get(key).cloned()
    }

    /// Returns the objects of the given kind, optionally restricted to a namespace.
    pub fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Vec<DynamicObject> {
        let by_gvk = self.by_gvk.read();
        let Some(objects) = by_gvk.get(gvk) else {
            return Vec::new();
        };
        objects
            .iter()
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Returns the kinds that currently have at least one stored object.
    pub fn gvks(&self) -> Vec<Gvk> {
        self.by_gvk.read().keys().cloned().collect()
    }
}

impl DataStore for MemoryStore {
    fn add(&self, key: CfDataKey, object: DynamicObject) -> Result<()> {
        if key.name.is_empty() {
            bail!("{} object has no name", key.gvk);
        }
        self.by_gvk
            .write()
            .entry(key.gvk.clone())
            .or_default()
            .insert(key, object);
        Ok(())
    }

    fn remove(&self, key: &CfDataKey) -> bool {
        let mut by_gvk = self.by_gvk.write();
        let Some(objects) = by_gvk.get_mut(&key.gvk) else {
            return false;
        };
        let removed = objects.remove(key).is_some();
        if objects.is_empty() {
            by_gvk.remove(&key.gvk);
        }
        removed
    }

    fn remove_all_of_gvk(&self, gvk: &Gvk) -> usize {
        self.by_gvk
            .write()
            .remove(gvk)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }

    fn contains(&self, key: &CfDataKey) -> bool {
        self.by_gvk
            .read()
            .get(&key.gvk)
            .is_some_and(|objects| objects.contains_key(key))
    }

    fn keys_of_gvk(&self, gvk: &Gvk) -> Vec<CfDataKey> {
        self.by_gvk
            .read()
            .get(gvk)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.by_gvk.read().values().map(|objects| objects.len()).sum()
    }
}
