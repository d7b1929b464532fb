use crate::{CfDataKey, Gvk};
use anyhow::Result;
use kube::core::DynamicObject;

/// Holds the materialized objects consumed by policy engines.
///
/// Implementations provide their own synchronization. Every method is expected to be cheap: the
/// cache calls them while holding its decision lock.
pub trait DataStore: Send + Sync + 'static {
    /// Inserts or replaces the object stored at `key`.
    fn add(&self, key: CfDataKey, object: DynamicObject) -> Result<()>;

    /// Removes the object stored at `key`, returning true if it was present.
    fn remove(&self, key: &CfDataKey) -> bool;

    /// Removes every object of the given kind, returning the number removed.
    fn remove_all_of_gvk(&self, gvk: &Gvk) -> usize;

    fn contains(&self, key: &CfDataKey) -> bool;

    /// Lists the keys of all stored objects of the given kind.
    fn keys_of_gvk(&self, gvk: &Gvk) -> Vec<CfDataKey>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
