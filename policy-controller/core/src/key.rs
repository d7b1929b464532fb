use crate::Gvk;
use anyhow::{anyhow, Result};
use kube::core::DynamicObject;
use std::fmt;

/// Identifies a policy source that requests a set of kinds to be synced, e.g. one `Config`
/// resource or one `SyncSet`.
///
/// Sources are only ever compared; the cache never interprets them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncSource {
    pub source: String,
    pub id: String,
}

/// Identifies a single cached object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfDataKey {
    pub gvk: Gvk,
    pub namespace: Option<String>,
    pub name: String,
}

// === impl SyncSource ===

impl SyncSource {
    pub const CONFIG: &'static str = "config";
    pub const SYNC_SET: &'static str = "syncset";

    pub fn new(source: impl ToString, id: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            id: id.to_string(),
        }
    }

    pub fn config(namespace: &str, name: &str) -> Self {
        Self::new(Self::CONFIG, format!("{namespace}/{name}"))
    }

    pub fn sync_set(name: &str) -> Self {
        Self::new(Self::SYNC_SET, name)
    }

    pub fn is_valid(&self) -> bool {
        !self.source.is_empty() && !self.id.is_empty()
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

// === impl CfDataKey ===

impl CfDataKey {
    pub fn new(gvk: Gvk, namespace: Option<String>, name: impl ToString) -> Self {
        Self {
            gvk,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.to_string(),
        }
    }

    /// Builds the key for an object of the given kind.
    ///
    /// List responses do not carry per-item type metadata, so the kind must be supplied by the
    /// caller rather than read from the object.
    pub fn for_object(gvk: &Gvk, obj: &DynamicObject) -> Result<Self> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!("{gvk} object has no name"))?;
        Ok(Self::new(gvk.clone(), obj.metadata.namespace.clone(), name))
    }

    pub fn namespaced_name(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for CfDataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.gvk, self.namespaced_name())
    }
}
