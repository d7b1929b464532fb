//! Kubernetes types used by the Warden policy controller.
//!
//! The policy sources that drive the sync cache are custom resources: a namespaced [`Config`]
//! whose `spec.sync.syncOnly` lists the kinds to cache and whose `spec.match` excludes
//! namespaces from controller processes, and cluster-scoped [`SyncSet`]s that each list more
//! kinds to cache.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod syncset;

pub use self::{
    config::{Config, ConfigSpec, MatchEntry, SyncConfig},
    syncset::{SyncSet, SyncSetSpec},
};
pub use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, ResourceExt},
    runtime::watcher,
    Client, Resource,
};
use serde::{Deserialize, Serialize};

/// A kind referenced by a policy source. The core API group is the empty group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct GvkEntry {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}
