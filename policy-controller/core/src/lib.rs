//! Core types shared by the Warden sync cache.
//!
//! The cache keeps an in-memory copy of cluster objects whose kinds are requested by one or more
//! policy sources (a `Config` resource, a `SyncSet`, ...). This crate holds the vocabulary used
//! between the cache and its collaborators:
//!
//! - [`Gvk`] identifies a resource kind and [`SyncSource`] identifies *why* a kind is synced.
//! - [`CfDataKey`] identifies a single cached object.
//! - [`Reader`], [`Registrar`], [`DataStore`] and [`ReadinessTracker`] are the capabilities the
//!   cache consumes. Kubernetes-backed implementations live in the `k8s-sync` crate; the cache
//!   crate provides the in-memory store.
//! - [`ProcessExcluder`] decides which namespaces are excluded from a given process.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod excluder;
mod gvk;
mod key;
mod readiness;
mod store;
mod watch;

pub use self::{
    excluder::{InvalidPattern, NamespacePattern, Process, ProcessExcluder},
    gvk::{Gvk, InvalidGvk},
    key::{CfDataKey, SyncSource},
    readiness::{NoopTracker, ReadinessTracker},
    store::DataStore,
    watch::{Reader, Registrar, WatchEvent},
};
pub use kube::core::DynamicObject;
