//! Kubernetes-backed collaborators of the sync cache.
//!
//! - [`KubeRegistrar`] runs one watch per cached kind and forwards its events to the sync
//!   controller.
//! - [`KubeReader`] lists kinds for cache replays.
//! - [`ConfigIndex`] and [`index_sync_sets`] turn `Config` and `SyncSet` resources into cache
//!   source updates.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod discovery;
mod reader;
mod registrar;
mod sources;

pub use self::{
    discovery::Discovery,
    reader::KubeReader,
    registrar::KubeRegistrar,
    sources::{index_sync_sets, parse_excluder, parse_gvks, ConfigIndex},
};
