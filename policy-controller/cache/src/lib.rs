//! Warden sync cache
//!
//! Policy engines evaluate requests against an in-memory copy of cluster objects. Which kinds are
//! copied is decided at runtime by policy sources: the `Config` resource's `syncOnly` list and any
//! number of `SyncSet` resources. This crate keeps that copy consistent with the union of what all
//! sources request:
//!
//! - [`GvkAggregator`] indexes `source -> kinds` and `kind -> sources`.
//! - [`CacheManager`] serializes source mutations behind a single decision lock, starts and stops
//!   watches through a `Registrar`, and runs a background reconcile loop that wipes kinds that are
//!   no longer wanted and replays (lists and repopulates) kinds that are newly wanted.
//! - Replays run as independent tasks that retry failed lists with [`Backoff`]. Each replay holds an
//!   epoch; its results are only applied while the epoch is current and the kind is still watched,
//!   so a replay that races with a source removal can never resurrect removed data.
//! - [`SyncController`] applies incremental watch events to the cache.
//!
//! ```text
//! [ Config/SyncSet ] -> upsert/remove -> [ Aggregator ] -> [ Manager ] -> add/remove watch -> [ Registrar ]
//!                                                              |                                  |
//!                                                        wipe / replay                      WatchEvents
//!                                                              v                                  v
//!                                                        [ DataStore ] <------------------ [ SyncController ]
//! ```

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregator;
mod manager;
mod metrics;
mod readiness;
mod replay;
mod store;
mod sync;


pub use self::{
    aggregator::GvkAggregator,
    manager::{CacheConfig, CacheManager},
    metrics::CacheMetrics,
    readiness::ReplayReadiness,
    replay::{Backoff, Delays},
    store::MemoryStore,
    sync::SyncController,
};
use warden_policy_controller_core::{CfDataKey, Gvk, SyncSource};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid sync source {0:?}")]
    InvalidSource(SyncSource),

    #[error("invalid kind {0:?}")]
    InvalidKind(Gvk),

    #[error("invalid {gvk} object: {error}")]
    InvalidObject { gvk: Gvk, error: anyhow::Error },

    #[error("failed to register a watch for {gvk}: {error}")]
    Registrar { gvk: Gvk, error: anyhow::Error },

    #[error("failed to store {key}: {error}")]
    Store { key: CfDataKey, error: anyhow::Error },

    #[error("the cache manager is already running")]
    AlreadyRunning,

    #[error("the cache manager was cancelled")]
    Cancelled,
}
