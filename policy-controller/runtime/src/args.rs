use crate::{
    cache::{
        self, Backoff, CacheConfig, CacheManager, CacheMetrics, MemoryStore, ReplayReadiness,
        SyncController,
    },
    core::{Gvk, NamespacePattern, Process, ProcessExcluder},
    k8s::{self, Client, Resource},
    sync::{index_sync_sets, ConfigIndex, Discovery, KubeReader, KubeRegistrar},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{collections::BTreeSet, num::NonZeroU32, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "warden", about = "Caches the cluster objects policy engines evaluate against")]
pub struct Args {
    #[clap(
        long,
        default_value = "warden=info,warn",
        env = "WARDEN_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace holding the controller's `Config`.
    #[clap(long, default_value = "warden-system")]
    controller_namespace: String,

    #[clap(long, default_value = "config")]
    config_name: String,

    #[clap(long, default_value = "1000")]
    reconcile_interval_ms: u64,

    #[clap(long, default_value = "100")]
    replay_backoff_initial_ms: u64,

    #[clap(long, default_value = "30000")]
    replay_backoff_max_ms: u64,

    /// Limits list attempts per replay. Unset retries until the kind is no longer synced.
    #[clap(long)]
    replay_max_attempts: Option<NonZeroU32>,

    /// The number of watch events buffered ahead of the cache.
    #[clap(long, default_value = "1024")]
    event_queue_capacity: usize,

    /// A namespace (or `prefix-*`/`*-suffix` pattern) whose objects are never cached. May be
    /// repeated.
    #[clap(long = "sync-exempt-namespace")]
    sync_exempt_namespaces: Vec<NamespacePattern>,

    /// Disables watching `SyncSet` resources.
    #[clap(long)]
    sync_sets_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            controller_namespace,
            config_name,
            reconcile_interval_ms,
            replay_backoff_initial_ms,
            replay_backoff_max_ms,
            replay_max_attempts,
            event_queue_capacity,
            sync_exempt_namespaces,
            sync_sets_disabled,
        } = self;

        let config = CacheConfig {
            reconcile_interval: Duration::from_millis(reconcile_interval_ms),
            backoff: Backoff {
                initial: Duration::from_millis(replay_backoff_initial_ms),
                max: Duration::from_millis(replay_backoff_max_ms),
                factor: 2.0,
                max_attempts: replay_max_attempts,
            },
        };
        if config.backoff.initial > config.backoff.max {
            bail!("--replay-backoff-initial-ms must not exceed --replay-backoff-max-ms");
        }

        let mut prom = <Registry>::default();
        let cache_metrics = CacheMetrics::register(prom.sub_registry_with_prefix("cache"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Watches feed the sync controller through a bounded queue, so a slow cache applies
        // backpressure to the watches rather than dropping events.
        let (events_tx, events_rx) = mpsc::channel(event_queue_capacity.max(1));
        let discovery = Discovery::new(runtime.client());
        let readiness = ReplayReadiness::new();
        let cache = CacheManager::new(
            Arc::new(KubeReader::new(discovery.clone())),
            Arc::new(KubeRegistrar::new(discovery, events_tx)),
            Arc::new(MemoryStore::default()),
            Arc::new(readiness.clone()),
            config,
            cache_metrics,
        );

        let mut defaults = ProcessExcluder::default();
        defaults.add([Process::Sync], sync_exempt_namespaces);
        cache.exclude_processes(defaults.clone());

        // Spawn the cache's reconcile loop and stop it on shutdown, holding shutdown until
        // in-flight replays are cancelled.
        let cancel = CancellationToken::new();
        let reconcile = tokio::spawn(
            {
                let cache = cache.clone();
                let cancel = cancel.clone();
                async move { cache.run(cancel).await }
            }
            .instrument(info_span!("cache")),
        );
        let shutdown = runtime.shutdown_handle();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let release = shutdown.signaled().await;
                cancel.cancel();
                if let Err(error) = release.release_after(join_cache(reconcile)).await {
                    warn!(%error, "Cache reconcile task failed");
                }
            }
        });

        tokio::spawn(
            SyncController::new(cache.clone(), events_rx)
                .run(cancel.clone())
                .instrument(info_span!("sync")),
        );

        tokio::spawn(
            log_replays(readiness.subscribe(), cancel.clone()).instrument(info_span!("readiness")),
        );

        // Spawn policy source watches.

        let configs = runtime.watch_all::<k8s::Config>(k8s::watcher::Config::default());
        let config_index = ConfigIndex::new(
            cache.clone(),
            controller_namespace,
            config_name,
            defaults,
        )
        .shared();
        tokio::spawn(
            kubert::index::namespaced(config_index, configs).instrument(info_span!("configs")),
        );

        if sync_sets_disabled {
            info!("SyncSets disabled");
        } else if api_resource_exists::<k8s::SyncSet>(&runtime.client()).await {
            let sync_sets = runtime.watch_all::<k8s::SyncSet>(k8s::watcher::Config::default());
            tokio::spawn(
                index_sync_sets(cache.clone(), sync_sets).instrument(info_span!("syncsets")),
            );
        } else {
            warn!("syncsets.syncset.warden.io resource kind not found, skipping watches");
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Waits for the cache's reconcile loop to stop. Stopping on cancellation is expected; anything
/// else, including a panic, is an error.
async fn join_cache(task: JoinHandle<Result<(), cache::Error>>) -> Result<()> {
    match task.await? {
        Ok(()) | Err(cache::Error::Cancelled) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

async fn log_replays(mut replayed: watch::Receiver<BTreeSet<Gvk>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            res = replayed.changed() => {
                if res.is_err() {
                    return;
                }
            }
        }
        let kinds = replayed
            .borrow_and_update()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        info!(?kinds, "Replayed");
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
