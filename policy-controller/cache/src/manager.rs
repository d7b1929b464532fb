use crate::{metrics::ReplayOutcome, Backoff, CacheMetrics, Error, GvkAggregator};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use warden_policy_controller_core::{
    CfDataKey, DataStore, DynamicObject, Gvk, Process, ProcessExcluder, ReadinessTracker, Reader,
    Registrar, SyncSource,
};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How often the reconcile loop runs when nothing kicks it.
    pub reconcile_interval: Duration,
    pub backoff: Backoff,
}

/// Keeps the data store consistent with the kinds requested by all sync sources.
///
/// Every decision about what to watch, wipe or replay is made under a single lock. List calls
/// happen in per-kind replay tasks outside of the lock, so a slow or failing kind never blocks
/// source updates or other kinds.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    aggregator: GvkAggregator,
    state: Mutex<State>,

    reader: Arc<dyn Reader>,
    registrar: Arc<dyn Registrar>,
    store: Arc<dyn DataStore>,
    tracker: Arc<dyn ReadinessTracker>,

    config: CacheConfig,
    metrics: CacheMetrics,

    /// A pending reconcile. The channel holds a single message; kicks beyond it are dropped.
    kicks: mpsc::Sender<()>,
    /// Held by the active `run` call.
    kicked: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

#[derive(Default)]
struct State {
    /// Kinds the registrar is watching.
    watched: HashSet<Gvk>,
    /// Watched kinds that need a (re)list once the reconcile loop next runs.
    to_replay: HashSet<Gvk>,
    replays: HashMap<Gvk, Replay>,
    next_epoch: u64,
    excluder: ProcessExcluder,
    /// Set while `run` is active; replays are children of this token.
    root: Option<CancellationToken>,
}

struct Replay {
    epoch: u64,
    cancel: CancellationToken,
    /// Keys written or deleted by the watch since the replay started. The watch's view of these
    /// is at least as new as the replay's list, so the list result must not overwrite them.
    touched: HashSet<CfDataKey>,
    /// Set when the watch restarted while the replay was listing. The restart already replaced
    /// every object of the kind.
    restarted: bool,
}

/// Tears down an active `run` however it exits.
struct Running<'a> {
    inner: &'a Inner,
    root: CancellationToken,
}

enum Populated {
    Complete { stored: usize },
    Stale,
    Failed(anyhow::Error),
}

// === impl CacheConfig ===

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(1),
            backoff: Backoff::default(),
        }
    }
}

// === impl CacheManager ===

impl CacheManager {
    pub fn new(
        reader: Arc<dyn Reader>,
        registrar: Arc<dyn Registrar>,
        store: Arc<dyn DataStore>,
        tracker: Arc<dyn ReadinessTracker>,
        config: CacheConfig,
        metrics: CacheMetrics,
    ) -> Self {
        let (kicks, kicked) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                aggregator: GvkAggregator::default(),
                state: Mutex::new(State::default()),
                reader,
                registrar,
                store,
                tracker,
                config,
                metrics,
                kicks,
                kicked: tokio::sync::Mutex::new(kicked),
            }),
        }
    }

    /// Replaces the kinds requested by `source`. An empty set removes the source.
    ///
    /// Watches for kinds that gain their first source are registered before this returns; kinds
    /// that lose their last source stop being watched and their objects are wiped. Populating new
    /// kinds happens asynchronously once the reconcile loop runs.
    ///
    /// Fails if the input is invalid or the registrar rejects a watch. Rejected watches are retried
    /// by the reconcile loop.
    pub fn upsert_source(
        &self,
        source: SyncSource,
        gvks: impl IntoIterator<Item = Gvk>,
    ) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        self.inner.aggregator.upsert(source, gvks)?;
        self.inner.sync_watches(&mut state)
    }

    pub fn remove_source(&self, source: &SyncSource) -> Result<(), Error> {
        if !source.is_valid() {
            return Err(Error::InvalidSource(source.clone()));
        }
        let mut state = self.inner.state.lock();
        if !self.inner.aggregator.remove(source) {
            debug!(%source, "Source was not registered");
        }
        self.inner.sync_watches(&mut state)
    }

    /// Replaces the active process excluder.
    ///
    /// Cached objects that the new excluder excludes from syncing are removed right away, and
    /// every watched kind is re-listed so that objects it no longer excludes are picked up. An
    /// excluder equal to the active one changes nothing.
    pub fn exclude_processes(&self, excluder: ProcessExcluder) {
        let mut state = self.inner.state.lock();
        if state.excluder == excluder {
            trace!("Process excluder unchanged");
            return;
        }
        state.excluder = excluder;

        let mut pruned = 0;
        for gvk in &state.watched {
            for key in self.inner.store.keys_of_gvk(gvk) {
                if state.excluder.is_excluded(Process::Sync, &key) && self.inner.store.remove(&key)
                {
                    self.inner.tracker.cancel_expect(&key);
                    pruned += 1;
                }
            }
        }
        self.inner.metrics.excluded(pruned);
        info!(pruned, "Process excluder changed");

        let watched = state.watched.iter().cloned().collect::<Vec<_>>();
        state.to_replay.extend(watched);
        drop(state);
        self.inner.kick();
    }

    /// Wipes a watched kind and lists it again. Returns false if the kind is not watched.
    pub fn refresh(&self, gvk: &Gvk) -> bool {
        let mut state = self.inner.state.lock();
        if !state.watched.contains(gvk) {
            return false;
        }
        state.cancel_replay(gvk);
        self.inner.wipe(gvk);
        state.to_replay.insert(gvk.clone());
        drop(state);
        self.inner.kick();
        true
    }

    /// Runs the reconcile loop until `cancel` fires.
    ///
    /// Always returns an error: [`Error::Cancelled`] once cancelled, or [`Error::AlreadyRunning`]
    /// if another call is active. In-flight replays are cancelled on exit and rescheduled if the
    /// loop is started again.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        let mut kicks = self
            .inner
            .kicked
            .try_lock()
            .map_err(|_| Error::AlreadyRunning)?;

        let root = cancel.child_token();
        self.inner.state.lock().root = Some(root.clone());
        let _running = Running {
            inner: &self.inner,
            root,
        };

        let period = self
            .inner
            .config
            .reconcile_interval
            .max(Duration::from_millis(1));
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(?period, "Reconciling");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(()) = kicks.recv() => {}
                _ = interval.tick() => {}
            }
            self.inner.reconcile();
        }

        debug!("Reconcile loop stopped");
        Err(Error::Cancelled)
    }

    /// Stores an object delivered by a watch.
    ///
    /// Objects of kinds that are not watched are dropped. Objects in namespaces excluded from
    /// syncing are removed instead of stored.
    pub fn add_object(&self, gvk: &Gvk, obj: DynamicObject) -> Result<(), Error> {
        let key = key_for(gvk, &obj)?;
        let mut state = self.inner.state.lock();
        if !state.watched.contains(gvk) {
            trace!(%key, "Dropping object of an unwatched kind");
            return Ok(());
        }
        state.touch(gvk, &key);
        self.inner.put(&state, key, obj)
    }

    pub fn remove_object(&self, gvk: &Gvk, obj: &DynamicObject) -> Result<(), Error> {
        let key = key_for(gvk, obj)?;
        let mut state = self.inner.state.lock();
        state.touch(gvk, &key);
        self.inner.store.remove(&key);
        self.inner.tracker.cancel_expect(&key);
        Ok(())
    }

    /// Replaces every cached object of a watched kind with `objs`.
    ///
    /// Unnamed objects are skipped. The first failure is returned after all other objects have
    /// been applied.
    pub fn replace_objects(&self, gvk: &Gvk, objs: Vec<DynamicObject>) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        if !state.watched.contains(gvk) {
            trace!(%gvk, "Dropping objects of an unwatched kind");
            return Ok(());
        }
        if let Some(replay) = state.replays.get_mut(gvk) {
            replay.restarted = true;
        }

        let mut result = Ok(());
        let mut keyed = HashMap::with_capacity(objs.len());
        for obj in objs {
            match key_for(gvk, &obj) {
                Ok(key) => {
                    keyed.insert(key, obj);
                }
                Err(error) => {
                    warn!(%error, "Skipping object");
                    if result.is_ok() {
                        result = Err(error);
                    }
                }
            }
        }

        for key in self.inner.store.keys_of_gvk(gvk) {
            if !keyed.contains_key(&key) && self.inner.store.remove(&key) {
                self.inner.tracker.cancel_expect(&key);
            }
        }
        for (key, obj) in keyed {
            if let Err(error) = self.inner.put(&state, key, obj) {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    /// Kinds the registrar is currently watching.
    pub fn watched_gvks(&self) -> Vec<Gvk> {
        self.inner.state.lock().watched.iter().cloned().collect()
    }

    /// Kinds requested by at least one source.
    pub fn gvks_to_sync(&self) -> Vec<Gvk> {
        self.inner.aggregator.gvks()
    }

    pub fn sources_for(&self, gvk: &Gvk) -> Vec<SyncSource> {
        self.inner.aggregator.sources_for(gvk)
    }

    pub fn excluder(&self) -> ProcessExcluder {
        self.inner.state.lock().excluder.clone()
    }

    pub fn store(&self) -> Arc<dyn DataStore> {
        self.inner.store.clone()
    }
}

fn key_for(gvk: &Gvk, obj: &DynamicObject) -> Result<CfDataKey, Error> {
    CfDataKey::for_object(gvk, obj).map_err(|error| Error::InvalidObject {
        gvk: gvk.clone(),
        error,
    })
}

// === impl Inner ===

impl Inner {
    /// Converges the watched set on the aggregator's kinds.
    ///
    /// Every kind is attempted even if the registrar rejects some of them; the first rejection is
    /// returned.
    fn sync_watches(&self, state: &mut State) -> Result<(), Error> {
        let desired = self.aggregator.gvks().into_iter().collect::<HashSet<_>>();
        let mut changed = false;

        let stale = state
            .watched
            .difference(&desired)
            .cloned()
            .collect::<Vec<_>>();
        for gvk in stale {
            if let Err(error) = self.registrar.remove_watch(&gvk) {
                warn!(%gvk, %error, "Failed to remove watch");
            }
            state.watched.remove(&gvk);
            state.to_replay.remove(&gvk);
            state.cancel_replay(&gvk);
            let wiped = self.wipe(&gvk);
            info!(%gvk, wiped, "Stopped syncing");
            changed = true;
        }

        let mut result = Ok(());
        for gvk in desired {
            if state.watched.contains(&gvk) {
                continue;
            }
            if let Err(error) = self.registrar.add_watch(&gvk) {
                warn!(%gvk, %error, "Failed to add watch");
                if result.is_ok() {
                    result = Err(Error::Registrar { gvk, error });
                }
                continue;
            }
            // Leftovers from an earlier watch must not survive into the new replay.
            self.wipe(&gvk);
            info!(%gvk, "Started syncing");
            state.watched.insert(gvk.clone());
            state.to_replay.insert(gvk);
            changed = true;
        }

        if changed {
            self.kick();
        }
        result
    }

    fn reconcile(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if let Err(error) = self.sync_watches(&mut state) {
            debug!(%error, "Watches not yet converged");
        }

        if let Some(root) = state.root.clone() {
            let pending = state.to_replay.drain().collect::<Vec<_>>();
            for gvk in pending {
                if state.watched.contains(&gvk) {
                    self.spawn_replay(&mut state, &root, gvk);
                }
            }
        }

        self.metrics
            .set_sizes(state.watched.len(), self.store.len());
    }

    /// Starts a replay for `gvk`, cancelling any replay already running for it.
    fn spawn_replay(self: &Arc<Self>, state: &mut State, root: &CancellationToken, gvk: Gvk) {
        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let cancel = root.child_token();
        let replay = Replay::new(epoch, cancel.clone());
        if let Some(prior) = state.replays.insert(gvk.clone(), replay) {
            debug!(%gvk, epoch = prior.epoch, "Superseding replay");
            prior.cancel.cancel();
        }

        let span = info_span!("replay", %gvk, epoch);
        tokio::spawn(self.clone().replay(gvk, epoch, cancel).instrument(span));
    }

    async fn replay(self: Arc<Self>, gvk: Gvk, epoch: u64, cancel: CancellationToken) {
        let mut delays = self.config.backoff.delays();
        loop {
            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return debug!("Replay cancelled"),
                listed = self.reader.list(&gvk, None) => listed,
            };

            let error = match listed {
                Ok(objects) => match self.populate(&gvk, epoch, objects) {
                    Populated::Complete { stored } => {
                        info!(stored, "Replay complete");
                        self.metrics
                            .replay_finished(&gvk, ReplayOutcome::Complete);
                        self.tracker.replay_complete(&gvk);
                        return;
                    }
                    Populated::Stale => {
                        debug!("Discarding stale replay");
                        self.metrics.replay_finished(&gvk, ReplayOutcome::Stale);
                        return;
                    }
                    Populated::Failed(error) => error,
                },
                Err(error) => error,
            };
            self.metrics.list_failed(&gvk);

            let Some(delay) = delays.next() else {
                warn!(%error, "Replay failed; giving up");
                self.metrics
                    .replay_finished(&gvk, ReplayOutcome::Exhausted);
                self.state.lock().finish_replay(&gvk, epoch);
                return;
            };
            warn!(%error, ?delay, "Replay failed; retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return debug!("Replay cancelled"),
                _ = time::sleep(delay) => {}
            }
        }
    }

    /// Applies a replay's list result if the replay is still current.
    ///
    /// Objects the watch has written or deleted since the replay started are left as the watch
    /// has them.
    fn populate(&self, gvk: &Gvk, epoch: u64, objects: Vec<DynamicObject>) -> Populated {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_current(gvk, epoch) {
            return Populated::Stale;
        }
        let Some(replay) = state.replays.get(gvk) else {
            return Populated::Stale;
        };
        if replay.restarted {
            debug!("Watch restarted during replay");
            state.finish_replay(gvk, epoch);
            return Populated::Complete { stored: 0 };
        }

        let mut stored = 0;
        for obj in objects {
            let key = match CfDataKey::for_object(gvk, &obj) {
                Ok(key) => key,
                Err(error) => {
                    warn!(%error, "Skipping object");
                    continue;
                }
            };
            if replay.touched.contains(&key) {
                trace!(%key, "Keeping watched state");
                continue;
            }
            if state.excluder.is_excluded(Process::Sync, &key) {
                self.store.remove(&key);
                self.tracker.cancel_expect(&key);
                self.metrics.excluded(1);
                continue;
            }
            if let Err(error) = self.store.add(key.clone(), obj) {
                return Populated::Failed(Error::Store { key, error }.into());
            }
            self.tracker.observe(&key);
            stored += 1;
        }

        state.finish_replay(gvk, epoch);
        Populated::Complete { stored }
    }

    /// Stores an object unless its namespace is excluded from syncing.
    fn put(&self, state: &State, key: CfDataKey, obj: DynamicObject) -> Result<(), Error> {
        if state.excluder.is_excluded(Process::Sync, &key) {
            trace!(%key, "Excluded");
            self.store.remove(&key);
            self.tracker.cancel_expect(&key);
            self.metrics.excluded(1);
            return Ok(());
        }
        match self.store.add(key.clone(), obj) {
            Ok(()) => {
                self.tracker.observe(&key);
                Ok(())
            }
            Err(error) => Err(Error::Store { key, error }),
        }
    }

    fn wipe(&self, gvk: &Gvk) -> usize {
        let wiped = self.store.remove_all_of_gvk(gvk);
        self.metrics.wiped(wiped);
        wiped
    }

    /// Requests a reconcile. If one is already pending the request is coalesced into it.
    fn kick(&self) {
        match self.kicks.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => {
                trace!("Reconcile already pending");
                self.metrics.kick_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(())) => {}
        }
    }
}

// === impl Running ===

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.root.cancel();
        let mut state = self.inner.state.lock();
        state.root = None;
        let interrupted = state.replays.drain().map(|(gvk, _)| gvk).collect::<Vec<_>>();
        state.to_replay.extend(interrupted);
    }
}

// === impl Replay ===

impl Replay {
    fn new(epoch: u64, cancel: CancellationToken) -> Self {
        Self {
            epoch,
            cancel,
            touched: HashSet::default(),
            restarted: false,
        }
    }
}

// === impl State ===

impl State {
    /// Records a watch write so that an in-flight replay does not overwrite it.
    fn touch(&mut self, gvk: &Gvk, key: &CfDataKey) {
        if let Some(replay) = self.replays.get_mut(gvk) {
            replay.touched.insert(key.clone());
        }
    }

    fn is_current(&self, gvk: &Gvk, epoch: u64) -> bool {
        self.watched.contains(gvk) && self.replays.get(gvk).is_some_and(|r| r.epoch == epoch)
    }

    fn cancel_replay(&mut self, gvk: &Gvk) {
        if let Some(replay) = self.replays.remove(gvk) {
            replay.cancel.cancel();
        }
    }

    fn finish_replay(&mut self, gvk: &Gvk, epoch: u64) {
        if self.replays.get(gvk).is_some_and(|r| r.epoch == epoch) {
            self.replays.remove(gvk);
        }
    }
}
