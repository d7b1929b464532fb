use crate::Discovery;
use ahash::AHashMap as HashMap;
use anyhow::{bail, Context, Result};
use futures::prelude::*;
use kube::runtime::WatchStreamExt;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc, task::AbortHandle, time};
use tracing::{debug, info_span, warn, Instrument};
use warden_policy_controller_core::{Gvk, Registrar, WatchEvent};
use warden_policy_controller_k8s_api::{watcher, Api, DynamicObject};

/// Runs a watch task per registered kind. Each task forwards its events to a shared channel.
pub struct KubeRegistrar {
    discovery: Discovery,
    events: mpsc::Sender<WatchEvent>,
    watches: Mutex<HashMap<Gvk, AbortHandle>>,
}

const RESOLVE_BACKOFF: time::Duration = time::Duration::from_secs(5);

// === impl KubeRegistrar ===

impl KubeRegistrar {
    pub fn new(discovery: Discovery, events: mpsc::Sender<WatchEvent>) -> Self {
        Self {
            discovery,
            events,
            watches: Default::default(),
        }
    }
}

impl Registrar for KubeRegistrar {
    fn add_watch(&self, gvk: &Gvk) -> Result<()> {
        let mut watches = self.watches.lock();
        if watches.contains_key(gvk) {
            bail!("{gvk} is already watched");
        }
        let rt = Handle::try_current().context("watches must be started on a runtime")?;
        let task = rt.spawn(
            watch(self.discovery.clone(), gvk.clone(), self.events.clone())
                .instrument(info_span!("watch", %gvk)),
        );
        watches.insert(gvk.clone(), task.abort_handle());
        Ok(())
    }

    fn remove_watch(&self, gvk: &Gvk) -> Result<()> {
        match self.watches.lock().remove(gvk) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => bail!("{gvk} is not watched"),
        }
    }
}

impl Drop for KubeRegistrar {
    fn drop(&mut self) {
        for (_, task) in self.watches.get_mut().drain() {
            task.abort();
        }
    }
}

async fn watch(discovery: Discovery, gvk: Gvk, events: mpsc::Sender<WatchEvent>) {
    let resolved = loop {
        match discovery.resolve(&gvk).await {
            Ok(resolved) => break resolved,
            Err(error) => {
                warn!(%error, "Failed to resolve kind; retrying");
                time::sleep(RESOLVE_BACKOFF).await;
            }
        }
    };

    let api = Api::<DynamicObject>::all_with(discovery.client(), &resolved.resource);
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    forward(gvk, stream, events).await;
}

/// Forwards a watch's events until the stream ends or the receiver is dropped.
///
/// The objects of an initial list (`Init`, `InitApply`*, `InitDone`) are delivered as a single
/// `Restarted` event.
pub(crate) async fn forward<S, E>(gvk: Gvk, stream: S, events: mpsc::Sender<WatchEvent>)
where
    S: Stream<Item = Result<watcher::Event<DynamicObject>, E>>,
    E: std::fmt::Display,
{
    tokio::pin!(stream);
    let mut init = None::<Vec<DynamicObject>>;
    while let Some(res) = stream.next().await {
        let event = match res {
            Ok(watcher::Event::Init) => {
                init = Some(Vec::new());
                continue;
            }
            Ok(watcher::Event::InitApply(obj)) => match init.as_mut() {
                Some(objs) => {
                    objs.push(obj);
                    continue;
                }
                None => WatchEvent::Applied(gvk.clone(), obj),
            },
            Ok(watcher::Event::InitDone) => {
                WatchEvent::Restarted(gvk.clone(), init.take().unwrap_or_default())
            }
            Ok(watcher::Event::Apply(obj)) => WatchEvent::Applied(gvk.clone(), obj),
            Ok(watcher::Event::Delete(obj)) => WatchEvent::Deleted(gvk.clone(), obj),
            Err(error) => {
                warn!(%error, "Watch failed");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            debug!("Event receiver dropped");
            return;
        }
    }
    debug!("Watch ended");
}
