use crate::CacheManager;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use warden_policy_controller_core::WatchEvent;

/// Applies watch events to the cache.
pub struct SyncController {
    cache: CacheManager,
    events: mpsc::Receiver<WatchEvent>,
}

// === impl SyncController ===

impl SyncController {
    pub fn new(cache: CacheManager, events: mpsc::Receiver<WatchEvent>) -> Self {
        Self { cache, events }
    }

    /// Processes events until the channel closes or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.process(event);
        }
        debug!("Sync controller stopped");
    }

    fn process(&self, event: WatchEvent) {
        let res = match event {
            WatchEvent::Applied(gvk, obj) => {
                trace!(%gvk, name = ?obj.metadata.name, "Applied");
                self.cache.add_object(&gvk, obj)
            }
            WatchEvent::Deleted(gvk, obj) => {
                trace!(%gvk, name = ?obj.metadata.name, "Deleted");
                self.cache.remove_object(&gvk, &obj)
            }
            WatchEvent::Restarted(gvk, objs) => {
                debug!(%gvk, objects = objs.len(), "Watch restarted");
                self.cache.replace_objects(&gvk, objs)
            }
        };
        if let Err(error) = res {
            warn!(%error, "Failed to apply watch event");
        }
    }
}
