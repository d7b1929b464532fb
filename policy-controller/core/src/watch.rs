use crate::Gvk;
use anyhow::Result;
use kube::core::DynamicObject;

/// An object notification produced by a kind's watch.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// An object was created or updated.
    Applied(Gvk, DynamicObject),

    /// An object was deleted.
    Deleted(Gvk, DynamicObject),

    /// The watch re-listed the kind; the objects are the complete current set.
    Restarted(Gvk, Vec<DynamicObject>),
}

/// Lists objects from the source of truth.
#[async_trait::async_trait]
pub trait Reader: Send + Sync + 'static {
    /// Lists all objects of a kind, optionally restricted to a namespace.
    ///
    /// Dropping the returned future cancels the list.
    async fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Vec<DynamicObject>>;
}

/// Starts and stops watches, each of which emits [`WatchEvent`]s for its kind.
///
/// Registration only records intent and must not block on network I/O: the watch itself runs in
/// the background. An error means the registrar rejected the request outright.
pub trait Registrar: Send + Sync + 'static {
    fn add_watch(&self, gvk: &Gvk) -> Result<()>;

    fn remove_watch(&self, gvk: &Gvk) -> Result<()>;
}

impl WatchEvent {
    pub fn gvk(&self) -> &Gvk {
        match self {
            WatchEvent::Applied(gvk, _)
            | WatchEvent::Deleted(gvk, _)
            | WatchEvent::Restarted(gvk, _) => gvk,
        }
    }
}
