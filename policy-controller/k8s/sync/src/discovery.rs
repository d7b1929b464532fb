use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use kube::discovery::{self, Scope};
use parking_lot::RwLock;
use std::sync::Arc;
use warden_policy_controller_core::Gvk;
use warden_policy_controller_k8s_api::{ApiResource, Client, GroupVersionKind};

/// Resolves kinds to API resources, remembering every successful lookup.
#[derive(Clone)]
pub struct Discovery {
    client: Client,
    resolved: Arc<RwLock<HashMap<Gvk, Resolved>>>,
}

#[derive(Clone, Debug)]
pub(crate) struct Resolved {
    pub(crate) resource: ApiResource,
    pub(crate) namespaced: bool,
}

// === impl Discovery ===

impl Discovery {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Default::default(),
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub(crate) async fn resolve(&self, gvk: &Gvk) -> Result<Resolved> {
        let cached = self.resolved.read().get(gvk).cloned();
        if let Some(resolved) = cached {
            return Ok(resolved);
        }

        let (resource, caps) = discovery::pinned_kind(&self.client, &GroupVersionKind::from(gvk))
            .await
            .with_context(|| format!("failed to discover {gvk}"))?;
        let resolved = Resolved {
            resource,
            namespaced: matches!(caps.scope, Scope::Namespaced),
        };
        self.resolved.write().insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }
}
