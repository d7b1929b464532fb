use crate::Discovery;
use anyhow::{Context, Result};
use warden_policy_controller_core::{Gvk, Reader};
use warden_policy_controller_k8s_api::{Api, DynamicObject, ListParams};

/// Lists kinds from the API server, one page at a time.
#[derive(Clone)]
pub struct KubeReader {
    discovery: Discovery,
    page_size: u32,
}

// === impl KubeReader ===

impl KubeReader {
    const DEFAULT_PAGE_SIZE: u32 = 500;

    pub fn new(discovery: Discovery) -> Self {
        Self {
            discovery,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl Reader for KubeReader {
    async fn list(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let resolved = self.discovery.resolve(gvk).await?;
        let client = self.discovery.client();
        let api = match namespace {
            Some(ns) if resolved.namespaced => {
                Api::<DynamicObject>::namespaced_with(client, ns, &resolved.resource)
            }
            _ => Api::<DynamicObject>::all_with(client, &resolved.resource),
        };

        let mut params = ListParams::default().limit(self.page_size);
        let mut objects = Vec::new();
        loop {
            let page = api
                .list(&params)
                .await
                .with_context(|| format!("failed to list {gvk}"))?;
            objects.extend(page.items);
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => params = params.continue_token(&token),
                _ => break,
            }
        }
        tracing::trace!(%gvk, objects = objects.len(), "Listed");
        Ok(objects)
    }
}
