use crate::GvkEntry;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Configures the controller. Only the resource with the configured name in the controller's
/// namespace is honored.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "config.warden.io",
    version = "v1alpha1",
    kind = "Config",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default, rename = "match")]
    pub match_: Vec<MatchEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub sync_only: Vec<GvkEntry>,
}

/// Excludes namespaces from controller processes (`audit`, `sync`, `webhook`,
/// `mutation-webhook`, or `*`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    #[serde(default)]
    pub processes: Vec<String>,

    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}
