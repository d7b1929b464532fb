use crate::GvkEntry;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Requests that a set of kinds be cached.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "syncset.warden.io",
    version = "v1alpha1",
    kind = "SyncSet",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SyncSetSpec {
    #[serde(default)]
    pub gvks: Vec<GvkEntry>,
}
