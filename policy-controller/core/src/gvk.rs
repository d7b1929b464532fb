use kube::core::GroupVersionKind;
use std::{fmt, str::FromStr};

/// Identifies a Kubernetes resource kind.
///
/// The core API group is represented by an empty `group`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid kind {0:?}: expected VERSION/KIND or GROUP/VERSION/KIND")]
pub struct InvalidGvk(String);

// === impl Gvk ===

impl Gvk {
    pub fn new(group: impl ToString, version: impl ToString, kind: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Builds a kind from an object's `apiVersion` (`v1` or `apps/v1`) and `kind`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Result<Self, InvalidGvk> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = Self::new(group, version, kind);
        if !gvk.is_valid() {
            return Err(InvalidGvk(format!("{api_version}/{kind}")));
        }
        Ok(gvk)
    }

    /// A kind needs at least a version and a kind name. The group may be empty.
    pub fn is_valid(&self) -> bool {
        !self.version.is_empty()
            && !self.kind.is_empty()
            && !self.version.contains('/')
            && !self.group.contains('/')
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// True for the core `v1/Namespace` kind, whose objects are matched against namespace
    /// exclusions by their own name.
    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.version == "v1" && self.kind == "Namespace"
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

impl FromStr for Gvk {
    type Err = InvalidGvk;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<_>>();
        let gvk = match parts.as_slice() {
            [version, kind] => Self::new("", version, kind),
            [group, version, kind] => Self::new(group, version, kind),
            _ => return Err(InvalidGvk(s.to_string())),
        };
        if !gvk.is_valid() {
            return Err(InvalidGvk(s.to_string()));
        }
        Ok(gvk)
    }
}

impl From<GroupVersionKind> for Gvk {
    fn from(gvk: GroupVersionKind) -> Self {
        Self {
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
        }
    }
}

impl From<&Gvk> for GroupVersionKind {
    fn from(gvk: &Gvk) -> Self {
        GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind)
    }
}
