use crate::CfDataKey;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

/// A controller process that namespaces may be excluded from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Process {
    Audit,
    Sync,
    Webhook,
    MutationWebhook,
    /// Every process.
    Star,
}

/// Matches namespace names exactly, by prefix (`kube-*`) or by suffix (`*-system`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespacePattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPattern {
    #[error("invalid process {0:?}")]
    Process(String),

    #[error("invalid namespace pattern {0:?}: only a single leading or trailing '*' is allowed")]
    Namespace(String),
}

/// Records which namespaces are excluded from which processes.
///
/// Excluders are plain values so that a replacement can be compared against the active one; an
/// unchanged excluder must not cause any cache churn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessExcluder {
    excluded: BTreeMap<Process, BTreeSet<NamespacePattern>>,
}

// === impl Process ===

impl Process {
    const ALL: [Process; 4] = [
        Process::Audit,
        Process::Sync,
        Process::Webhook,
        Process::MutationWebhook,
    ];

    fn expand(self) -> &'static [Process] {
        match self {
            Process::Star => &Self::ALL,
            Process::Audit => &[Process::Audit],
            Process::Sync => &[Process::Sync],
            Process::Webhook => &[Process::Webhook],
            Process::MutationWebhook => &[Process::MutationWebhook],
        }
    }
}

impl FromStr for Process {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit" => Ok(Process::Audit),
            "sync" => Ok(Process::Sync),
            "webhook" => Ok(Process::Webhook),
            "mutation-webhook" => Ok(Process::MutationWebhook),
            "*" => Ok(Process::Star),
            _ => Err(InvalidPattern::Process(s.to_string())),
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Process::Audit => "audit",
            Process::Sync => "sync",
            Process::Webhook => "webhook",
            Process::MutationWebhook => "mutation-webhook",
            Process::Star => "*",
        })
    }
}

// === impl NamespacePattern ===

impl NamespacePattern {
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            NamespacePattern::Exact(ns) => ns == namespace,
            NamespacePattern::Prefix(prefix) => namespace.starts_with(prefix.as_str()),
            NamespacePattern::Suffix(suffix) => namespace.ends_with(suffix.as_str()),
        }
    }
}

impl FromStr for NamespacePattern {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPattern::Namespace(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }
        match s.matches('*').count() {
            0 => Ok(NamespacePattern::Exact(s.to_string())),
            1 => {
                if let Some(prefix) = s.strip_suffix('*') {
                    Ok(NamespacePattern::Prefix(prefix.to_string()))
                } else if let Some(suffix) = s.strip_prefix('*') {
                    Ok(NamespacePattern::Suffix(suffix.to_string()))
                } else {
                    Err(invalid())
                }
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for NamespacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespacePattern::Exact(ns) => f.write_str(ns),
            NamespacePattern::Prefix(prefix) => write!(f, "{prefix}*"),
            NamespacePattern::Suffix(suffix) => write!(f, "*{suffix}"),
        }
    }
}

// === impl ProcessExcluder ===

impl ProcessExcluder {
    /// Excludes every namespace matching `patterns` from each of `processes`.
    pub fn add(
        &mut self,
        processes: impl IntoIterator<Item = Process>,
        patterns: impl IntoIterator<Item = NamespacePattern>,
    ) {
        let patterns = patterns.into_iter().collect::<BTreeSet<_>>();
        if patterns.is_empty() {
            return;
        }
        for process in processes.into_iter().flat_map(Process::expand) {
            self.excluded
                .entry(*process)
                .or_default()
                .extend(patterns.iter().cloned());
        }
    }

    /// Adds all of `other`'s exclusions to this excluder.
    pub fn merge(&mut self, other: &ProcessExcluder) {
        for (process, patterns) in &other.excluded {
            self.excluded
                .entry(*process)
                .or_default()
                .extend(patterns.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.values().all(BTreeSet::is_empty)
    }

    pub fn is_namespace_excluded(&self, process: Process, namespace: &str) -> bool {
        process.expand().iter().any(|p| {
            self.excluded
                .get(p)
                .map(|patterns| patterns.iter().any(|pat| pat.matches(namespace)))
                .unwrap_or(false)
        })
    }

    /// Returns true if the keyed object lives in a namespace excluded from `process`.
    ///
    /// `Namespace` objects are checked by their own name. Other cluster-scoped objects are never
    /// excluded.
    pub fn is_excluded(&self, process: Process, key: &CfDataKey) -> bool {
        if key.gvk.is_namespace() {
            return self.is_namespace_excluded(process, &key.name);
        }
        match key.namespace.as_deref() {
            Some(ns) => self.is_namespace_excluded(process, ns),
            None => false,
        }
    }
}
