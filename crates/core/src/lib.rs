//! Deck core types — the workspace context wire model and the pure
//! namespace selection helpers everything else derives from.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Sentinel namespace value meaning "no namespace filter".
pub const ALL_NAMESPACES: &str = "_all";

/// Label shown when the effective selection is empty.
pub const ALL_NAMESPACES_LABEL: &str = "All Namespaces";

/// Namespace filter mode carried in the workspace context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceMode {
    /// Follow the cluster's current namespace when nothing is selected.
    #[default]
    Default,
    /// No namespace filter.
    All,
    /// Explicit user-chosen set.
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFilters {
    #[serde(default)]
    pub namespace_mode: NamespaceMode,
}

/// Server-persisted record of which namespaces/cluster/filter mode are
/// selected. The backend owns the authoritative copy; clients hold a mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceContext {
    pub selected_namespaces: Vec<String>,
    pub selected_cluster: String,
    pub filters: WorkspaceFilters,
}

impl WorkspaceContext {
    /// Copy with the namespace set normalized (trimmed, deduped, sorted).
    pub fn normalized(mut self) -> Self {
        self.selected_namespaces = normalize(&self.selected_namespaces);
        self
    }
}

/// Snapshot produced by polling the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionState {
    pub connected: bool,
    pub context: String,
    pub server: String,
    pub namespace: String,
    pub node_count: u32,
    pub pod_count: u32,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

// ---- Resource rows ----
//
// List endpoints return loosely-shaped JSON; every field defaults so a
// missing key never sinks the whole list.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub restarts: u32,
    pub node: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub ready_replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    pub name: String,
    pub status: String,
    pub roles: Vec<String>,
    pub version: String,
}

/// A kubeconfig context known to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    pub name: String,
    pub cluster: String,
    pub current: bool,
}

// ---- Namespace selection model ----

/// Trim, drop empties, dedupe and sort a requested namespace set.
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = names
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    out.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    out.dedup();
    out
}

/// Human-readable label for an effective selection.
pub fn compute_label(effective: &[String]) -> String {
    match effective {
        [] => ALL_NAMESPACES_LABEL.to_string(),
        [one] => one.clone(),
        many => format!("{} namespaces", many.len()),
    }
}

/// Resolve the selection a consumer should actually filter by.
///
/// Mode `all` means no filter (empty). Mode `default` with an empty
/// selection falls back to the cluster's current namespace when known.
pub fn resolve_effective_selection(
    selection: &[String],
    filters: &WorkspaceFilters,
    cluster_namespace: Option<&str>,
) -> Vec<String> {
    match filters.namespace_mode {
        NamespaceMode::All => Vec::new(),
        NamespaceMode::Default if selection.is_empty() => cluster_namespace
            .filter(|ns| !ns.is_empty())
            .map(|ns| vec![ns.to_string()])
            .unwrap_or_default(),
        _ => selection.to_vec(),
    }
}
