//! Client for the dashboard backend REST surface.
//!
//! `DashApi` is the trait the sync layer consumes; `HttpApi` is the real
//! reqwest-backed implementation and `MockApi` a configurable in-memory one
//! for tests. List endpoints historically return either a bare array or a
//! `{ "<kind>": [..] }` wrapper depending on the handler, so decoding
//! tolerates both.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use deck_core::{
    ConnectionState, ContextInfo, DeploymentInfo, NodeInfo, PodInfo, ServiceInfo,
    WorkspaceContext, ALL_NAMESPACES,
};

/// Errors surfaced by the client. Fetch failures are never fatal to the
/// caller's page; the store layer decides whether to rethrow or park them
/// in an error cell.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Backend surface consumed by the workspace/sync layer.
#[async_trait::async_trait]
pub trait DashApi: Send + Sync {
    async fn workspace_context(&self) -> ClientResult<WorkspaceContext>;
    /// Persist a context; the returned value is the server's canonical copy.
    async fn update_workspace_context(&self, next: &WorkspaceContext) -> ClientResult<WorkspaceContext>;
    async fn pods(&self, namespace: Option<&str>) -> ClientResult<Vec<PodInfo>>;
    async fn deployments(&self, namespace: Option<&str>) -> ClientResult<Vec<DeploymentInfo>>;
    async fn services(&self) -> ClientResult<Vec<ServiceInfo>>;
    async fn nodes(&self) -> ClientResult<Vec<NodeInfo>>;
    async fn status(&self) -> ClientResult<ConnectionState>;
    async fn contexts(&self) -> ClientResult<Vec<ContextInfo>>;
    async fn switch_context(&self, context: &str) -> ClientResult<()>;
    async fn namespaces(&self) -> ClientResult<Vec<String>>;
}

/// Accept either `[..]` or `{ "<kind>": [..] }` and decode the rows.
fn unwrap_list<T: DeserializeOwned>(value: Value, kind: &str) -> ClientResult<Vec<T>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(kind) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ClientError::Decode(format!("field \"{kind}\" is not an array")))
            }
            None => {
                return Err(ClientError::Decode(format!(
                    "expected an array or an object with \"{kind}\""
                )))
            }
        },
        other => {
            return Err(ClientError::Decode(format!(
                "expected a list for \"{kind}\", got {other}"
            )))
        }
    };
    items
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(|e| ClientError::Decode(e.to_string())))
        .collect()
}

/// Query suffix for namespace-scoped list endpoints. The `_all` sentinel and
/// an absent selection both mean "no filter" (empty query value).
fn namespace_query(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if ns != ALL_NAMESPACES && !ns.is_empty() => format!("?namespace={ns}"),
        _ => "?namespace=".to_string(),
    }
}

// ----------------- HTTP implementation -----------------

pub struct HttpApi {
    http: reqwest::Client,
    base: String,
}

impl HttpApi {
    /// `base` is the server root, e.g. `http://127.0.0.1:8080`; endpoint
    /// paths already include `/api`.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('/').to_string();
        Self { http: reqwest::Client::new(), base }
    }

    async fn get_json(&self, path: &str) -> ClientResult<Value> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::read_json(resp, &url).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> ClientResult<Value> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::read_json(resp, &url).await
    }

    async fn read_json(resp: reqwest::Response, url: &str) -> ClientResult<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%url, status = status.as_u16(), "request failed");
            return Err(ClientError::Http { status: status.as_u16(), body });
        }
        resp.json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl DashApi for HttpApi {
    async fn workspace_context(&self) -> ClientResult<WorkspaceContext> {
        let v = self.get_json("/api/workspace-context").await?;
        serde_json::from_value(v).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn update_workspace_context(&self, next: &WorkspaceContext) -> ClientResult<WorkspaceContext> {
        let body = serde_json::to_value(next).map_err(|e| ClientError::Decode(e.to_string()))?;
        let v = self.post_json("/api/workspace-context", &body).await?;
        serde_json::from_value(v).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn pods(&self, namespace: Option<&str>) -> ClientResult<Vec<PodInfo>> {
        let v = self
            .get_json(&format!("/api/pods{}", namespace_query(namespace)))
            .await?;
        unwrap_list(v, "pods")
    }

    async fn deployments(&self, namespace: Option<&str>) -> ClientResult<Vec<DeploymentInfo>> {
        let v = self
            .get_json(&format!("/api/deployments{}", namespace_query(namespace)))
            .await?;
        unwrap_list(v, "deployments")
    }

    async fn services(&self) -> ClientResult<Vec<ServiceInfo>> {
        let v = self.get_json("/api/services").await?;
        unwrap_list(v, "services")
    }

    async fn nodes(&self) -> ClientResult<Vec<NodeInfo>> {
        let v = self.get_json("/api/nodes").await?;
        unwrap_list(v, "nodes")
    }

    async fn status(&self) -> ClientResult<ConnectionState> {
        let v = self.get_json("/api/status").await?;
        serde_json::from_value(v).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn contexts(&self) -> ClientResult<Vec<ContextInfo>> {
        let v = self.get_json("/api/contexts").await?;
        unwrap_list(v, "contexts")
    }

    async fn switch_context(&self, context: &str) -> ClientResult<()> {
        let body = serde_json::json!({ "context": context });
        // Success/failure status only; the body is not interesting.
        let _ = self.post_json("/api/contexts/switch", &body).await?;
        Ok(())
    }

    async fn namespaces(&self) -> ClientResult<Vec<String>> {
        let v = self.get_json("/api/namespaces").await?;
        unwrap_list(v, "namespaces")
    }
}

// ----------------- Mock implementation -----------------

/// Per-endpoint call counters, readable from tests.
#[derive(Debug, Default)]
pub struct MockCalls {
    pub workspace_context: AtomicUsize,
    pub update_context: AtomicUsize,
    pub pods: AtomicUsize,
    pub deployments: AtomicUsize,
    pub services: AtomicUsize,
    pub nodes: AtomicUsize,
    pub status: AtomicUsize,
    pub contexts: AtomicUsize,
    pub switch: AtomicUsize,
    pub namespaces: AtomicUsize,
}

impl MockCalls {
    pub fn cluster_lists(&self) -> usize {
        self.pods.load(Ordering::SeqCst)
            + self.deployments.load(Ordering::SeqCst)
            + self.services.load(Ordering::SeqCst)
            + self.nodes.load(Ordering::SeqCst)
    }
}

/// Mutable mock state; flip the error flags to fail the matching endpoint.
#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub context: WorkspaceContext,
    pub status: ConnectionState,
    pub pods: Vec<PodInfo>,
    pub deployments: Vec<DeploymentInfo>,
    pub services: Vec<ServiceInfo>,
    pub nodes: Vec<NodeInfo>,
    pub contexts: Vec<ContextInfo>,
    pub namespaces: Vec<String>,
    pub switched_to: Vec<String>,
    pub load_error: bool,
    pub update_error: bool,
    pub switch_error: bool,
    pub list_error: bool,
    /// Delay applied to cluster-wide list fetches (drives fencing tests
    /// under paused tokio time).
    pub list_delay: Option<Duration>,
    /// Delay applied to context updates (lets tests observe the
    /// optimistic label while a persist is in flight).
    pub update_delay: Option<Duration>,
    /// Pod rows are filtered by this field when a namespace is requested.
    pub scope_pods_by_namespace: bool,
}

/// In-memory `DashApi` for tests.
#[derive(Default)]
pub struct MockApi {
    pub state: Mutex<MockState>,
    pub calls: MockCalls,
}

impl MockApi {
    pub fn new(state: MockState) -> Self {
        Self { state: Mutex::new(state), calls: MockCalls::default() }
    }

    fn failure(what: &str) -> ClientError {
        ClientError::Http { status: 500, body: format!("mock {what} failure") }
    }

    async fn list_gate(&self) -> ClientResult<()> {
        let (delay, fail) = {
            let s = self.state.lock().unwrap();
            (s.list_delay, s.list_error)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if fail {
            return Err(Self::failure("list"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DashApi for MockApi {
    async fn workspace_context(&self) -> ClientResult<WorkspaceContext> {
        self.calls.workspace_context.fetch_add(1, Ordering::SeqCst);
        let s = self.state.lock().unwrap();
        if s.load_error {
            return Err(Self::failure("load"));
        }
        Ok(s.context.clone())
    }

    async fn update_workspace_context(&self, next: &WorkspaceContext) -> ClientResult<WorkspaceContext> {
        self.calls.update_context.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().update_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let mut s = self.state.lock().unwrap();
        if s.update_error {
            return Err(Self::failure("update"));
        }
        // The server normalizes and returns its canonical copy.
        s.context = next.clone().normalized();
        Ok(s.context.clone())
    }

    async fn pods(&self, namespace: Option<&str>) -> ClientResult<Vec<PodInfo>> {
        self.calls.pods.fetch_add(1, Ordering::SeqCst);
        self.list_gate().await?;
        let s = self.state.lock().unwrap();
        match namespace {
            Some(ns) if s.scope_pods_by_namespace && ns != ALL_NAMESPACES => {
                Ok(s.pods.iter().filter(|p| p.namespace == ns).cloned().collect())
            }
            _ => Ok(s.pods.clone()),
        }
    }

    async fn deployments(&self, _namespace: Option<&str>) -> ClientResult<Vec<DeploymentInfo>> {
        self.calls.deployments.fetch_add(1, Ordering::SeqCst);
        self.list_gate().await?;
        Ok(self.state.lock().unwrap().deployments.clone())
    }

    async fn services(&self) -> ClientResult<Vec<ServiceInfo>> {
        self.calls.services.fetch_add(1, Ordering::SeqCst);
        self.list_gate().await?;
        Ok(self.state.lock().unwrap().services.clone())
    }

    async fn nodes(&self) -> ClientResult<Vec<NodeInfo>> {
        self.calls.nodes.fetch_add(1, Ordering::SeqCst);
        self.list_gate().await?;
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn status(&self) -> ClientResult<ConnectionState> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().status.clone())
    }

    async fn contexts(&self) -> ClientResult<Vec<ContextInfo>> {
        self.calls.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().contexts.clone())
    }

    async fn switch_context(&self, context: &str) -> ClientResult<()> {
        self.calls.switch.fetch_add(1, Ordering::SeqCst);
        let mut s = self.state.lock().unwrap();
        if s.switch_error {
            return Err(Self::failure("switch"));
        }
        s.switched_to.push(context.to_string());
        s.status.context = context.to_string();
        Ok(())
    }

    async fn namespaces(&self) -> ClientResult<Vec<String>> {
        self.calls.namespaces.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().namespaces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwrap_list_accepts_bare_array() {
        let v = json!([{ "name": "a" }, { "name": "b" }]);
        let pods: Vec<PodInfo> = unwrap_list(v, "pods").unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].name, "a");
    }

    #[test]
    fn unwrap_list_accepts_wrapped_object() {
        let v = json!({ "pods": [{ "name": "a", "namespace": "ns" }] });
        let pods: Vec<PodInfo> = unwrap_list(v, "pods").unwrap();
        assert_eq!(pods[0].namespace, "ns");
    }

    #[test]
    fn unwrap_list_rejects_other_shapes() {
        assert!(unwrap_list::<PodInfo>(json!({ "items": [] }), "pods").is_err());
        assert!(unwrap_list::<PodInfo>(json!("nope"), "pods").is_err());
    }

    #[test]
    fn namespace_query_handles_sentinel() {
        assert_eq!(namespace_query(Some("prod")), "?namespace=prod");
        assert_eq!(namespace_query(Some(ALL_NAMESPACES)), "?namespace=");
        assert_eq!(namespace_query(None), "?namespace=");
    }

    #[tokio::test]
    async fn mock_update_returns_normalized_context() {
        let api = MockApi::default();
        let mut next = WorkspaceContext::default();
        next.selected_namespaces = vec!["b".into(), "a".into(), "a".into()];
        let saved = api.update_workspace_context(&next).await.unwrap();
        assert_eq!(saved.selected_namespaces, vec!["a", "b"]);
        assert_eq!(api.calls.update_context.load(Ordering::SeqCst), 1);
    }
}
