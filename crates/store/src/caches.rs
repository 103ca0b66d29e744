//! The asynchronous resource caches: four epoch-gated cluster-wide entries
//! (pods, deployments, services, nodes), the connectivity-independent
//! status and contexts caches, and the namespace list.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use deck_client::{ClientResult, DashApi};
use deck_core::{ConnectionState, ContextInfo, DeploymentInfo, NodeInfo, PodInfo, ServiceInfo};
use deck_signals::{Computed, Graph, Signal, Subscription};
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::WorkspaceContextStore;
use crate::epoch::ConnectionEpochTrigger;

type ListFetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, ClientResult<Vec<T>>> + Send + Sync>;

/// One cluster-wide resource kind. The fetch is keyed on the epoch gate:
/// it fires exactly when the gate's string changes while connected, and is
/// suspended entirely (no in-flight request, previous value retained) while
/// disconnected.
pub struct EpochCache<T: Clone + PartialEq + Send + 'static> {
    kind: &'static str,
    value: Signal<Option<Vec<T>>>,
    loading: Signal<bool>,
    error: Signal<Option<String>>,
    gate: Computed<Option<String>>,
    fetcher: ListFetcher<T>,
    _watch: Subscription,
}

impl<T: Clone + PartialEq + Send + 'static> EpochCache<T> {
    fn new(
        graph: &Graph,
        kind: &'static str,
        gate: Computed<Option<String>>,
        fetcher: ListFetcher<T>,
    ) -> Arc<Self> {
        let value = graph.cell(None::<Vec<T>>);
        let loading = graph.cell(false);
        let error = graph.cell(None::<String>);
        let watch = {
            let (gate2, value2, loading2, error2, fetcher2) = (
                gate.clone(),
                value.clone(),
                loading.clone(),
                error.clone(),
                Arc::clone(&fetcher),
            );
            graph.effect(&[gate.id()], move || {
                if let Some(key) = gate2.get() {
                    spawn_fetch(
                        kind,
                        key,
                        Arc::clone(&fetcher2),
                        gate2.clone(),
                        value2.clone(),
                        loading2.clone(),
                        error2.clone(),
                    );
                }
            })
        };
        Arc::new(Self { kind, value, loading, error, gate, fetcher, _watch: watch })
    }

    pub fn data(&self) -> Option<Vec<T>> {
        self.value.get()
    }

    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    /// Manual refetch under the current gate key; a no-op while suspended.
    pub fn refetch(&self) {
        if let Some(key) = self.gate.get() {
            spawn_fetch(
                self.kind,
                key,
                Arc::clone(&self.fetcher),
                self.gate.clone(),
                self.value.clone(),
                self.loading.clone(),
                self.error.clone(),
            );
        } else {
            debug!(kind = self.kind, "refetch skipped while suspended");
        }
    }
}

/// Runs the fetch on the current tokio runtime, tagged with the gate key
/// active at issue time; a completion whose key no longer matches is
/// discarded so a slow response from an old epoch can never overwrite newer
/// state.
fn spawn_fetch<T: Clone + PartialEq + Send + 'static>(
    kind: &'static str,
    key: String,
    fetcher: ListFetcher<T>,
    gate: Computed<Option<String>>,
    value: Signal<Option<Vec<T>>>,
    loading: Signal<bool>,
    error: Signal<Option<String>>,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(h) => h,
        Err(_) => {
            warn!(kind, "no tokio runtime; cache fetch skipped");
            return;
        }
    };
    loading.set(true);
    counter!("deck_cache_fetch_total", 1u64, "kind" => kind);
    handle.spawn(async move {
        let t0 = Instant::now();
        let res = (fetcher)().await;
        if gate.get().as_deref() != Some(key.as_str()) {
            counter!("deck_cache_fetch_discarded_total", 1u64, "kind" => kind);
            debug!(kind, key = %key, "stale fetch result discarded");
            if gate.get().is_none() {
                loading.set(false);
            }
            return;
        }
        match res {
            Ok(items) => {
                info!(
                    kind,
                    count = items.len(),
                    took_ms = %t0.elapsed().as_millis(),
                    "cache refreshed"
                );
                value.set(Some(items));
                error.set(None);
            }
            Err(e) => {
                // Keep the previous value; consumers stay stale-but-consistent.
                warn!(kind, error = %e, "cache fetch failed");
                error.set(Some(e.to_string()));
            }
        }
        loading.set(false);
    });
}

/// Connectivity summary. Polls independently of the epoch — it is what the
/// epoch is derived from. Publishes the latest snapshot lock-free alongside
/// the reactive `connected` flag.
pub struct StatusCache {
    client: Arc<dyn DashApi>,
    graph: Graph,
    snapshot: ArcSwap<ConnectionState>,
    connected: Signal<bool>,
    cluster_namespace: Signal<String>,
    error: Signal<Option<String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl StatusCache {
    pub fn new(graph: &Graph, client: Arc<dyn DashApi>, cluster_namespace: Signal<String>) -> Self {
        Self {
            client,
            graph: graph.clone(),
            snapshot: ArcSwap::from_pointee(ConnectionState::default()),
            connected: graph.cell(false),
            cluster_namespace,
            error: graph.cell(None::<String>),
            poller: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<ConnectionState> {
        self.snapshot.load_full()
    }

    pub fn connected(&self) -> bool {
        self.connected.get()
    }

    pub(crate) fn connected_signal(&self) -> &Signal<bool> {
        &self.connected
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    pub async fn refetch(&self) {
        match self.client.status().await {
            Ok(state) => {
                debug!(connected = state.connected, context = %state.context, "status refreshed");
                self.snapshot.store(Arc::new(state.clone()));
                self.graph.batch(|| {
                    self.connected.set(state.connected);
                    self.cluster_namespace.set(state.namespace.clone());
                    self.error.set(None);
                });
            }
            Err(e) => {
                warn!(error = %e, "status fetch failed");
                self.graph.batch(|| {
                    self.connected.set(false);
                    self.error.set(Some(e.to_string()));
                });
            }
        }
    }

    pub fn start_polling(self: &Arc<Self>, every: Duration) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                cache.refetch().await;
                tokio::time::sleep(every).await;
            }
        });
        if let Some(old) = self.poller.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Available kubeconfig contexts; connectivity-independent.
pub struct ContextsCache {
    client: Arc<dyn DashApi>,
    value: Signal<Option<Vec<ContextInfo>>>,
    loading: Signal<bool>,
    error: Signal<Option<String>>,
}

impl ContextsCache {
    pub fn new(graph: &Graph, client: Arc<dyn DashApi>) -> Self {
        Self {
            client,
            value: graph.cell(None),
            loading: graph.cell(false),
            error: graph.cell(None::<String>),
        }
    }

    pub fn data(&self) -> Option<Vec<ContextInfo>> {
        self.value.get()
    }

    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    pub async fn refetch(&self) {
        self.loading.set(true);
        match self.client.contexts().await {
            Ok(contexts) => {
                info!(count = contexts.len(), "context list refreshed");
                self.value.set(Some(contexts));
                self.error.set(None);
            }
            Err(e) => {
                warn!(error = %e, "context list fetch failed");
                self.error.set(Some(e.to_string()));
            }
        }
        self.loading.set(false);
    }
}

/// Namespace name list: fetched once at start, refreshed explicitly on
/// cluster switch.
pub struct NamespacesCache {
    client: Arc<dyn DashApi>,
    value: Signal<Vec<String>>,
}

impl NamespacesCache {
    pub fn new(graph: &Graph, client: Arc<dyn DashApi>) -> Self {
        Self { client, value: graph.cell(Vec::new()) }
    }

    pub fn data(&self) -> Vec<String> {
        self.value.get()
    }

    pub async fn refresh(&self) -> ClientResult<()> {
        let names = self.client.namespaces().await?;
        info!(count = names.len(), "namespace list refreshed");
        self.value.set(names);
        Ok(())
    }
}

/// All caches, wired to one epoch gate.
pub struct ResourceCacheSet {
    pub pods: Arc<EpochCache<PodInfo>>,
    pub deployments: Arc<EpochCache<DeploymentInfo>>,
    pub services: Arc<EpochCache<ServiceInfo>>,
    pub nodes: Arc<EpochCache<NodeInfo>>,
    pub status: Arc<StatusCache>,
    pub contexts: ContextsCache,
    pub namespaces: NamespacesCache,
    _defensive: Subscription,
}

impl ResourceCacheSet {
    pub fn new(
        graph: &Graph,
        client: Arc<dyn DashApi>,
        store: &Arc<WorkspaceContextStore>,
        trigger: &ConnectionEpochTrigger,
        status: Arc<StatusCache>,
    ) -> Arc<Self> {
        let gate = trigger.gate().clone();

        let pods_fetcher: ListFetcher<PodInfo> = {
            let (client, store) = (Arc::clone(&client), Arc::clone(store));
            Arc::new(move || {
                let client = Arc::clone(&client);
                let ns = store.scope_namespace();
                async move { client.pods(ns.as_deref()).await }.boxed()
            })
        };
        let deployments_fetcher: ListFetcher<DeploymentInfo> = {
            let (client, store) = (Arc::clone(&client), Arc::clone(store));
            Arc::new(move || {
                let client = Arc::clone(&client);
                let ns = store.scope_namespace();
                async move { client.deployments(ns.as_deref()).await }.boxed()
            })
        };
        let services_fetcher: ListFetcher<ServiceInfo> = {
            let client = Arc::clone(&client);
            Arc::new(move || {
                let client = Arc::clone(&client);
                async move { client.services().await }.boxed()
            })
        };
        let nodes_fetcher: ListFetcher<NodeInfo> = {
            let client = Arc::clone(&client);
            Arc::new(move || {
                let client = Arc::clone(&client);
                async move { client.nodes().await }.boxed()
            })
        };

        let pods = EpochCache::new(graph, "pods", gate.clone(), pods_fetcher);
        let deployments = EpochCache::new(graph, "deployments", gate.clone(), deployments_fetcher);
        let services = EpochCache::new(graph, "services", gate.clone(), services_fetcher);
        let nodes = EpochCache::new(graph, "nodes", gate, nodes_fetcher);

        // Known race workaround: a consumer subscribing in the same tick as
        // the connect may miss the gate transition, so schedule one delayed
        // unconditional refetch after each connect, skipped if the
        // connection dropped again in the meantime.
        let defensive = {
            let connected = status.connected_signal().clone();
            let was_connected = Mutex::new(false);
            let (p, d, s, n) = (
                Arc::clone(&pods),
                Arc::clone(&deployments),
                Arc::clone(&services),
                Arc::clone(&nodes),
            );
            graph.effect(&[connected.id()], move || {
                let now = connected.get();
                let was = std::mem::replace(&mut *was_connected.lock().unwrap(), now);
                if !now || was {
                    return;
                }
                let handle = match tokio::runtime::Handle::try_current() {
                    Ok(h) => h,
                    Err(_) => return,
                };
                let connected = connected.clone();
                let (p, d, s, n) = (Arc::clone(&p), Arc::clone(&d), Arc::clone(&s), Arc::clone(&n));
                handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if connected.get() {
                        debug!("post-connect defensive refetch");
                        p.refetch();
                        d.refetch();
                        s.refetch();
                        n.refetch();
                    }
                });
            })
        };

        Arc::new(Self {
            pods,
            deployments,
            services,
            nodes,
            status,
            contexts: ContextsCache::new(graph, Arc::clone(&client)),
            namespaces: NamespacesCache::new(graph, client),
            _defensive: defensive,
        })
    }

    /// Refetch everything: status first (it may move the epoch), then the
    /// cluster-wide caches under the resulting gate.
    pub async fn refresh_all(&self) {
        self.status.refetch().await;
        self.pods.refetch();
        self.deployments.refetch();
        self.services.refetch();
        self.nodes.refetch();
    }
}
