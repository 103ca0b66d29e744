//! Wiring and lifecycle. One `Workspace` instance owns the reactive graph,
//! the context store, the epoch trigger, the caches and the switch
//! orchestrator; construct it with [`Workspace::init`] and tear it down
//! with [`Workspace::dispose`].

use std::sync::Arc;

use deck_client::DashApi;
use deck_signals::Graph;
use tracing::warn;

use crate::caches::{ResourceCacheSet, StatusCache};
use crate::context::WorkspaceContextStore;
use crate::epoch::ConnectionEpochTrigger;
use crate::switch::ClusterSwitchOrchestrator;

pub struct Workspace {
    graph: Graph,
    pub store: Arc<WorkspaceContextStore>,
    pub caches: Arc<ResourceCacheSet>,
    pub switcher: ClusterSwitchOrchestrator,
    trigger: ConnectionEpochTrigger,
}

impl Workspace {
    /// Construct and wire the subsystem, then perform the best-effort
    /// initial loads (workspace context, namespace list). Callers decide
    /// whether to start status polling.
    pub async fn init(client: Arc<dyn DashApi>) -> Arc<Self> {
        let graph = Graph::new();
        let store = Arc::new(WorkspaceContextStore::new(&graph, Arc::clone(&client)));
        let status = Arc::new(StatusCache::new(
            &graph,
            Arc::clone(&client),
            store.cluster_namespace_signal().clone(),
        ));
        let trigger = ConnectionEpochTrigger::new(
            &graph,
            status.connected_signal().clone(),
            store.version_signal().clone(),
        );
        let caches = ResourceCacheSet::new(&graph, Arc::clone(&client), &store, &trigger, status);
        let switcher = ClusterSwitchOrchestrator::new(&graph, client, Arc::clone(&caches));

        store.load().await;
        if let Err(e) = caches.namespaces.refresh().await {
            warn!(error = %e, "initial namespace list fetch failed");
        }

        Arc::new(Self { graph, store, caches, switcher, trigger })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Current fetch key, mostly useful for diagnostics.
    pub fn fetch_key(&self) -> String {
        self.trigger.fetch_key()
    }

    /// Stop background work. Effect subscriptions are retired when the
    /// instance drops.
    pub fn dispose(&self) {
        self.caches.status.stop_polling();
    }
}
