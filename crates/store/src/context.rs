//! Authoritative record of the user's workspace selection. The backend owns
//! the context; this store holds the confirmed mirror and pushes every
//! mutation through a persist-then-reconcile path: the server's returned
//! context — not the locally-built candidate — becomes the new truth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deck_client::DashApi;
use deck_core::{
    compute_label, normalize, resolve_effective_selection, NamespaceMode, WorkspaceContext,
    ALL_NAMESPACES, ALL_NAMESPACES_LABEL,
};
use deck_signals::{Computed, Graph, Signal};
use tracing::{debug, info, warn};

use crate::StoreError;

pub struct WorkspaceContextStore {
    client: Arc<dyn DashApi>,
    graph: Graph,
    /// Last server-confirmed context.
    context: Signal<WorkspaceContext>,
    /// Bumped unconditionally on every confirmed context application; the
    /// epoch trigger derives the cache fetch key from it.
    version: Signal<u64>,
    /// Current namespace of the connected cluster (empty when unknown);
    /// written by the status cache.
    cluster_namespace: Signal<String>,
    /// Optimistic label shown while a `set_namespace` persist is in flight.
    /// Cleared on settle either way, so a failed persist reverts the
    /// display to the last confirmed state.
    pending_label: Signal<Option<String>>,
    label: Computed<String>,
    load_in_flight: AtomicBool,
}

impl WorkspaceContextStore {
    pub fn new(graph: &Graph, client: Arc<dyn DashApi>) -> Self {
        let context = graph.cell(WorkspaceContext::default());
        let version = graph.cell(0u64);
        let cluster_namespace = graph.cell(String::new());
        let pending_label = graph.cell(None::<String>);
        let label = {
            let (ctx, ns, pending) =
                (context.clone(), cluster_namespace.clone(), pending_label.clone());
            graph.computed(
                &[context.id(), cluster_namespace.id(), pending_label.id()],
                move || {
                    if let Some(optimistic) = pending.get() {
                        return optimistic;
                    }
                    let ctx = ctx.get();
                    let cluster_ns = ns.get();
                    let effective = resolve_effective_selection(
                        &ctx.selected_namespaces,
                        &ctx.filters,
                        (!cluster_ns.is_empty()).then_some(cluster_ns.as_str()),
                    );
                    compute_label(&effective)
                },
            )
        };
        Self {
            client,
            graph: graph.clone(),
            context,
            version,
            cluster_namespace,
            pending_label,
            label,
            load_in_flight: AtomicBool::new(false),
        }
    }

    // ---- read accessors ----

    pub fn context(&self) -> WorkspaceContext {
        self.context.get()
    }

    pub fn selected_namespaces(&self) -> Vec<String> {
        self.context.get().selected_namespaces
    }

    pub fn label(&self) -> String {
        self.label.get()
    }

    pub fn label_signal(&self) -> &Computed<String> {
        &self.label
    }

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn version_signal(&self) -> &Signal<u64> {
        &self.version
    }

    pub(crate) fn cluster_namespace_signal(&self) -> &Signal<String> {
        &self.cluster_namespace
    }

    /// Selection the fetchers should filter by.
    pub fn effective_selection(&self) -> Vec<String> {
        let ctx = self.context.get();
        let cluster_ns = self.cluster_namespace.get();
        resolve_effective_selection(
            &ctx.selected_namespaces,
            &ctx.filters,
            (!cluster_ns.is_empty()).then_some(cluster_ns.as_str()),
        )
    }

    /// Namespace query for the list endpoints: a single effective namespace
    /// scopes the fetch, anything else means "all".
    pub fn scope_namespace(&self) -> Option<String> {
        let effective = self.effective_selection();
        match effective.as_slice() {
            [one] => Some(one.clone()),
            _ => None,
        }
    }

    // ---- mutations ----

    /// Fetch the server's context and adopt it. Failures fall back to the
    /// default context. Concurrent calls collapse into a no-op.
    pub async fn load(&self) {
        if self.load_in_flight.swap(true, Ordering::SeqCst) {
            debug!("workspace context load already in flight");
            return;
        }
        match self.client.workspace_context().await {
            Ok(ctx) => {
                info!(
                    namespaces = ctx.selected_namespaces.len(),
                    cluster = %ctx.selected_cluster,
                    "workspace context loaded"
                );
                self.apply_state(ctx);
            }
            Err(e) => {
                warn!(error = %e, "workspace context load failed; applying defaults");
                self.apply_state(WorkspaceContext::default());
            }
        }
        self.load_in_flight.store(false, Ordering::SeqCst);
    }

    /// Persist a new namespace selection. A write that would not change the
    /// normalized set nor the mode is suppressed entirely.
    pub async fn set_selected_namespaces(
        &self,
        names: &[String],
        mode: Option<NamespaceMode>,
    ) -> Result<(), StoreError> {
        let normalized = normalize(names);
        let current = self.context.get();
        let next_mode = mode.unwrap_or(if normalized.is_empty() {
            NamespaceMode::Default
        } else {
            NamespaceMode::Custom
        });
        if normalized == current.selected_namespaces
            && next_mode == current.filters.namespace_mode
        {
            debug!("namespace selection unchanged; suppressing persist");
            return Ok(());
        }
        let mut next = current;
        next.selected_namespaces = normalized;
        next.filters.namespace_mode = next_mode;
        self.persist(next).await
    }

    /// Single-namespace convenience: the displayed label updates before the
    /// round trip (two-phase — pending over confirmed), then the selection
    /// is persisted. `ALL_NAMESPACES` selects everything.
    pub async fn set_namespace(&self, value: &str) -> Result<(), StoreError> {
        let (optimistic, names, mode) = if value == ALL_NAMESPACES {
            (ALL_NAMESPACES_LABEL.to_string(), Vec::new(), NamespaceMode::All)
        } else {
            (value.to_string(), vec![value.to_string()], NamespaceMode::Custom)
        };
        self.pending_label.set(Some(optimistic));
        let res = self.set_selected_namespaces(&names, Some(mode)).await;
        // Settled: confirmed state (adopted server truth, or the prior
        // context on failure) drives the label again.
        self.pending_label.set(None);
        res
    }

    /// Push a candidate context to the backend and adopt the returned
    /// canonical copy. Errors are logged and rethrown without touching
    /// local state.
    pub async fn persist(&self, next: WorkspaceContext) -> Result<(), StoreError> {
        match self.client.update_workspace_context(&next).await {
            Ok(confirmed) => {
                info!(
                    namespaces = confirmed.selected_namespaces.len(),
                    mode = ?confirmed.filters.namespace_mode,
                    "workspace context persisted"
                );
                self.apply_state(confirmed);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "workspace context persist failed");
                Err(StoreError::Persist(e))
            }
        }
    }

    /// Back to an empty selection in default mode.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut next = self.context.get();
        next.selected_namespaces.clear();
        next.filters.namespace_mode = NamespaceMode::Default;
        self.persist(next).await
    }

    fn apply_state(&self, ctx: WorkspaceContext) {
        let ctx = ctx.normalized();
        self.graph.batch(|| {
            self.context.set(ctx);
            // Unconditional: even a filters-only change must eventually
            // retrigger the cluster-wide caches.
            self.version.update(|v| v + 1);
        });
    }
}
