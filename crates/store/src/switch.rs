//! Cluster-context switch sequencing: idle -> switching -> idle, with
//! user-visible progress messaging and a callback registry so unrelated
//! page-local caches can invalidate themselves without the orchestrator
//! knowing about them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deck_client::DashApi;
use deck_signals::{Graph, Signal};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::caches::ResourceCacheSet;
use crate::StoreError;

type Callback = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
type Registry = Arc<Mutex<FxHashMap<u64, Callback>>>;

/// Removes its callback from the registry when dropped.
pub struct CallbackGuard {
    id: u64,
    registry: Registry,
}

impl CallbackGuard {
    pub fn unsubscribe(self) {}
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.registry.lock().unwrap().remove(&self.id);
    }
}

pub struct ClusterSwitchOrchestrator {
    client: Arc<dyn DashApi>,
    caches: Arc<ResourceCacheSet>,
    switching: Signal<bool>,
    message: Signal<String>,
    current_context: Signal<String>,
    /// Generic "something changed" counter for consumers with no better
    /// subscription point.
    refresh_trigger: Signal<u64>,
    callbacks: Registry,
    next_callback: AtomicU64,
}

impl ClusterSwitchOrchestrator {
    pub fn new(graph: &Graph, client: Arc<dyn DashApi>, caches: Arc<ResourceCacheSet>) -> Self {
        Self {
            client,
            caches,
            switching: graph.cell(false),
            message: graph.cell(String::new()),
            current_context: graph.cell(String::new()),
            refresh_trigger: graph.cell(0u64),
            callbacks: Arc::new(Mutex::new(FxHashMap::default())),
            next_callback: AtomicU64::new(0),
        }
    }

    pub fn switching(&self) -> bool {
        self.switching.get()
    }

    pub fn message(&self) -> String {
        self.message.get()
    }

    pub fn current_context(&self) -> String {
        self.current_context.get()
    }

    pub fn refresh_trigger(&self) -> u64 {
        self.refresh_trigger.get()
    }

    pub fn refresh_trigger_signal(&self) -> &Signal<u64> {
        &self.refresh_trigger
    }

    /// Register interest in completed switches. Keep the guard alive for as
    /// long as the callback should fire.
    pub fn on_cluster_switch<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_callback.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().insert(id, Box::new(callback));
        CallbackGuard { id, registry: Arc::clone(&self.callbacks) }
    }

    /// Refetch every cache, notify the registry and bump the page-wide
    /// refresh counter.
    pub async fn refresh_all(&self) {
        self.caches.refresh_all().await;
        {
            let callbacks = self.callbacks.lock().unwrap();
            for (id, cb) in callbacks.iter() {
                // One failing callback must not starve the rest.
                if let Err(e) = cb() {
                    warn!(id, error = %e, "cluster switch callback failed");
                }
            }
        }
        self.refresh_trigger.update(|v| v + 1);
    }

    pub async fn switch_context(&self, name: &str) -> Result<(), StoreError> {
        info!(context = %name, "cluster switch requested");
        self.switching.set(true);
        self.message.set(format!("Switching to {name}…"));
        match self.client.switch_context(name).await {
            Ok(()) => {
                self.current_context.set(name.to_string());
                self.message.set(format!("Loading resources from {name}…"));
                self.refresh_all().await;
                self.caches.contexts.refetch().await;
                // Namespace list refresh is best-effort and non-blocking.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let caches = Arc::clone(&self.caches);
                    handle.spawn(async move {
                        if let Err(e) = caches.namespaces.refresh().await {
                            warn!(error = %e, "namespace refresh after switch failed");
                        }
                    });
                }
                self.message.set(format!("Connected to {name}"));
                self.clear_switching_after(Duration::from_secs(1));
                info!(context = %name, "cluster switch complete");
                Ok(())
            }
            Err(e) => {
                warn!(context = %name, error = %e, "cluster switch failed");
                self.message.set(format!("Failed to switch to {name}"));
                self.clear_switching_after(Duration::from_secs(2));
                Err(StoreError::Switch(e))
            }
        }
    }

    fn clear_switching_after(&self, delay: Duration) {
        let switching = self.switching.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    switching.set(false);
                });
            }
            Err(_) => switching.set(false),
        }
    }
}
