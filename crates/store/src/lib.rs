//! Deck store — keeps the server-persisted workspace context consistent
//! with the independently-fetched resource caches across connect/disconnect
//! transitions, cluster switches and concurrent namespace changes.
//!
//! Layering, leaf to root: [`ttl::TtlCache`] (connectivity-independent,
//! key-addressed), [`epoch::ConnectionEpochTrigger`] (the refetch key for
//! cluster-wide caches), [`context::WorkspaceContextStore`] (authoritative
//! selection state), [`caches::ResourceCacheSet`] (the fetched values),
//! [`switch::ClusterSwitchOrchestrator`] (context switch sequencing) and
//! [`workspace::Workspace`] (wiring + lifecycle).

#![forbid(unsafe_code)]

pub mod caches;
pub mod context;
pub mod epoch;
pub mod switch;
pub mod ttl;
pub mod workspace;

pub use caches::{ContextsCache, EpochCache, NamespacesCache, ResourceCacheSet, StatusCache};
pub use context::WorkspaceContextStore;
pub use epoch::ConnectionEpochTrigger;
pub use switch::{CallbackGuard, ClusterSwitchOrchestrator};
pub use ttl::TtlCache;
pub use workspace::Workspace;

use deck_client::ClientError;

/// Errors from user-initiated mutations. Read-only fetch failures never
/// surface here; they land in the owning cache's error cell instead.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persist failed: {0}")]
    Persist(#[source] ClientError),
    #[error("cluster switch failed: {0}")]
    Switch(#[source] ClientError),
}
