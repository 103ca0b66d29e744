//! Refetch trigger for the cluster-wide caches, derived from connectivity
//! and the context version counter.
//!
//! Invariants: the version is 0 exactly while disconnected; the first
//! connection after a disconnect arms it to 1 even when no context mutation
//! happened; disconnecting resets it so the trigger string is guaranteed to
//! change twice across a disconnect/reconnect cycle (the `disconnected`
//! sentinel sits in between).

use deck_signals::{Computed, Graph, Signal, Subscription};

pub struct ConnectionEpochTrigger {
    fetch_key: Computed<String>,
    /// `Some(fetch_key)` while connected, `None` while suspended.
    gate: Computed<Option<String>>,
    _arm: Subscription,
}

impl ConnectionEpochTrigger {
    pub fn new(graph: &Graph, connected: Signal<bool>, version: Signal<u64>) -> Self {
        let fetch_key = {
            let (c, v) = (connected.clone(), version.clone());
            graph.computed(&[connected.id(), version.id()], move || {
                if c.get() {
                    format!("connected-{}", v.get())
                } else {
                    "disconnected".to_string()
                }
            })
        };
        let gate = {
            let (c, k) = (connected.clone(), fetch_key.clone());
            graph.computed(&[connected.id(), fetch_key.id()], move || {
                c.get().then(|| k.get())
            })
        };
        // Arming runs at the same rank as the key derivation, so the gate
        // (one rank up) only ever sees the settled version: caches observe a
        // single transition per connect.
        let arm = {
            let (c, v) = (connected.clone(), version.clone());
            graph.effect(&[connected.id(), version.id()], move || {
                let connected = c.get();
                let version = v.get();
                if connected && version == 0 {
                    v.set(1);
                } else if !connected && version > 0 {
                    v.set(0);
                }
            })
        };
        Self { fetch_key, gate, _arm: arm }
    }

    pub fn fetch_key(&self) -> String {
        self.fetch_key.get()
    }

    pub fn gate(&self) -> &Computed<Option<String>> {
        &self.gate
    }
}
