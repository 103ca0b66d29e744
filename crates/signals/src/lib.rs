//! Observable cells with computed values and effect subscriptions.
//!
//! The graph propagates synchronously inside the triggering `set`: dirty
//! nodes are re-evaluated in rank order (a node only runs after everything
//! it depends on), and unchanged values cut propagation short. That gives
//! consumers a consistent view within one logical update without ever
//! observing a half-propagated state.
//!
//! Dependencies are declared explicitly at construction; there is no
//! auto-tracking. All handles are cheap clones sharing one graph.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Identifies a node another node can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceId(usize);

struct Node {
    rank: usize,
    dependents: Vec<usize>,
    /// Re-evaluation body for computeds/effects; `None` for plain cells.
    /// Returns whether the node's value changed.
    action: Option<Box<dyn FnMut() -> bool + Send>>,
    alive: bool,
}

struct GraphInner {
    nodes: Vec<Node>,
    /// Dirty set ordered by (rank, id) so evaluation is topological.
    dirty: BTreeSet<(usize, usize)>,
    propagating: bool,
    batch_depth: usize,
}

/// Shared reactive graph. Clone handles freely; they all point at the same
/// node table.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<Mutex<GraphInner>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GraphInner {
                nodes: Vec::new(),
                dirty: BTreeSet::new(),
                propagating: false,
                batch_depth: 0,
            })),
        }
    }

    /// Create a writable cell.
    pub fn cell<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        let id = {
            let mut g = self.inner.lock().unwrap();
            g.nodes.push(Node { rank: 0, dependents: Vec::new(), action: None, alive: true });
            g.nodes.len() - 1
        };
        Signal { id, value: Arc::new(Mutex::new(value)), graph: self.clone() }
    }

    /// Create a read-only value derived from `deps`. `f` runs once now and
    /// again whenever any dependency changes.
    pub fn computed<T, F>(&self, deps: &[SourceId], f: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn() -> T + Send + 'static,
    {
        let value = Arc::new(Mutex::new(f()));
        let slot = Arc::clone(&value);
        let action = move || {
            let next = f();
            let mut v = slot.lock().unwrap();
            if *v != next {
                *v = next;
                true
            } else {
                false
            }
        };
        let id = self.register(deps, Box::new(action));
        Computed { id, value, graph: self.clone() }
    }

    /// Register a side-effecting observer of `deps`. Runs once immediately,
    /// then after every change to a dependency. Dropping the returned
    /// subscription (without `detach`) retires the effect.
    pub fn effect<F>(&self, deps: &[SourceId], mut f: F) -> Subscription
    where
        F: FnMut() + Send + 'static,
    {
        let action = move || {
            f();
            false
        };
        let id = self.register(deps, Box::new(action));
        // Initial run goes through the normal machinery so it still happens
        // after any propagation already in flight.
        let run = {
            let mut g = self.inner.lock().unwrap();
            let rank = g.nodes[id].rank;
            g.dirty.insert((rank, id));
            let start = !g.propagating && g.batch_depth == 0;
            if start {
                g.propagating = true;
            }
            start
        };
        if run {
            self.run();
        }
        Subscription { id, graph: self.clone(), detached: false }
    }

    /// Apply several writes as one logical update; propagation runs once at
    /// the end of the outermost batch.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut g = self.inner.lock().unwrap();
            g.batch_depth += 1;
        }
        let out = f();
        let run = {
            let mut g = self.inner.lock().unwrap();
            g.batch_depth -= 1;
            let start =
                g.batch_depth == 0 && !g.propagating && !g.dirty.is_empty();
            if start {
                g.propagating = true;
            }
            start
        };
        if run {
            self.run();
        }
        out
    }

    fn register(&self, deps: &[SourceId], action: Box<dyn FnMut() -> bool + Send>) -> usize {
        let mut g = self.inner.lock().unwrap();
        let rank = deps
            .iter()
            .map(|d| g.nodes[d.0].rank + 1)
            .max()
            .unwrap_or(1);
        g.nodes.push(Node { rank, dependents: Vec::new(), action: Some(action), alive: true });
        let id = g.nodes.len() - 1;
        for d in deps {
            g.nodes[d.0].dependents.push(id);
        }
        id
    }

    fn source_changed(&self, id: usize) {
        let run = {
            let mut g = self.inner.lock().unwrap();
            let deps = g.nodes[id].dependents.clone();
            for d in deps {
                let rank = g.nodes[d].rank;
                g.dirty.insert((rank, d));
            }
            let start = !g.propagating && g.batch_depth == 0 && !g.dirty.is_empty();
            if start {
                g.propagating = true;
            }
            start
        };
        if run {
            self.run();
        }
    }

    /// Drain the dirty set in rank order. The node's action runs with the
    /// graph lock released so it may read cells and perform re-entrant sets;
    /// those are absorbed into this pass.
    fn run(&self) {
        loop {
            let (id, mut action) = {
                let mut g = self.inner.lock().unwrap();
                let next = match g.dirty.iter().next().copied() {
                    Some(entry) => entry,
                    None => {
                        g.propagating = false;
                        return;
                    }
                };
                g.dirty.remove(&next);
                let id = next.1;
                if !g.nodes[id].alive {
                    continue;
                }
                match g.nodes[id].action.take() {
                    Some(a) => (id, a),
                    None => continue,
                }
            };
            let changed = action();
            let mut g = self.inner.lock().unwrap();
            g.nodes[id].action = Some(action);
            if changed {
                let deps = g.nodes[id].dependents.clone();
                for d in deps {
                    let rank = g.nodes[d].rank;
                    g.dirty.insert((rank, d));
                }
            }
        }
    }

    fn retire(&self, id: usize) {
        // Take the action out before dropping it: its captures may own
        // subscriptions whose Drop re-enters this same lock.
        let action = {
            let mut g = self.inner.lock().unwrap();
            g.nodes[id].alive = false;
            g.nodes[id].action.take()
        };
        drop(action);
    }
}

/// Writable observable cell.
pub struct Signal<T> {
    id: usize,
    value: Arc<Mutex<T>>,
    graph: Graph,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, value: Arc::clone(&self.value), graph: self.graph.clone() }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Signal<T> {
    pub fn get(&self) -> T {
        self.value.lock().unwrap().clone()
    }

    /// Write a new value and propagate. Writing an equal value is a no-op.
    pub fn set(&self, next: T) {
        {
            let mut v = self.value.lock().unwrap();
            if *v == next {
                return;
            }
            *v = next;
        }
        self.graph.source_changed(self.id);
    }

    /// Read-modify-write helper.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&*self.value.lock().unwrap());
        self.set(next);
    }

    pub fn id(&self) -> SourceId {
        SourceId(self.id)
    }
}

/// Read-only derived value.
pub struct Computed<T> {
    id: usize,
    value: Arc<Mutex<T>>,
    graph: Graph,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, value: Arc::clone(&self.value), graph: self.graph.clone() }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Computed<T> {
    pub fn get(&self) -> T {
        self.value.lock().unwrap().clone()
    }

    pub fn id(&self) -> SourceId {
        SourceId(self.id)
    }
}

/// Handle keeping an effect alive. Dropping it retires the effect unless
/// `detach` was called.
pub struct Subscription {
    id: usize,
    graph: Graph,
    detached: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.graph.retire(self.id);
        self.detached = true;
    }

    /// Keep the effect alive for the life of the graph.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.graph.retire(self.id);
        }
    }
}
