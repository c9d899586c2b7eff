//! Process-wide transposition index.
//!
//! Maps position hashes to nodes so that independently reached positions
//! share one evaluation. The index never owns a node: it stores weak
//! handles, and a dead entry is treated as absent and replaced. It also
//! carries the tree-wide allocation counter the search limits consult.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{GameState, SearchSettings};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::node::{ChildIdx, Edges, Node};

pub struct TranspositionIndex<S: GameState> {
    map: Mutex<FxHashMap<u64, Weak<Node<S>>>>,
    node_count: AtomicU64,
}

impl<S: GameState> TranspositionIndex<S> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(FxHashMap::default()),
            node_count: AtomicU64::new(0),
        }
    }

    /// Number of nodes allocated into the tree this index serves.
    pub fn node_count(&self) -> u64 {
        self.node_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Drop all entries, e.g. between games. Live nodes are unaffected.
    pub fn clear(&self) {
        self.map.lock().clear();
        self.node_count.store(0, Ordering::Relaxed);
    }

    /// Allocate a node outside any parent slot (the search root).
    pub fn allocate_root(&self, state: &S, settings: &SearchSettings) -> Arc<Node<S>> {
        self.node_count.fetch_add(1, Ordering::Relaxed);
        Arc::new(Node::from_state(state, settings))
    }

    /// Attach the child of `(parent edges, child_idx)`, either by adopting a
    /// usable transposition hit or by allocating a fresh node.
    ///
    /// Must be called with the parent's edge lock held; the index mutex is
    /// the innermost lock. A mapped node counts as a hit only once its
    /// evaluation is visible, so a position still in flight on another
    /// worker is re-allocated rather than adopted half-built. Terminal
    /// nodes are never registered.
    pub fn add_new_node_to_tree(
        &self,
        edges: &mut Edges<S>,
        new_state: &S,
        child_idx: ChildIdx,
        settings: &SearchSettings,
    ) -> (Arc<Node<S>>, bool) {
        if !settings.use_transposition_table {
            let node = Arc::new(Node::from_state(new_state, settings));
            self.node_count.fetch_add(1, Ordering::Relaxed);
            edges.set_child(child_idx, node.clone());
            return (node, false);
        }

        let hash = new_state.hash_key();
        let mut map = self.map.lock();

        if let Some(existing) = map.get(&hash).and_then(Weak::upgrade) {
            if existing.has_nn_results() && !existing.is_terminal() {
                existing.mark_transposition();
                edges.set_child(child_idx, existing.clone());
                return (existing, true);
            }
        }

        let node = Arc::new(Node::from_state(new_state, settings));
        self.node_count.fetch_add(1, Ordering::Relaxed);
        if !node.is_terminal() {
            match map.entry(hash) {
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    // Keep a live first-writer, replace a dead one.
                    if slot.get().upgrade().is_none() {
                        slot.insert(Arc::downgrade(&node));
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(Arc::downgrade(&node));
                }
            }
        }
        edges.set_child(child_idx, node.clone());
        (node, false)
    }
}

impl<S: GameState> Default for TranspositionIndex<S> {
    fn default() -> Self {
        Self::new()
    }
}
