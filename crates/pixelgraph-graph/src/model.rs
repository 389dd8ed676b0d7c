//! The [`GraphModel`]: owns every [`Node`] in a graph plus the coarse
//! synchronization and bookkeeping state the compute engines share.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;
use pixelgraph_core::{GraphError, GraphResult};

use crate::node::Node;

/// Owns the node table plus the graph-wide runtime flags. Node mutation
/// goes through the single `nodes` mutex (the spec's `graph_mutex`); a
/// second, independent mutex guards the per-node timing accumulator (the
/// spec's `timing_mutex`) so that compute workers recording elapsed time
/// never contend with callers mutating the node table.
///
/// Nodes are kept in an [`IndexMap`] rather than a `HashMap` so that a
/// graph loaded from YAML and saved back out reproduces the original node
/// order (spec.md §8's YAML round-trip invariant).
pub struct GraphModel {
    pub cache_root: PathBuf,
    nodes: Mutex<IndexMap<i64, Node>>,
    quiet: AtomicBool,
    skip_save_cache: AtomicBool,
    total_io_time_ms_bits: AtomicU64,
    timing: Mutex<IndexMap<i64, f64>>,
}

impl GraphModel {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        GraphModel {
            cache_root: cache_root.into(),
            nodes: Mutex::new(IndexMap::new()),
            quiet: AtomicBool::new(false),
            skip_save_cache: AtomicBool::new(false),
            total_io_time_ms_bits: AtomicU64::new(0.0f64.to_bits()),
            timing: Mutex::new(IndexMap::new()),
        }
    }

    /// Inserts `node`, rejecting a duplicate id or an edge that would make
    /// `node.id` its own ancestor (directly or transitively through a node
    /// that already declares `node.id` as one of its inputs — graphs may
    /// be built with forward references, so this is possible even though
    /// `node.id` is brand new).
    pub fn add_node(&self, node: Node) -> GraphResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&node.id) {
            return Err(GraphError::InvalidParameter(format!("duplicate node id {}", node.id)));
        }
        let mut visited = HashSet::new();
        for input_id in node
            .image_inputs
            .iter()
            .map(|i| i.from_node_id)
            .chain(node.parameter_inputs.iter().map(|p| p.from_node_id))
        {
            visited.clear();
            if is_ancestor_locked(&nodes, node.id, input_id, &mut visited) {
                return Err(GraphError::Cycle(format!(
                    "adding node {} would create a cycle through node {}",
                    node.id, input_id
                )));
            }
        }
        nodes.insert(node.id, node);
        Ok(())
    }

    pub fn has_node(&self, id: i64) -> bool {
        self.nodes.lock().unwrap().contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn get(&self, id: i64) -> Option<Node> {
        self.nodes.lock().unwrap().get(&id).cloned()
    }

    pub fn node_ids(&self) -> Vec<i64> {
        self.nodes.lock().unwrap().keys().copied().collect()
    }

    /// All nodes in insertion order, cloned. Used by YAML export and
    /// traversal; not on the hot path of any compute engine.
    pub fn all_nodes(&self) -> Vec<Node> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    pub fn with_node<R>(&self, id: i64, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.nodes.lock().unwrap().get(&id).map(f)
    }

    pub fn with_node_mut<R>(&self, id: i64, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.nodes.lock().unwrap().get_mut(&id).map(f)
    }

    pub fn clear(&self) {
        self.nodes.lock().unwrap().clear();
        self.timing.lock().unwrap().clear();
        self.total_io_time_ms_bits.store(0.0f64.to_bits(), Ordering::SeqCst);
    }

    /// Cycle pre-check: is `potential_ancestor` reachable by following
    /// `start`'s declared inputs (and their inputs, recursively)? Used by
    /// `add_node` and exposed for the traversal service and tests.
    pub fn is_ancestor(&self, potential_ancestor: i64, start: i64) -> bool {
        let nodes = self.nodes.lock().unwrap();
        let mut visited = HashSet::new();
        is_ancestor_locked(&nodes, potential_ancestor, start, &mut visited)
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    pub fn skip_save_cache(&self) -> bool {
        self.skip_save_cache.load(Ordering::Relaxed)
    }

    pub fn set_skip_save_cache(&self, skip: bool) {
        self.skip_save_cache.store(skip, Ordering::Relaxed);
    }

    /// Accumulates `delta_ms` into the running disk/memory I/O total via a
    /// compare-and-swap loop, since `f64` has no native atomic.
    pub fn add_io_time_ms(&self, delta_ms: f64) {
        let mut current = self.total_io_time_ms_bits.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + delta_ms).to_bits();
            match self
                .total_io_time_ms_bits
                .compare_exchange_weak(current, updated, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn total_io_time_ms(&self) -> f64 {
        f64::from_bits(self.total_io_time_ms_bits.load(Ordering::SeqCst))
    }

    /// Accumulates `elapsed_ms` of compute time for `node_id` (sum, not
    /// wall clock, per spec.md §4.7) into the graph's timing collector.
    pub fn record_timing(&self, node_id: i64, elapsed_ms: f64) {
        let mut timing = self.timing.lock().unwrap();
        *timing.entry(node_id).or_insert(0.0) += elapsed_ms;
    }

    pub fn get_timing(&self) -> IndexMap<i64, f64> {
        self.timing.lock().unwrap().clone()
    }

    pub fn clear_timing(&self) {
        self.timing.lock().unwrap().clear();
    }
}

fn is_ancestor_locked(nodes: &IndexMap<i64, Node>, potential_ancestor: i64, start: i64, visited: &mut HashSet<i64>) -> bool {
    if start == potential_ancestor {
        return true;
    }
    if !visited.insert(start) {
        return false;
    }
    let Some(node) = nodes.get(&start) else {
        return false;
    };
    node.image_inputs
        .iter()
        .map(|i| i.from_node_id)
        .chain(node.parameter_inputs.iter().map(|p| p.from_node_id))
        .any(|parent| is_ancestor_locked(nodes, potential_ancestor, parent, visited))
}
