//! [`Kernel`]: the multi-graph facade a host application talks to. Mirrors
//! the original implementation's C ABI surface (load a graph, get back an
//! opaque handle, drive it, close it) without committing to any particular
//! FFI boundary — it is plain Rust, `GraphHandle`s are `i64`s, and errors
//! are both returned directly and latched as `last_error` for callers that
//! want a C-style "call, then check the error" pattern.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use pixelgraph_cache::CacheService;
use pixelgraph_core::{CachePrecision, GraphError, GraphResult, NodeOutput, Rect};
use pixelgraph_registry::{ComputeIntent, OperatorRegistry};

use crate::runtime::GraphRuntime;

struct GraphHandle {
    runtime: Arc<GraphRuntime>,
    last_error: Mutex<Option<String>>,
}

/// Owns every live [`GraphRuntime`] the host has opened, keyed by a handle
/// minted on [`Kernel::load_graph`]. One registry and cache service are
/// shared across every graph the kernel opens.
pub struct Kernel {
    registry: Arc<OperatorRegistry>,
    cache: Arc<CacheService>,
    workers_per_graph: usize,
    graphs: Mutex<indexmap::IndexMap<i64, GraphHandle>>,
    next_graph_id: AtomicI64,
}

impl Kernel {
    pub fn new(registry: Arc<OperatorRegistry>, cache: Arc<CacheService>, workers_per_graph: usize) -> Self {
        Kernel {
            registry,
            cache,
            workers_per_graph,
            graphs: Mutex::new(indexmap::IndexMap::new()),
            next_graph_id: AtomicI64::new(1),
        }
    }

    /// Opens a new, empty graph rooted at `cache_root` and returns its
    /// handle. The handle stays valid until [`Kernel::close_graph`].
    pub fn load_graph(&self, cache_root: impl AsRef<Path>) -> i64 {
        let id = self.next_graph_id.fetch_add(1, Ordering::Relaxed);
        let runtime = Arc::new(GraphRuntime::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            cache_root.as_ref().to_path_buf(),
            self.workers_per_graph,
        ));
        self.graphs.lock().unwrap().insert(
            id,
            GraphHandle {
                runtime,
                last_error: Mutex::new(None),
            },
        );
        id
    }

    /// Drops the graph's runtime, tearing down its worker pool and control
    /// thread. Returns an error if `graph_id` is not open.
    pub fn close_graph(&self, graph_id: i64) -> GraphResult<()> {
        self.graphs
            .lock()
            .unwrap()
            .shift_remove(&graph_id)
            .map(|_| ())
            .ok_or_else(|| GraphError::NotFound(format!("graph {graph_id}")))
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.lock().unwrap().len()
    }

    /// The last error recorded for `graph_id` by any wrapper method below,
    /// or `None` if the graph is unopened or its last call succeeded.
    pub fn last_error(&self, graph_id: i64) -> Option<String> {
        self.graphs.lock().unwrap().get(&graph_id).and_then(|h| h.last_error.lock().unwrap().clone())
    }

    fn with_handle<R>(&self, graph_id: i64, f: impl FnOnce(&Arc<GraphRuntime>) -> GraphResult<R>) -> GraphResult<R> {
        let runtime = {
            let graphs = self.graphs.lock().unwrap();
            let handle = graphs.get(&graph_id).ok_or_else(|| GraphError::NotFound(format!("graph {graph_id}")))?;
            Arc::clone(&handle.runtime)
        };
        let result = f(&runtime);
        let mut graphs_for_error = self.graphs.lock().unwrap();
        if let Some(handle) = graphs_for_error.get_mut(&graph_id) {
            *handle.last_error.lock().unwrap() = result.as_ref().err().map(|e| e.to_string());
        }
        result
    }

    pub fn runtime(&self, graph_id: i64) -> GraphResult<Arc<GraphRuntime>> {
        self.graphs
            .lock()
            .unwrap()
            .get(&graph_id)
            .map(|h| Arc::clone(&h.runtime))
            .ok_or_else(|| GraphError::NotFound(format!("graph {graph_id}")))
    }

    pub fn compute_sequential(
        &self,
        graph_id: i64,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        self.with_handle(graph_id, |rt| rt.compute_sequential(node_id, precision, force_recache, enable_timing, disable_disk_cache))
    }

    pub fn compute_parallel(
        &self,
        graph_id: i64,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        self.with_handle(graph_id, |rt| rt.compute_parallel(node_id, precision, force_recache, enable_timing, disable_disk_cache))
    }

    pub fn compute_dirty_roi(&self, graph_id: i64, intent: ComputeIntent, node_id: i64, dirty_roi: Option<Rect>) -> GraphResult<NodeOutput> {
        self.with_handle(graph_id, |rt| rt.compute_dirty_roi(intent, node_id, dirty_roi))
    }

    pub fn wait_for_completion(&self, graph_id: i64) -> GraphResult<()> {
        self.with_handle(graph_id, |rt| {
            rt.wait_for_completion();
            Ok(())
        })
    }

    /// Per-node elapsed compute time recorded while `enable_timing` was set
    /// on a `compute_*` call, keyed by node id.
    pub fn get_timing(&self, graph_id: i64) -> GraphResult<indexmap::IndexMap<i64, f64>> {
        self.with_handle(graph_id, |rt| Ok(rt.graph().get_timing()))
    }

    /// Cumulative time spent loading/saving disk cache entries for this
    /// graph, in milliseconds.
    pub fn get_last_io_time(&self, graph_id: i64) -> GraphResult<f64> {
        self.with_handle(graph_id, |rt| Ok(rt.graph().total_io_time_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_cache::RawRasterCodec;
    use pixelgraph_compute::testops::register_test_operators;
    use pixelgraph_core::OutputValue;
    use pixelgraph_graph::{ImageInput, Node};

    fn kernel() -> Kernel {
        let mut registry = OperatorRegistry::new();
        register_test_operators(&mut registry);
        let cache = Arc::new(CacheService::new(RawRasterCodec));
        Kernel::new(Arc::new(registry), cache, 2)
    }

    fn populate(kernel: &Kernel, graph_id: i64) {
        let runtime = kernel.runtime(graph_id).unwrap();
        let graph = runtime.graph();
        graph
            .add_node(
                Node::new(1, "source", "generator", "perlin")
                    .with_static_parameter("width", OutputValue::int(8))
                    .with_static_parameter("height", OutputValue::int(8))
                    .with_static_parameter("seed", OutputValue::int(1)),
            )
            .unwrap();
        graph
            .add_node(Node::new(2, "grade", "filter", "curve_transform").with_image_input(ImageInput::new(1)))
            .unwrap();
    }

    #[test]
    fn two_graphs_are_independent() {
        let kernel = kernel();
        let a = kernel.load_graph(Path::new(""));
        let b = kernel.load_graph(Path::new(""));
        assert_ne!(a, b);
        assert_eq!(kernel.graph_count(), 2);

        populate(&kernel, a);
        let out = kernel.compute_sequential(a, 2, CachePrecision::Native, false, false, true).unwrap();
        assert_eq!(out.image_buffer.size(), (8, 8));

        assert!(kernel.compute_sequential(b, 2, CachePrecision::Native, false, false, true).is_err());
        assert!(kernel.last_error(b).is_some());
    }

    #[test]
    fn close_graph_invalidates_its_handle() {
        let kernel = kernel();
        let id = kernel.load_graph(Path::new(""));
        populate(&kernel, id);
        kernel.close_graph(id).unwrap();
        assert!(kernel.compute_sequential(id, 2, CachePrecision::Native, false, false, true).is_err());
        assert!(kernel.close_graph(id).is_err());
    }

    #[test]
    fn timing_and_io_time_accumulate_through_the_kernel() {
        let kernel = kernel();
        let id = kernel.load_graph(Path::new(""));
        populate(&kernel, id);
        kernel.compute_sequential(id, 2, CachePrecision::Native, false, true, true).unwrap();

        let timing = kernel.get_timing(id).unwrap();
        assert!(timing.contains_key(&1));
        assert!(timing.contains_key(&2));
        assert_eq!(kernel.get_last_io_time(id).unwrap(), 0.0);
        assert!(kernel.get_timing(999).is_err());
    }

    #[test]
    fn dirty_roi_wrapper_round_trips_through_the_kernel() {
        let kernel = kernel();
        let id = kernel.load_graph(Path::new(""));
        populate(&kernel, id);
        kernel.compute_sequential(id, 2, CachePrecision::Native, false, false, true).unwrap();
        let roi = Rect::new(0, 0, 8, 8);
        let out = kernel.compute_dirty_roi(id, ComputeIntent::RealTimeUpdate, 2, Some(roi)).unwrap();
        assert!(out.image_buffer.size().0 > 0);
        kernel.wait_for_completion(id).unwrap();
    }
}
