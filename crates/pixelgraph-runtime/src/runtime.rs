//! [`GraphRuntime`]: one graph's worker pool plus a control thread that
//! serializes every public entry point onto a single sequence. Callers on
//! any thread can call `compute_sequential`/`compute_parallel`/
//! `compute_dirty_roi`/`wait_for_completion` concurrently; each call is
//! posted onto the control thread and the caller blocks for its result, so
//! two overlapping requests against the same graph are never interleaved
//! against each other at the `GraphRuntime` level (the parallel engine's own
//! worker-pool fan-out still runs concurrently underneath a single posted
//! call).

use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use pixelgraph_cache::CacheService;
use pixelgraph_compute::{DirtyRoiCompute, ParallelCompute, SequentialCompute, TaskExecutor};
use pixelgraph_core::{CachePrecision, GraphResult, NodeOutput, Rect};
use pixelgraph_events::EventService;
use pixelgraph_graph::GraphModel;
use pixelgraph_registry::{ComputeIntent, OperatorRegistry};
use tracing::debug;

use crate::pool::WorkerPool;

type ControlTask = Box<dyn FnOnce() + Send + 'static>;

/// A single background thread draining posted closures in submission
/// order — the "control thread" every `GraphRuntime` entry point is
/// serialized onto.
struct ControlThread {
    sender: Sender<ControlTask>,
}

impl ControlThread {
    fn spawn() -> Self {
        let (sender, receiver) = channel::<ControlTask>();
        thread::spawn(move || {
            for task in receiver {
                task();
            }
        });
        ControlThread { sender }
    }

    fn post_and_wait<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = channel();
        let _ = self.sender.send(Box::new(move || {
            let _ = tx.send(f());
        }));
        rx.recv().expect("control thread dropped its result channel")
    }
}

/// One entry in [`GraphRuntime::scheduler_log`]: which entry point ran,
/// against which node, and whether it succeeded. Diagnostic only — not
/// consulted by any compute path.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerEvent {
    pub operation: &'static str,
    pub node_id: i64,
    pub succeeded: bool,
}

/// Owns one graph's live state: the [`GraphModel`] itself, the worker pool
/// backing its parallel engine, and the three compute engines from
/// [`pixelgraph_compute`].
pub struct GraphRuntime {
    graph: Arc<GraphModel>,
    events: Arc<EventService>,
    pool: Arc<WorkerPool>,
    control: ControlThread,
    sequential: Arc<SequentialCompute>,
    parallel: Arc<ParallelCompute>,
    dirty: Arc<DirtyRoiCompute>,
    scheduler_log: Mutex<Vec<SchedulerEvent>>,
}

impl GraphRuntime {
    pub fn new(registry: Arc<OperatorRegistry>, cache: Arc<CacheService>, cache_root: impl Into<PathBuf>, num_workers: usize) -> Self {
        let graph = Arc::new(GraphModel::new(cache_root));
        let events = Arc::new(EventService::new());
        GraphRuntime {
            graph,
            events: Arc::clone(&events),
            pool: Arc::new(WorkerPool::new(num_workers)),
            control: ControlThread::spawn(),
            sequential: Arc::new(SequentialCompute::new(Arc::clone(&registry), Arc::clone(&cache), Arc::clone(&events))),
            parallel: Arc::new(ParallelCompute::new(Arc::clone(&registry), Arc::clone(&cache), Arc::clone(&events))),
            dirty: Arc::new(DirtyRoiCompute::new(registry, events)),
            scheduler_log: Mutex::new(Vec::new()),
        }
    }

    pub fn graph(&self) -> Arc<GraphModel> {
        Arc::clone(&self.graph)
    }

    pub fn events(&self) -> Arc<EventService> {
        Arc::clone(&self.events)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn scheduler_log(&self) -> Vec<SchedulerEvent> {
        self.scheduler_log.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, node_id: i64, result: &GraphResult<NodeOutput>) {
        debug!(operation, node_id, succeeded = result.is_ok(), "runtime entry point finished");
        self.scheduler_log.lock().unwrap().push(SchedulerEvent {
            operation,
            node_id,
            succeeded: result.is_ok(),
        });
    }

    /// The single-threaded reference engine, serialized onto the control
    /// thread like every other entry point.
    pub fn compute_sequential(
        &self,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        let graph = Arc::clone(&self.graph);
        let engine = Arc::clone(&self.sequential);
        let result = self
            .control
            .post_and_wait(move || engine.compute(&graph, node_id, precision, force_recache, enable_timing, disable_disk_cache));
        self.record("compute_sequential", node_id, &result);
        result
    }

    /// Fans the node's dependency subgraph out over this runtime's worker
    /// pool. The posted closure itself just blocks waiting for the pool to
    /// drain, so concurrent `compute_parallel` calls against the same graph
    /// still queue one-at-a-time at the control thread, but the pool's
    /// worker threads are shared and do the actual parallel work.
    pub fn compute_parallel(
        &self,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        let graph = Arc::clone(&self.graph);
        let engine = Arc::clone(&self.parallel);
        let executor: Arc<dyn TaskExecutor> = Arc::clone(&self.pool) as Arc<dyn TaskExecutor>;
        let result = self.control.post_and_wait(move || {
            engine.compute(graph, executor, node_id, precision, force_recache, enable_timing, disable_disk_cache)
        });
        self.record("compute_parallel", node_id, &result);
        result
    }

    /// The dirty-ROI planner's single entry point (spec.md §4.9): refreshes
    /// `node_id`'s high-precision buffer over `dirty_roi` (the whole buffer
    /// if `None` and `intent` is [`ComputeIntent::GlobalHighPrecision`]) and,
    /// for [`ComputeIntent::RealTimeUpdate`], returns the downsampled
    /// real-time result.
    pub fn compute_dirty_roi(&self, intent: ComputeIntent, node_id: i64, dirty_roi: Option<Rect>) -> GraphResult<NodeOutput> {
        let graph = Arc::clone(&self.graph);
        let engine = Arc::clone(&self.dirty);
        let result = self.control.post_and_wait(move || engine.compute(&graph, intent, node_id, dirty_roi));
        self.record("compute_dirty_roi", node_id, &result);
        result
    }

    /// Blocks until every previously posted entry point has finished: posts
    /// a no-op and waits for it, which can only run after everything ahead
    /// of it in the control thread's queue has already run.
    pub fn wait_for_completion(&self) {
        self.control.post_and_wait(|| ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_cache::RawRasterCodec;
    use pixelgraph_compute::testops::register_test_operators;
    use pixelgraph_core::OutputValue;
    use pixelgraph_graph::{ImageInput, Node};

    fn runtime(root: &std::path::Path) -> GraphRuntime {
        let mut registry = OperatorRegistry::new();
        register_test_operators(&mut registry);
        let cache = Arc::new(CacheService::new(RawRasterCodec));
        GraphRuntime::new(Arc::new(registry), cache, root, 2)
    }

    fn populate_chain(graph: &GraphModel) {
        graph
            .add_node(
                Node::new(1, "source", "generator", "perlin")
                    .with_static_parameter("width", OutputValue::int(16))
                    .with_static_parameter("height", OutputValue::int(16))
                    .with_static_parameter("seed", OutputValue::int(7)),
            )
            .unwrap();
        graph
            .add_node(
                Node::new(2, "blur", "filter", "gaussian")
                    .with_image_input(ImageInput::new(1))
                    .with_static_parameter("ksize", OutputValue::int(5)),
            )
            .unwrap();
    }

    #[test]
    fn sequential_and_parallel_entry_points_agree_and_log_scheduler_events() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        populate_chain(&rt.graph());

        let seq = rt.compute_sequential(2, CachePrecision::Native, false, true, true).unwrap();
        rt.graph().with_node_mut(1, |n| n.clear_caches());
        rt.graph().with_node_mut(2, |n| n.clear_caches());
        let par = rt.compute_parallel(2, CachePrecision::Native, false, true, true).unwrap();

        assert_eq!(seq.image_buffer.size(), par.image_buffer.size());
        let log = rt.scheduler_log();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.succeeded));
    }

    #[test]
    fn dirty_roi_entry_point_tracks_hp_version_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        populate_chain(&rt.graph());
        rt.compute_sequential(2, CachePrecision::Native, false, false, true).unwrap();

        let roi = Rect::new(0, 0, 16, 16);
        rt.compute_dirty_roi(ComputeIntent::RealTimeUpdate, 2, Some(roi)).unwrap();
        let (hp_version, rt_version) = rt.graph().with_node(2, |n| (n.hp_version, n.rt_version)).unwrap();
        assert!(hp_version >= 2);
        assert_eq!(rt_version, hp_version);
    }

    #[test]
    fn wait_for_completion_only_returns_after_prior_calls_finish() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        populate_chain(&rt.graph());
        rt.compute_sequential(2, CachePrecision::Native, false, false, true).unwrap();
        rt.wait_for_completion();
        assert!(rt.graph().with_node(2, |n| n.cached_output.is_some()).unwrap());
    }
}
