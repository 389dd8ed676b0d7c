//! The node-level work-stealing parallel compute engine (spec.md §4.8):
//! plan once (topological order, dense indices, dependency counters,
//! pre-resolved operator variants so workers never touch the registry),
//! then run with a ready-queue of tasks whose dependents are submitted the
//! instant their last producer finishes. Commits into the live graph are
//! batched under the graph's own per-node locking once every task has
//! settled, mirroring the single-writer discipline of spec.md §5.
//!
//! The actual thread pool is supplied by the caller through
//! [`TaskExecutor`] — this crate only plans task dependencies and first-
//! error accounting; [`pixelgraph-runtime`] owns the worker pool itself, so
//! that the hand-rolled pool lives in exactly one place in the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use indexmap::IndexMap;
use pixelgraph_cache::CacheService;
use pixelgraph_core::{CachePrecision, GraphError, GraphResult, NodeOutput, OutputValue};
use pixelgraph_events::{source, EventService};
use pixelgraph_graph::{topo_postorder_from, GraphModel, ImageInput, ParameterInput};
use pixelgraph_registry::{ComputeIntent, DirtyPropagator, OperatorContext, OperatorRegistry, ResolvedOp};
use tracing::{debug, trace};

use crate::dispatch::dispatch_global;

/// A generic task sink: submit a closure to run on some worker thread at
/// some point. Task-completion accounting lives in [`ParallelCompute`]
/// itself, not here — an executor only needs to run what it's handed.
pub trait TaskExecutor: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// A convenience [`TaskExecutor`] backed by rayon's global thread pool —
/// for callers that don't need `pixelgraph-runtime`'s long-lived,
/// explicitly-sized worker pool and just want something that works.
pub struct RayonExecutor;

impl TaskExecutor for RayonExecutor {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        rayon::spawn(task);
    }
}

struct PlanNode {
    id: i64,
    name: String,
    node_type: String,
    subtype: String,
    image_inputs: Vec<ImageInput>,
    parameter_inputs: Vec<ParameterInput>,
    static_parameters: IndexMap<String, OutputValue>,
    resolved: ResolvedOp,
    propagator: Arc<dyn DirtyPropagator>,
    dependents: Vec<usize>,
    dependency_count: usize,
}

fn build_plan(graph: &GraphModel, registry: &OperatorRegistry, target: i64) -> GraphResult<(Vec<PlanNode>, HashMap<i64, usize>)> {
    let order = topo_postorder_from(graph, target)?;
    let index_of: HashMap<i64, usize> = order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut plan = Vec::with_capacity(order.len());
    for &id in &order {
        let node = graph.get(id).ok_or_else(|| GraphError::NotFound(format!("node {id}")))?;
        let (resolved, propagator, _metadata) =
            registry.resolve_for_compute(&node.node_type, &node.subtype, ComputeIntent::GlobalHighPrecision)?;
        let dependency_count = node
            .image_inputs
            .iter()
            .map(|i| i.from_node_id)
            .chain(node.parameter_inputs.iter().map(|p| p.from_node_id))
            .filter(|pid| index_of.contains_key(pid))
            .count();
        plan.push(PlanNode {
            id,
            name: node.name,
            node_type: node.node_type,
            subtype: node.subtype,
            image_inputs: node.image_inputs,
            parameter_inputs: node.parameter_inputs,
            static_parameters: node.static_parameters,
            resolved,
            propagator,
            dependents: Vec::new(),
            dependency_count,
        });
    }

    for &id in &order {
        let dep_idx = index_of[&id];
        let deps: Vec<i64> = plan[dep_idx]
            .image_inputs
            .iter()
            .map(|i| i.from_node_id)
            .chain(plan[dep_idx].parameter_inputs.iter().map(|p| p.from_node_id))
            .collect();
        for producer_id in deps {
            if let Some(&producer_idx) = index_of.get(&producer_id) {
                plan[producer_idx].dependents.push(dep_idx);
            }
        }
    }

    Ok((plan, index_of))
}

type Settled = (NodeOutput, IndexMap<String, OutputValue>, bool);

struct ParallelRun {
    graph: Arc<GraphModel>,
    cache: Arc<CacheService>,
    events: Arc<EventService>,
    executor: Arc<dyn TaskExecutor>,
    plan: Vec<PlanNode>,
    index_of: HashMap<i64, usize>,
    temp_results: Vec<Mutex<Option<Settled>>>,
    dependency_counters: Vec<AtomicUsize>,
    in_flight: AtomicUsize,
    exception_slot: Mutex<Option<GraphError>>,
    done: (Mutex<bool>, Condvar),
    allow_disk_cache: bool,
    enable_timing: bool,
}

impl ParallelRun {
    fn run_node(self: Arc<Self>, idx: usize) {
        let result = self.compute_one(idx);
        match result {
            Ok(settled) => {
                *self.temp_results[idx].lock().unwrap() = Some(settled);
                self.finish_and_cascade(idx);
            }
            Err(e) => {
                let mut slot = self.exception_slot.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(e);
                }
                drop(slot);
                self.finish_and_cascade(idx);
            }
        }
    }

    fn finish_and_cascade(self: &Arc<Self>, idx: usize) {
        let had_error = self.exception_slot.lock().unwrap().is_some();
        if !had_error {
            for &dep_idx in &self.plan[idx].dependents {
                let remaining = self.dependency_counters[dep_idx].fetch_sub(1, Ordering::AcqRel) - 1;
                if remaining == 0 {
                    self.in_flight.fetch_add(1, Ordering::AcqRel);
                    let this = Arc::clone(self);
                    self.executor.submit(Box::new(move || this.run_node(dep_idx)));
                }
            }
        }
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1 == 0 {
            let (lock, cvar) = &self.done;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
    }

    fn compute_one(&self, idx: usize) -> GraphResult<Settled> {
        let plan_node = &self.plan[idx];
        let node_id = plan_node.id;

        if let Some(out) = self.graph.with_node(node_id, |n| n.cached_output.clone()).flatten() {
            self.events.push(node_id, plan_node.name.clone(), source::MEMORY_CACHE, 0.0);
            return Ok((out, IndexMap::new(), false));
        }
        if self.allow_disk_cache {
            if let Some(out) = self.cache.try_load_from_disk_cache_into(&self.graph, node_id)? {
                self.events.push(node_id, plan_node.name.clone(), source::DISK_CACHE, 0.0);
                return Ok((out, IndexMap::new(), false));
            }
        }

        let start = Instant::now();

        let mut runtime_parameters = plan_node.static_parameters.clone();
        for p_input in &plan_node.parameter_inputs {
            let producer_idx = self.index_of[&p_input.from_node_id];
            let (producer_output, ..) = self.temp_results[producer_idx]
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| GraphError::MissingDependency(format!("node {} not yet computed", p_input.from_node_id)))?;
            let value = producer_output.data.get(&p_input.from_output_name).cloned().ok_or_else(|| {
                GraphError::MissingDependency(format!(
                    "node {} has no output '{}' for parameter '{}'",
                    p_input.from_node_id, p_input.from_output_name, p_input.to_parameter_name
                ))
            })?;
            runtime_parameters.insert(p_input.to_parameter_name.clone(), value);
        }

        let mut image_outputs = Vec::with_capacity(plan_node.image_inputs.len());
        for i_input in &plan_node.image_inputs {
            let producer_idx = self.index_of[&i_input.from_node_id];
            let (producer_output, ..) = self.temp_results[producer_idx]
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| GraphError::MissingDependency(format!("node {} not yet computed", i_input.from_node_id)))?;
            image_outputs.push(producer_output);
        }
        let input_refs: Vec<&NodeOutput> = image_outputs.iter().collect();

        let ctx = OperatorContext {
            node_id,
            name: plan_node.name.clone(),
            op_type: plan_node.node_type.clone(),
            subtype: plan_node.subtype.clone(),
            parameters: runtime_parameters.clone(),
        };
        let output = dispatch_global(&ctx, &plan_node.resolved, plan_node.propagator.as_ref(), &input_refs)?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if self.enable_timing {
            self.graph.record_timing(node_id, elapsed_ms);
        }
        trace!(node_id, elapsed_ms, "computed node on worker pool");
        self.events.push(node_id, plan_node.name.clone(), source::COMPUTED, elapsed_ms);

        Ok((output, runtime_parameters, true))
    }
}

pub struct ParallelCompute {
    registry: Arc<OperatorRegistry>,
    cache: Arc<CacheService>,
    events: Arc<EventService>,
}

impl ParallelCompute {
    pub fn new(registry: Arc<OperatorRegistry>, cache: Arc<CacheService>, events: Arc<EventService>) -> Self {
        ParallelCompute { registry, cache, events }
    }

    /// Computes `node_id` by fanning its unresolved dependency subgraph out
    /// over `executor`. Blocks the calling thread until every submitted
    /// task has drained, then commits settled outputs into the graph under
    /// its own node-table lock and returns `node_id`'s result.
    pub fn compute(
        &self,
        graph: Arc<GraphModel>,
        executor: Arc<dyn TaskExecutor>,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        if force_recache {
            for id in topo_postorder_from(&graph, node_id)? {
                graph.with_node_mut(id, |n| n.clear_caches());
            }
        }

        let (plan, index_of) = build_plan(&graph, &self.registry, node_id)?;
        let plan_len = plan.len();
        let initial_ready: Vec<usize> = (0..plan_len).filter(|&i| plan[i].dependency_count == 0).collect();
        debug!(node_id, plan_len, ready = initial_ready.len(), "parallel compute plan built");

        let dependency_counters = plan.iter().map(|p| AtomicUsize::new(p.dependency_count)).collect();
        let temp_results = (0..plan_len).map(|_| Mutex::new(None)).collect();

        let run = Arc::new(ParallelRun {
            graph: Arc::clone(&graph),
            cache: Arc::clone(&self.cache),
            events: Arc::clone(&self.events),
            executor: Arc::clone(&executor),
            plan,
            index_of,
            temp_results,
            dependency_counters,
            in_flight: AtomicUsize::new(initial_ready.len()),
            exception_slot: Mutex::new(None),
            done: (Mutex::new(false), Condvar::new()),
            allow_disk_cache: !disable_disk_cache,
            enable_timing,
        });

        for idx in initial_ready {
            let this = Arc::clone(&run);
            run.executor.submit(Box::new(move || this.run_node(idx)));
        }

        {
            let (lock, cvar) = &run.done;
            let mut done = lock.lock().unwrap();
            while !*done {
                done = cvar.wait(done).unwrap();
            }
        }

        if let Some(err) = run.exception_slot.lock().unwrap().take() {
            return Err(err);
        }

        for idx in 0..run.plan.len() {
            let Some((output, runtime_parameters, fresh)) = run.temp_results[idx].lock().unwrap().take() else {
                continue;
            };
            if !fresh {
                continue;
            }
            let id = run.plan[idx].id;
            graph.with_node_mut(id, |n| {
                n.runtime_parameters = runtime_parameters;
                n.cached_output = Some(output.clone());
                n.cached_output_high_precision = Some(output.clone());
                n.hp_version += 1;
            });
            self.cache.save_cache_if_configured(&graph, id, precision)?;
        }

        graph
            .with_node(node_id, |n| n.cached_output.clone())
            .flatten()
            .ok_or_else(|| GraphError::Unknown(format!("node {node_id} produced no output")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_cache::RawRasterCodec;
    use pixelgraph_graph::Node;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use std::sync::mpsc;
    use std::thread;

    /// A minimal executor for tests: one thread per submitted task. Not
    /// meant to be efficient, only to exercise cross-thread cascading.
    struct ThreadPerTaskExecutor;

    impl TaskExecutor for ThreadPerTaskExecutor {
        fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) {
            thread::spawn(task);
        }
    }

    /// A synchronous, single-threaded executor: runs the task immediately
    /// on the calling thread via a bounded channel, so tests can assert
    /// determinism without races.
    struct InlineExecutor {
        sender: mpsc::Sender<Box<dyn FnOnce() + Send>>,
    }

    impl InlineExecutor {
        fn spawn() -> Arc<Self> {
            let (sender, receiver) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
            thread::spawn(move || {
                for task in receiver {
                    task();
                }
            });
            Arc::new(InlineExecutor { sender })
        }
    }

    impl TaskExecutor for InlineExecutor {
        fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) {
            let _ = self.sender.send(task);
        }
    }

    fn registry() -> Arc<OperatorRegistry> {
        let mut registry = OperatorRegistry::new();
        crate::testops::register_test_operators(&mut registry);
        Arc::new(registry)
    }

    fn chain_graph(root: &std::path::Path) -> Arc<GraphModel> {
        let graph = Arc::new(GraphModel::new(root));
        graph
            .add_node(
                Node::new(1, "source", "generator", "perlin")
                    .with_static_parameter("width", OutputValue::int(16))
                    .with_static_parameter("height", OutputValue::int(16))
                    .with_static_parameter("seed", OutputValue::int(42)),
            )
            .unwrap();
        graph
            .add_node(
                Node::new(2, "blur", "filter", "gaussian")
                    .with_image_input(ImageInput::new(1))
                    .with_static_parameter("ksize", OutputValue::int(5)),
            )
            .unwrap();
        graph
            .add_node(Node::new(3, "grade", "filter", "curve_transform").with_image_input(ImageInput::new(2)))
            .unwrap();
        graph
    }

    #[test]
    fn parallel_compute_matches_sequential_compute_bit_for_bit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let events = Arc::new(EventService::new());
        let cache = Arc::new(CacheService::new(RawRasterCodec));

        let sequential_graph = chain_graph(dir.path().join("seq").as_path());
        let sequential = crate::sequential::SequentialCompute::new(Arc::clone(&registry), Arc::clone(&cache), Arc::clone(&events));
        let sequential_out = sequential
            .compute(&sequential_graph, 3, CachePrecision::Native, false, false, true)
            .unwrap();

        let parallel_graph = chain_graph(dir.path().join("par").as_path());
        let parallel = ParallelCompute::new(registry, cache, events);
        let executor: Arc<dyn TaskExecutor> = Arc::new(ThreadPerTaskExecutor);
        let parallel_out = parallel
            .compute(parallel_graph, executor, 3, CachePrecision::Native, false, false, true)
            .unwrap();

        pretty_assert_eq!(sequential_out.image_buffer.size(), parallel_out.image_buffer.size());
        let (w, h) = sequential_out.image_buffer.size();
        for y in 0..h {
            for x in 0..w {
                assert_eq!(sequential_out.image_buffer.get_f64(x, y, 0), parallel_out.image_buffer.get_f64(x, y, 0));
            }
        }
    }

    #[test]
    fn commits_every_node_in_the_reachable_subgraph() {
        let dir = tempfile::tempdir().unwrap();
        let graph = chain_graph(dir.path());
        let parallel = ParallelCompute::new(registry(), Arc::new(CacheService::new(RawRasterCodec)), Arc::new(EventService::new()));
        let executor = InlineExecutor::spawn();
        parallel
            .compute(Arc::clone(&graph), executor, 3, CachePrecision::Native, false, false, true)
            .unwrap();

        assert!(graph.with_node(1, |n| n.cached_output.is_some()).unwrap());
        assert!(graph.with_node(2, |n| n.cached_output.is_some()).unwrap());
        assert!(graph.with_node(3, |n| n.cached_output.is_some()).unwrap());
    }
}
