//! The sequential reference compute engine (spec.md §4.7): single-threaded,
//! depth-first, and the correctness baseline every other engine's output is
//! checked against.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use pixelgraph_cache::CacheService;
use pixelgraph_core::{CachePrecision, GraphError, GraphResult, NodeOutput};
use pixelgraph_events::{source, EventService};
use pixelgraph_graph::{topo_postorder_from, GraphModel};
use pixelgraph_registry::{ComputeIntent, OperatorContext, OperatorRegistry};
use tracing::trace;

use crate::dispatch::dispatch_global;

pub struct SequentialCompute {
    registry: Arc<OperatorRegistry>,
    cache: Arc<CacheService>,
    events: Arc<EventService>,
}

impl SequentialCompute {
    pub fn new(registry: Arc<OperatorRegistry>, cache: Arc<CacheService>, events: Arc<EventService>) -> Self {
        SequentialCompute { registry, cache, events }
    }

    /// Computes `node_id`, recursing depth-first into its unresolved
    /// dependencies. `force_recache` clears every reachable node's cached
    /// outputs (legacy output kept on `preserved` nodes) before computing.
    pub fn compute(
        &self,
        graph: &GraphModel,
        node_id: i64,
        precision: CachePrecision,
        force_recache: bool,
        enable_timing: bool,
        disable_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        tracing::debug!(node_id, force_recache, "sequential compute starting");
        if force_recache {
            for id in topo_postorder_from(graph, node_id)? {
                graph.with_node_mut(id, |n| n.clear_caches());
            }
        }
        let mut visiting = HashSet::new();
        self.compute_internal(graph, node_id, precision, &mut visiting, enable_timing, !disable_disk_cache)
    }

    fn compute_internal(
        &self,
        graph: &GraphModel,
        node_id: i64,
        precision: CachePrecision,
        visiting: &mut HashSet<i64>,
        enable_timing: bool,
        allow_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        if let Some(out) = graph.with_node(node_id, |n| n.cached_output.clone()).flatten() {
            let name = graph.with_node(node_id, |n| n.name.clone()).unwrap_or_default();
            self.events.push(node_id, name, source::MEMORY_CACHE, 0.0);
            return Ok(out);
        }
        if allow_disk_cache && self.cache.try_load_from_disk_cache(graph, node_id)? {
            let out = graph
                .with_node(node_id, |n| n.cached_output.clone())
                .flatten()
                .ok_or_else(|| GraphError::Unknown(format!("node {node_id} disk cache load reported success but left no output")))?;
            let name = graph.with_node(node_id, |n| n.name.clone()).unwrap_or_default();
            self.events.push(node_id, name, source::DISK_CACHE, 0.0);
            return Ok(out);
        }

        if !visiting.insert(node_id) {
            return Err(GraphError::Cycle(format!("cycle detected while computing node {node_id}")));
        }

        let result = self.compute_fresh(graph, node_id, precision, visiting, enable_timing, allow_disk_cache);
        visiting.remove(&node_id);
        result
    }

    fn compute_fresh(
        &self,
        graph: &GraphModel,
        node_id: i64,
        precision: CachePrecision,
        visiting: &mut HashSet<i64>,
        enable_timing: bool,
        allow_disk_cache: bool,
    ) -> GraphResult<NodeOutput> {
        let start = Instant::now();

        let (name, node_type, subtype, image_inputs, parameter_inputs, static_parameters) = graph
            .with_node(node_id, |n| {
                (
                    n.name.clone(),
                    n.node_type.clone(),
                    n.subtype.clone(),
                    n.image_inputs.clone(),
                    n.parameter_inputs.clone(),
                    n.static_parameters.clone(),
                )
            })
            .ok_or_else(|| GraphError::NotFound(format!("node {node_id}")))?;

        let mut runtime_parameters: IndexMap<_, _> = static_parameters;
        for p_input in &parameter_inputs {
            let producer = self.compute_internal(graph, p_input.from_node_id, precision, visiting, enable_timing, allow_disk_cache)?;
            let value = producer.data.get(&p_input.from_output_name).cloned().ok_or_else(|| {
                GraphError::MissingDependency(format!(
                    "node {} has no output '{}' for parameter '{}'",
                    p_input.from_node_id, p_input.from_output_name, p_input.to_parameter_name
                ))
            })?;
            runtime_parameters.insert(p_input.to_parameter_name.clone(), value);
        }

        let mut image_outputs = Vec::with_capacity(image_inputs.len());
        for i_input in &image_inputs {
            let producer = self.compute_internal(graph, i_input.from_node_id, precision, visiting, enable_timing, allow_disk_cache)?;
            image_outputs.push(producer);
        }
        let input_refs: Vec<&NodeOutput> = image_outputs.iter().collect();

        let ctx = OperatorContext {
            node_id,
            name: name.clone(),
            op_type: node_type.clone(),
            subtype: subtype.clone(),
            parameters: runtime_parameters.clone(),
        };
        let (resolved, propagator, _metadata) =
            self.registry.resolve_for_compute(&node_type, &subtype, ComputeIntent::GlobalHighPrecision)?;

        let output = dispatch_global(&ctx, &resolved, propagator.as_ref(), &input_refs)?;

        graph.with_node_mut(node_id, |n| {
            n.runtime_parameters = runtime_parameters;
            n.cached_output = Some(output.clone());
            n.cached_output_high_precision = Some(output.clone());
            n.hp_version += 1;
        });

        self.cache.save_cache_if_configured(graph, node_id, precision)?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if enable_timing {
            graph.record_timing(node_id, elapsed_ms);
        }
        trace!(node_id, node_type = %node_type, subtype = %subtype, elapsed_ms, "computed node");
        self.events.push(node_id, name, source::COMPUTED, elapsed_ms);

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_cache::RawRasterCodec;
    use pixelgraph_graph::{ImageInput, Node};

    use crate::testops::register_test_operators;

    fn engine() -> (SequentialCompute, Arc<EventService>) {
        let mut registry = OperatorRegistry::new();
        register_test_operators(&mut registry);
        let events = Arc::new(EventService::new());
        let cache = Arc::new(CacheService::new(RawRasterCodec));
        (SequentialCompute::new(Arc::new(registry), cache, events.clone()), events)
    }

    fn chain_graph(root: &std::path::Path) -> GraphModel {
        let graph = GraphModel::new(root);
        graph
            .add_node(
                Node::new(1, "source", "generator", "perlin")
                    .with_static_parameter("width", pixelgraph_core::OutputValue::int(32))
                    .with_static_parameter("height", pixelgraph_core::OutputValue::int(32))
                    .with_static_parameter("seed", pixelgraph_core::OutputValue::int(42)),
            )
            .unwrap();
        graph
            .add_node(
                Node::new(2, "blur", "filter", "gaussian")
                    .with_image_input(ImageInput::new(1))
                    .with_static_parameter("ksize", pixelgraph_core::OutputValue::int(5)),
            )
            .unwrap();
        graph
            .add_node(Node::new(3, "grade", "filter", "curve_transform").with_image_input(ImageInput::new(2)))
            .unwrap();
        graph
    }

    #[test]
    fn computes_a_three_node_chain_and_reports_computed_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, events) = engine();
        let graph = chain_graph(dir.path());

        let out = engine
            .compute(&graph, 3, CachePrecision::Native, false, true, true)
            .unwrap();
        assert_eq!(out.image_buffer.size(), (32, 32));

        let drained = events.drain();
        assert!(drained.iter().all(|e| e.source == source::COMPUTED));
        assert_eq!(drained.len(), 3);
    }

    #[test]
    fn preserved_source_reports_memory_cache_after_force_recache() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, events) = engine();
        let graph = chain_graph(dir.path());
        graph.with_node_mut(1, |n| n.preserved = true);

        engine.compute(&graph, 3, CachePrecision::Native, false, true, true).unwrap();
        events.drain();

        engine.compute(&graph, 3, CachePrecision::Native, true, true, true).unwrap();
        let drained = events.drain();
        let source_of = |id: i64| drained.iter().find(|e| e.id == id).unwrap().source.clone();
        assert_eq!(source_of(1), source::MEMORY_CACHE);
        assert_eq!(source_of(2), source::COMPUTED);
        assert_eq!(source_of(3), source::COMPUTED);
    }

    #[test]
    fn recomputing_without_force_recache_hits_memory_cache_throughout() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, events) = engine();
        let graph = chain_graph(dir.path());

        engine.compute(&graph, 3, CachePrecision::Native, false, true, true).unwrap();
        events.drain();

        engine.compute(&graph, 3, CachePrecision::Native, false, true, true).unwrap();
        let drained = events.drain();
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|e| e.source == source::MEMORY_CACHE));
    }
}
