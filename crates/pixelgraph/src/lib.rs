//! `pixelgraph`: the workspace's facade crate. Re-exports the public
//! surface of every `pixelgraph-*` library crate so a downstream consumer
//! (a CLI, a TUI, a benchmark harness, an operator library) depends on one
//! crate instead of wiring up the workspace members individually —
//! mirroring how the teacher's `vfx-cli`/`vfx-rs-py` crates sit on top of
//! its library crates rather than reimplementing them.

pub use pixelgraph_cache::{CacheSaveResult, CacheService, DiskSyncResult, DriveClearResult, ImageCodec, MemoryClearResult, RawRasterCodec};
pub use pixelgraph_compute::{testops, DirtyRoiCompute, ParallelCompute, RayonExecutor, SequentialCompute, TaskExecutor};
pub use pixelgraph_core::{
    CachePrecision, DataType, Device, ErrorKind, GraphError, GraphResult, ImageBuffer, NodeOutput, OutputValue, Rect, ScalarValue, Tile,
};
pub use pixelgraph_events::{source, ComputeEvent, EventService};
pub use pixelgraph_graph::{
    ending_nodes, is_ancestor, print_dependency_tree, topo_postorder_from, CacheEntry, GraphModel, ImageInput, Node, OutputPort,
    ParameterInput,
};
pub use pixelgraph_registry::{
    default_propagator, ComputeIntent, DirtyPropagator, IdentityHaloPropagator, MonolithicOp, OperatorContext, OperatorMetadata,
    OperatorRegistration, OperatorRegistry, ResolvedOp, TiledOp, TilePreference,
};
pub use pixelgraph_runtime::{GraphRuntime, Kernel, SchedulerEvent, WorkerPool};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Exercises the facade end to end: build a registry, open a graph
    /// through the `Kernel`, run it, read back the result — using only
    /// names re-exported from this crate.
    #[test]
    fn facade_drives_a_graph_through_the_kernel() {
        let mut registry = OperatorRegistry::new();
        testops::register_test_operators(&mut registry);
        let cache = Arc::new(CacheService::new(RawRasterCodec));
        let kernel = Kernel::new(Arc::new(registry), cache, 2);

        let graph_id = kernel.load_graph(std::path::Path::new(""));
        let runtime = kernel.runtime(graph_id).unwrap();
        runtime
            .graph()
            .add_node(
                Node::new(1, "source", "generator", "perlin")
                    .with_static_parameter("width", OutputValue::int(8))
                    .with_static_parameter("height", OutputValue::int(8))
                    .with_static_parameter("seed", OutputValue::int(3)),
            )
            .unwrap();

        let out = kernel
            .compute_sequential(graph_id, 1, CachePrecision::Native, false, false, true)
            .unwrap();
        assert_eq!(out.image_buffer.size(), (8, 8));
    }
}
