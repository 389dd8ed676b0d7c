//! # pixelgraph-cache
//!
//! The two-level cache service sitting between the compute engines and
//! disk: a memory hit is just `node.cached_output`; a miss falls through to
//! an injectable [`ImageCodec`] that (de)serializes pixels at a requested
//! [`pixelgraph_core::CachePrecision`].

pub mod codec;
pub mod result;
pub mod service;

pub use codec::{ImageCodec, RawRasterCodec};
pub use result::{CacheSaveResult, DiskSyncResult, DriveClearResult, MemoryClearResult};
pub use service::CacheService;

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_core::{CachePrecision, DataType, Device, ImageBuffer, NodeOutput, OutputValue};
    use pixelgraph_graph::{CacheEntry, GraphModel, Node};

    fn node_with_output(id: i64) -> Node {
        let mut node = Node::new(id, "source", "generator", "constant");
        node.caches.push(CacheEntry {
            cache_type: "image".into(),
            location: "out.raw".into(),
        });
        let mut buf = ImageBuffer::new(2, 2, 1, DataType::F32, Device::Cpu);
        buf.set_f64(0, 0, 0, 0.5);
        let mut output = NodeOutput::with_image(buf);
        output.data.insert("mean".into(), OutputValue::float(0.5));
        node.cached_output = Some(output);
        node
    }

    #[test]
    fn disk_round_trip_at_int16_precision() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphModel::new(dir.path());
        graph.add_node(node_with_output(1)).unwrap();

        let service = CacheService::new(RawRasterCodec);
        service.save_cache_if_configured(&graph, 1, CachePrecision::Int16).unwrap();

        // Drop the memory cache and reload purely from disk.
        graph.with_node_mut(1, |n| n.cached_output = None);
        let loaded = service.try_load_from_disk_cache(&graph, 1).unwrap();
        assert!(loaded);

        let restored = graph.with_node(1, |n| n.cached_output.clone()).unwrap().unwrap();
        assert!((restored.image_buffer.get_f64(0, 0, 0) - 0.5).abs() < 1e-3);
        assert_eq!(restored.data.get("mean").unwrap().as_f64(), Some(0.5));
    }

    #[test]
    fn synchronize_disk_cache_removes_orphaned_directories() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphModel::new(dir.path());
        graph.add_node(node_with_output(1)).unwrap();

        let service = CacheService::new(RawRasterCodec);
        service.synchronize_disk_cache(&graph, CachePrecision::Int8).unwrap();
        assert!(service.node_cache_dir(&graph, 1).join("out.raw").exists());

        // Node 1 now has no memory output (e.g. after a memory clear) but
        // its disk cache directory should be removed as orphaned.
        graph.with_node_mut(1, |n| n.cached_output = None);
        let result = service.synchronize_disk_cache(&graph, CachePrecision::Int8).unwrap();
        assert_eq!(result.removed_files, 1); // just out.raw, no .yml sidecar for this node
        assert!(!service.node_cache_dir(&graph, 1).exists());
    }

    #[test]
    fn free_transient_memory_keeps_ending_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphModel::new(dir.path());
        let source = node_with_output(1);
        graph.add_node(source).unwrap();
        let mut sink = Node::new(2, "sink", "filter", "identity");
        sink.image_inputs.push(pixelgraph_graph::ImageInput::new(1));
        sink.cached_output = Some(NodeOutput::default());
        graph.add_node(sink).unwrap();

        let service = CacheService::new(RawRasterCodec);
        let result = service.free_transient_memory(&graph);
        assert_eq!(result.cleared_nodes, 1);
        assert!(graph.with_node(1, |n| n.cached_output.is_none()).unwrap());
        assert!(graph.with_node(2, |n| n.cached_output.is_some()).unwrap());
    }
}
