//! Integration test for the dirty-ROI concrete scenario (spec.md §8.4):
//! `A(512x512) -> B(blur k=9)`, run `GlobalHighPrecision` once, then
//! `RealTimeUpdate` with a small dirty rectangle, and check the resulting
//! version bookkeeping, ROI coverage, and emitted events.

use std::sync::Arc;

use pixelgraph_compute::testops::register_test_operators;
use pixelgraph_compute::{DirtyRoiCompute, SequentialCompute};
use pixelgraph_core::{CachePrecision, OutputValue, Rect};
use pixelgraph_events::{source, EventService};
use pixelgraph_graph::{GraphModel, ImageInput, Node};
use pixelgraph_registry::{ComputeIntent, OperatorRegistry};

#[test]
fn dirty_roi_update_refreshes_only_the_requested_region_and_tracks_versions() {
    let dir = tempfile::tempdir().unwrap();
    let graph = GraphModel::new(dir.path());
    graph
        .add_node(
            Node::new(1, "source", "generator", "perlin")
                .with_static_parameter("width", OutputValue::int(512))
                .with_static_parameter("height", OutputValue::int(512))
                .with_static_parameter("seed", OutputValue::int(42)),
        )
        .unwrap();
    graph
        .add_node(
            Node::new(2, "blur", "filter", "gaussian")
                .with_image_input(ImageInput::new(1))
                .with_static_parameter("ksize", OutputValue::int(9)),
        )
        .unwrap();

    let mut registry = OperatorRegistry::new();
    register_test_operators(&mut registry);
    let registry = Arc::new(registry);
    let events = Arc::new(EventService::new());

    // Populate node 1's cache directly (the dirty-ROI engine reads
    // ancestors through their freshest already-cached output; it never
    // recomputes them itself).
    let seq = SequentialCompute::new(Arc::clone(&registry), Arc::new(pixelgraph_cache::CacheService::new(pixelgraph_cache::RawRasterCodec)), Arc::clone(&events));
    seq.compute(&graph, 1, CachePrecision::Native, false, false, true).unwrap();
    events.drain();

    let dirty = DirtyRoiCompute::new(Arc::clone(&registry), Arc::clone(&events));

    // "run GlobalHighPrecision once"
    dirty.compute(&graph, ComputeIntent::GlobalHighPrecision, 2, None).unwrap();
    events.drain();

    let dirty_roi = Rect::new(100, 100, 64, 64);
    dirty.compute(&graph, ComputeIntent::RealTimeUpdate, 2, Some(dirty_roi)).unwrap();
    let drained = events.drain();

    let (hp_version, rt_version, hp_roi) = graph.with_node(2, |n| (n.hp_version, n.rt_version, n.hp_roi)).unwrap();
    assert_eq!(rt_version, hp_version, "rt_version must track the hp_version it was derived from");

    let expected_min_hp_roi = dirty_roi.expand(4).align(64).clip_to_size(512, 512);
    assert!(
        hp_roi.unwrap().contains_rect(&expected_min_hp_roi),
        "hp_roi {:?} must cover the dirty roi expanded by the blur's halo and aligned to 64",
        hp_roi
    );

    assert!(drained.iter().any(|e| e.id == 2 && e.source == source::HP_UPDATE));
    assert!(drained.iter().any(|e| e.id == 2 && e.source == source::DOWNSAMPLE));
}
