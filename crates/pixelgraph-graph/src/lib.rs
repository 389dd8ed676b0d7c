//! # pixelgraph-graph
//!
//! The graph data model: [`Node`] identity/edges/parameters/outputs/cache
//! entries, [`GraphModel`] (node ownership plus the graph-wide mutexes and
//! counters), the post-order traversal service, and graph YAML I/O.

pub mod model;
pub mod node;
pub mod traversal;
pub mod yaml;

pub use model::GraphModel;
pub use node::{CacheEntry, ImageInput, Node, OutputPort, ParameterInput};
pub use traversal::{ending_nodes, is_ancestor, print_dependency_tree, topo_postorder_from};
