//! # pixelgraph-core
//!
//! Foundational types for the `pixelgraph` image-processing dataflow engine:
//! the typed [`ImageBuffer`]/[`Tile`] pair, [`NodeOutput`], and the shared
//! [`GraphError`] taxonomy every other crate in the workspace returns.
//!
//! This crate has no knowledge of nodes, graphs, or scheduling — it is the
//! vocabulary the rest of the workspace is built from.

pub mod buffer;
pub mod dtype;
pub mod error;
pub mod output;
pub mod rect;

pub use buffer::{ImageBuffer, Tile};
pub use dtype::{CachePrecision, DataType, Device};
pub use error::{ErrorKind, GraphError, GraphResult};
pub use output::{NodeOutput, OutputValue, ScalarValue};
pub use rect::Rect;
