//! The three compute engines over a [`pixelgraph_graph::GraphModel`]
//! (spec.md §4.7-§4.9): a sequential depth-first reference engine, a
//! node-level work-stealing parallel engine, and a dirty-ROI, intent-based
//! update engine for interactive high-precision/real-time previews. All
//! three funnel a single node's actual pixel computation through the same
//! [`dispatch`] helpers, which is what makes the sequential and parallel
//! engines' outputs bit-identical.

mod dispatch;
mod halo;
mod mixing;
mod shape;

pub mod dirty;
pub mod parallel;
pub mod sequential;

pub mod testops;

pub use dirty::DirtyRoiCompute;
pub use parallel::{ParallelCompute, RayonExecutor, TaskExecutor};
pub use sequential::SequentialCompute;
