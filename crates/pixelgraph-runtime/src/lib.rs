//! Everything a host application needs to drive pixelgraph graphs without
//! touching [`pixelgraph_compute`] or [`pixelgraph_graph`] directly: a
//! hand-rolled worker pool ([`pool`]), a single-graph control-thread runtime
//! ([`runtime`]), and a multi-graph kernel facade ([`kernel`]).

mod kernel;
mod pool;
mod runtime;

pub use kernel::Kernel;
pub use pool::WorkerPool;
pub use runtime::{GraphRuntime, SchedulerEvent};
