//! Operator-facing view of a node, decoupled from the full graph data model
//! so this crate never depends on `pixelgraph-graph` (the dependency runs
//! the other way: the compute engine builds an `OperatorContext` from its
//! `Node` before dispatching).

use indexmap::IndexMap;
use pixelgraph_core::OutputValue;

/// Everything an operator implementation needs to know about the node it is
/// computing for, minus the graph wiring (edges, cache slots) that belongs
/// to the scheduler, not the operator.
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub node_id: i64,
    pub name: String,
    pub op_type: String,
    pub subtype: String,
    /// Deep-cloned, fully resolved parameters for this run (static
    /// parameters overwritten by any `parameter_inputs`).
    pub parameters: IndexMap<String, OutputValue>,
}

impl OperatorContext {
    pub fn parameter(&self, key: &str) -> Option<&OutputValue> {
        self.parameters.get(key)
    }

    pub fn parameter_f64(&self, key: &str) -> Option<f64> {
        self.parameter(key).and_then(OutputValue::as_f64)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameter(key).and_then(|v| v.as_scalar()).and_then(|s| s.as_str())
    }
}
