//! Dirty-ROI propagation: given a dirty region at an operator's output,
//! compute the corresponding dirty region at each of its image inputs.

use pixelgraph_core::Rect;

use crate::context::OperatorContext;
use crate::metadata::OperatorMetadata;

/// Maps a dirty output ROI back to a per-input ROI. The default
/// implementation (see [`IdentityHaloPropagator`]) is identity-with-halo-
/// expansion; operators whose input footprint is not a simple halo
/// expansion of the output (resize, decimate, warps) register their own.
pub trait DirtyPropagator: Send + Sync {
    /// Returns one ROI per image input, in input order.
    fn propagate(&self, ctx: &OperatorContext, dirty_output: Rect, num_inputs: usize) -> Vec<Rect>;
}

/// Default propagator: every input gets the same ROI as the output, grown
/// by the operator's `halo_hint`.
pub struct IdentityHaloPropagator {
    pub halo: u32,
}

impl DirtyPropagator for IdentityHaloPropagator {
    fn propagate(&self, _ctx: &OperatorContext, dirty_output: Rect, num_inputs: usize) -> Vec<Rect> {
        let expanded = dirty_output.expand(self.halo);
        vec![expanded; num_inputs]
    }
}

/// Builds the default propagator for an operator from its metadata.
pub fn default_propagator(metadata: &OperatorMetadata) -> IdentityHaloPropagator {
    IdentityHaloPropagator { halo: metadata.halo_hint }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OperatorContext {
        OperatorContext {
            node_id: 1,
            name: "n".into(),
            op_type: "t".into(),
            subtype: "s".into(),
            parameters: Default::default(),
        }
    }

    #[test]
    fn identity_propagator_expands_every_input_by_halo() {
        let p = IdentityHaloPropagator { halo: 2 };
        let out = p.propagate(&ctx(), Rect::new(10, 10, 10, 10), 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Rect::new(8, 8, 14, 14));
        assert_eq!(out[1], out[0]);
    }
}
