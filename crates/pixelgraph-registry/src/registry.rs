//! The operator registry: `"{type}:{subtype}" -> {monolithic, tiled_hp,
//! tiled_rt, metadata, dirty_propagator}`, with intent-based resolution.

use std::collections::HashMap;
use std::sync::Arc;

use pixelgraph_core::{GraphError, GraphResult, NodeOutput, Tile};

use crate::context::OperatorContext;
use crate::dirty::{default_propagator, DirtyPropagator};
use crate::metadata::OperatorMetadata;

/// Full-image operator: receives every resolved input at once and produces
/// the complete output in one call. Used for operations that cannot be
/// meaningfully tiled (global analysis, generators with global state).
pub trait MonolithicOp: Send + Sync {
    fn call(&self, ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<NodeOutput>;
}

/// Tiled operator: receives one output tile and the corresponding input
/// tiles (including halo) and fills the output tile in place. Registered
/// separately for the high-precision and real-time paths since an operator
/// may implement a cheaper approximation for the latter.
pub trait TiledOp: Send + Sync {
    fn call(&self, ctx: &OperatorContext, output: &mut Tile, inputs: &[Tile]) -> GraphResult<()>;
}

/// The intent a compute request is made under — resolves to a different
/// preferred operator variant (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeIntent {
    /// Full recompute, or a planned high-precision ROI update.
    GlobalHighPrecision,
    /// A coarse, low-latency update driven by a dirty ROI.
    RealTimeUpdate,
}

/// Which registered variant a [`ComputeIntent`] resolved to.
#[derive(Clone)]
pub enum ResolvedOp {
    Monolithic(Arc<dyn MonolithicOp>),
    TiledHighPrecision(Arc<dyn TiledOp>),
    TiledRealTime(Arc<dyn TiledOp>),
}

impl ResolvedOp {
    pub fn is_tiled(&self) -> bool {
        !matches!(self, ResolvedOp::Monolithic(_))
    }
}

/// Everything registered under one `"{type}:{subtype}"` key.
#[derive(Clone)]
pub struct OperatorRegistration {
    pub monolithic: Option<Arc<dyn MonolithicOp>>,
    pub tiled_hp: Option<Arc<dyn TiledOp>>,
    pub tiled_rt: Option<Arc<dyn TiledOp>>,
    pub metadata: OperatorMetadata,
    pub dirty_propagator: Option<Arc<dyn DirtyPropagator>>,
}

impl OperatorRegistration {
    /// Builds a registration with just a monolithic variant and default
    /// metadata/propagator — the common case for simple, whole-image ops.
    pub fn monolithic(op: impl MonolithicOp + 'static) -> Self {
        OperatorRegistration {
            monolithic: Some(Arc::new(op)),
            tiled_hp: None,
            tiled_rt: None,
            metadata: OperatorMetadata::default(),
            dirty_propagator: None,
        }
    }

    /// Builds a registration with a high-precision tiled variant (and
    /// optionally a cheaper real-time one) plus the given metadata.
    pub fn tiled(hp: impl TiledOp + 'static, metadata: OperatorMetadata) -> Self {
        OperatorRegistration {
            monolithic: None,
            tiled_hp: Some(Arc::new(hp)),
            tiled_rt: None,
            metadata,
            dirty_propagator: None,
        }
    }

    pub fn with_real_time(mut self, rt: impl TiledOp + 'static) -> Self {
        self.tiled_rt = Some(Arc::new(rt));
        self
    }

    /// Adds a high-precision tiled variant alongside a monolithic one — used
    /// by operators the dirty-ROI planner must be able to tile (it only
    /// ever dispatches tiled variants) while still preferring the
    /// monolithic path under `GlobalHighPrecision` whole-graph computes.
    pub fn with_tiled_high_precision(mut self, hp: impl TiledOp + 'static) -> Self {
        self.tiled_hp = Some(Arc::new(hp));
        self
    }

    pub fn with_dirty_propagator(mut self, propagator: impl DirtyPropagator + 'static) -> Self {
        self.dirty_propagator = Some(Arc::new(propagator));
        self
    }

    /// Resolves the dirty-propagator to use: the operator's own if
    /// registered, else the identity-with-halo default built from its
    /// metadata.
    pub fn propagator(&self) -> Arc<dyn DirtyPropagator> {
        match &self.dirty_propagator {
            Some(p) => p.clone(),
            None => Arc::new(default_propagator(&self.metadata)),
        }
    }

    fn resolve(&self, intent: ComputeIntent) -> Option<ResolvedOp> {
        match intent {
            ComputeIntent::GlobalHighPrecision => self
                .monolithic
                .clone()
                .map(ResolvedOp::Monolithic)
                .or_else(|| self.tiled_hp.clone().map(ResolvedOp::TiledHighPrecision)),
            ComputeIntent::RealTimeUpdate => self
                .tiled_rt
                .clone()
                .map(ResolvedOp::TiledRealTime)
                .or_else(|| self.tiled_hp.clone().map(ResolvedOp::TiledHighPrecision))
                .or_else(|| self.monolithic.clone().map(ResolvedOp::Monolithic)),
        }
    }
}

fn make_key(op_type: &str, subtype: &str) -> String {
    format!("{op_type}:{subtype}")
}

/// Read-mostly map of registered operators, built at startup (and at
/// explicit plugin-load time, serialized with all compute — plugin loading
/// itself is a collaborator, out of scope here).
#[derive(Default, Clone)]
pub struct OperatorRegistry {
    table: HashMap<String, OperatorRegistration>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry { table: HashMap::new() }
    }

    pub fn register(&mut self, op_type: &str, subtype: &str, registration: OperatorRegistration) {
        self.table.insert(make_key(op_type, subtype), registration);
    }

    pub fn find(&self, op_type: &str, subtype: &str) -> Option<&OperatorRegistration> {
        self.table.get(&make_key(op_type, subtype))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.table.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolves the best operator variant for `(op_type, subtype)` under
    /// `intent`. Returns [`GraphError::NoOperation`] if no variant exists,
    /// either because the key isn't registered or because the registered
    /// variants don't satisfy the intent's preference chain.
    pub fn resolve(&self, op_type: &str, subtype: &str, intent: ComputeIntent) -> GraphResult<ResolvedOp> {
        let key = make_key(op_type, subtype);
        let registration = self
            .table
            .get(&key)
            .ok_or_else(|| GraphError::NoOperation(format!("no operator registered for '{key}'")))?;
        registration
            .resolve(intent)
            .ok_or_else(|| GraphError::NoOperation(format!("no variant of '{key}' satisfies {intent:?}")))
    }

    /// Like [`Self::resolve`] but also hands back the registration's
    /// dirty-propagator and metadata — the compute engines need these to
    /// tile a resolved operator, not just call it.
    pub fn resolve_for_compute(
        &self,
        op_type: &str,
        subtype: &str,
        intent: ComputeIntent,
    ) -> GraphResult<(ResolvedOp, Arc<dyn DirtyPropagator>, OperatorMetadata)> {
        let key = make_key(op_type, subtype);
        let registration = self
            .table
            .get(&key)
            .ok_or_else(|| GraphError::NoOperation(format!("no operator registered for '{key}'")))?;
        let resolved = registration
            .resolve(intent)
            .ok_or_else(|| GraphError::NoOperation(format!("no variant of '{key}' satisfies {intent:?}")))?;
        Ok((resolved, registration.propagator(), registration.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_core::Tile;

    struct Passthrough;
    impl MonolithicOp for Passthrough {
        fn call(&self, _ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<NodeOutput> {
            Ok(inputs.first().map(|i| (*i).clone()).unwrap_or_default())
        }
    }

    struct NoopTiled;
    impl TiledOp for NoopTiled {
        fn call(&self, _ctx: &OperatorContext, _output: &mut Tile, _inputs: &[Tile]) -> GraphResult<()> {
            Ok(())
        }
    }

    #[test]
    fn global_high_precision_prefers_monolithic() {
        let mut reg = OperatorRegistry::new();
        reg.register(
            "generator",
            "perlin",
            OperatorRegistration::monolithic(Passthrough).with_real_time(NoopTiled),
        );
        let resolved = reg
            .resolve("generator", "perlin", ComputeIntent::GlobalHighPrecision)
            .unwrap();
        assert!(matches!(resolved, ResolvedOp::Monolithic(_)));
    }

    #[test]
    fn real_time_prefers_tiled_rt_then_falls_back() {
        let mut reg = OperatorRegistry::new();
        reg.register("blur", "gaussian", OperatorRegistration::monolithic(Passthrough));
        let resolved = reg
            .resolve("blur", "gaussian", ComputeIntent::RealTimeUpdate)
            .unwrap();
        assert!(matches!(resolved, ResolvedOp::Monolithic(_)));
    }

    #[test]
    fn unregistered_key_is_no_operation() {
        let reg = OperatorRegistry::new();
        let err = reg.resolve("missing", "op", ComputeIntent::GlobalHighPrecision).unwrap_err();
        assert_eq!(err.kind(), pixelgraph_core::ErrorKind::NoOperation);
    }

    #[test]
    fn tiled_only_under_global_intent_with_no_monolithic() {
        let mut reg = OperatorRegistry::new();
        reg.register(
            "filter",
            "sharpen",
            OperatorRegistration::tiled(NoopTiled, OperatorMetadata::default()),
        );
        let resolved = reg
            .resolve("filter", "sharpen", ComputeIntent::GlobalHighPrecision)
            .unwrap();
        assert!(matches!(resolved, ResolvedOp::TiledHighPrecision(_)));
    }
}
