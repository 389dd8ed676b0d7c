//! # pixelgraph-registry
//!
//! The operator registry and intent-based dispatch contract: a read-mostly
//! map from `"{type}:{subtype}"` to a set of monolithic/tiled variants plus
//! metadata and a dirty-ROI propagator. The actual imaging operators (blur,
//! convolve, noise, ...) are a collaborator — this crate only defines and
//! resolves the contract they implement.

pub mod context;
pub mod dirty;
pub mod metadata;
pub mod registry;

pub use context::OperatorContext;
pub use dirty::{default_propagator, DirtyPropagator, IdentityHaloPropagator};
pub use metadata::{OperatorMetadata, TilePreference};
pub use registry::{ComputeIntent, MonolithicOp, OperatorRegistration, OperatorRegistry, ResolvedOp, TiledOp};
