//! Per-operator metadata recorded alongside its registered variants.

use pixelgraph_core::Device;

/// The tile granularity an operator prefers when tiled — does not change
/// correctness, only scheduling: `Micro` favors the 16px/64px RT/HP tiles,
/// `Macro` favors the 256px HP macro-tile, `Normal` lets the scheduler pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TilePreference {
    Micro,
    #[default]
    Normal,
    Macro,
}

#[derive(Debug, Clone, Copy)]
pub struct OperatorMetadata {
    pub device_preference: Device,
    pub tile_preference: TilePreference,
    /// Halo radius, in pixels, the default dirty-propagator expands each
    /// input ROI by. Operators with a data-dependent halo (e.g. a Gaussian
    /// blur whose radius comes from a `ksize` parameter) register a custom
    /// [`crate::DirtyPropagator`] instead of relying on this constant.
    pub halo_hint: u32,
}

impl Default for OperatorMetadata {
    fn default() -> Self {
        OperatorMetadata {
            device_preference: Device::Cpu,
            tile_preference: TilePreference::Normal,
            halo_hint: 0,
        }
    }
}
