//! Pixel data type and device tags for [`crate::ImageBuffer`].

use serde::{Deserialize, Serialize};

/// Pixel component storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    F32,
    F64,
}

impl DataType {
    /// Size of one pixel component, in bytes.
    pub const fn size_of(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// The maximum representable value, used by precision conversion during
    /// disk caching (`int8` -> u8 * 255, `int16` -> u16 * 65535).
    pub const fn quantization_max(&self) -> f64 {
        match self {
            DataType::U8 | DataType::I8 => 255.0,
            DataType::U16 | DataType::I16 => 65535.0,
            DataType::F32 | DataType::F64 => 1.0,
        }
    }
}

/// Device a buffer's pixel storage lives on.
///
/// The core never dereferences GPU-resident storage; it passes the opaque
/// `context` handle on [`crate::ImageBuffer`] through to operators untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    GpuMetal,
}

/// Disk-cache pixel precision, as named in `caches:` YAML declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePrecision {
    Int8,
    Int16,
    /// Store the native float precision verbatim (no quantization).
    Native,
}

impl CachePrecision {
    pub fn as_data_type(&self) -> Option<DataType> {
        match self {
            CachePrecision::Int8 => Some(DataType::U8),
            CachePrecision::Int16 => Some(DataType::U16),
            CachePrecision::Native => None,
        }
    }
}
