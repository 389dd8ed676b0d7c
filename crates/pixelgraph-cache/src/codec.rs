//! The pixel codec boundary: [`CacheService`] never encodes/decodes image
//! formats itself. A real PNG/EXR codec is a collaborator; this crate ships
//! [`RawRasterCodec`], a dependency-free raw-bytes codec sufficient for
//! tests and for embedders with no format requirement.

use pixelgraph_core::{CachePrecision, DataType, GraphError, GraphResult, ImageBuffer};

/// Encodes an [`ImageBuffer`] to a requested disk precision and back.
/// `encode` always normalizes through the source buffer's own
/// [`DataType::quantization_max`] before re-quantizing to the target
/// precision, so the round trip is precision-lossy only by the target's
/// quantization step, never by a sign or range mismatch.
pub trait ImageCodec: Send + Sync {
    fn encode(&self, buffer: &ImageBuffer, precision: CachePrecision) -> GraphResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> GraphResult<ImageBuffer>;
}

const HEADER_LEN: usize = 4 + 4 + 4 + 1;

fn dtype_tag(dtype: DataType) -> u8 {
    match dtype {
        DataType::U8 => 0,
        DataType::I8 => 1,
        DataType::U16 => 2,
        DataType::I16 => 3,
        DataType::F32 => 4,
        DataType::F64 => 5,
    }
}

fn dtype_from_tag(tag: u8) -> GraphResult<DataType> {
    match tag {
        0 => Ok(DataType::U8),
        1 => Ok(DataType::I8),
        2 => Ok(DataType::U16),
        3 => Ok(DataType::I16),
        4 => Ok(DataType::F32),
        5 => Ok(DataType::F64),
        other => Err(GraphError::InvalidParameter(format!("unknown cache dtype tag {other}"))),
    }
}

/// A self-describing raw-bytes image codec: a small fixed header (width,
/// height, channels, dtype tag) followed by one component per pixel at the
/// stored dtype's native width, in row-major order. No compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRasterCodec;

impl ImageCodec for RawRasterCodec {
    fn encode(&self, buffer: &ImageBuffer, precision: CachePrecision) -> GraphResult<Vec<u8>> {
        let target_dtype = precision.as_data_type().unwrap_or(buffer.dtype());
        let mut out = Vec::with_capacity(HEADER_LEN + buffer.width() as usize * buffer.height() as usize * buffer.channels() as usize * target_dtype.size_of());
        out.extend_from_slice(&buffer.width().to_le_bytes());
        out.extend_from_slice(&buffer.height().to_le_bytes());
        out.extend_from_slice(&buffer.channels().to_le_bytes());
        out.push(dtype_tag(target_dtype));

        let source_max = buffer.dtype().quantization_max();
        let target_max = target_dtype.quantization_max();
        for y in 0..buffer.height() {
            for x in 0..buffer.width() {
                for c in 0..buffer.channels() {
                    let normalized = buffer.get_f64(x, y, c) / source_max;
                    let quantized = normalized * target_max;
                    write_component(&mut out, target_dtype, quantized);
                }
            }
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> GraphResult<ImageBuffer> {
        if bytes.len() < HEADER_LEN {
            return Err(GraphError::InvalidParameter("cache file too short for a raster header".into()));
        }
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let channels = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let stored_dtype = dtype_from_tag(bytes[12])?;

        let component_size = stored_dtype.size_of();
        let expected_len = HEADER_LEN + width as usize * height as usize * channels as usize * component_size;
        if bytes.len() < expected_len {
            return Err(GraphError::InvalidParameter("cache file truncated".into()));
        }

        // Stored quantized (int8/int16) precision always reconstructs into a
        // normalized f32 buffer ("read reconstructs via upscaling"); a
        // buffer stored at native precision keeps its own dtype verbatim.
        let reconstructed_dtype = match stored_dtype {
            DataType::U8 | DataType::I8 | DataType::U16 | DataType::I16 => DataType::F32,
            DataType::F32 | DataType::F64 => stored_dtype,
        };
        let mut out = ImageBuffer::new(width, height, channels, reconstructed_dtype, pixelgraph_core::Device::Cpu);
        let stored_max = stored_dtype.quantization_max();
        let mut cursor = HEADER_LEN;
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    let raw = read_component(&bytes[cursor..cursor + component_size], stored_dtype);
                    cursor += component_size;
                    let value = if reconstructed_dtype == stored_dtype {
                        raw
                    } else {
                        raw / stored_max
                    };
                    out.set_f64(x, y, c, value);
                }
            }
        }
        Ok(out)
    }
}

fn write_component(out: &mut Vec<u8>, dtype: DataType, value: f64) {
    match dtype {
        DataType::U8 => out.push(value.round().clamp(0.0, 255.0) as u8),
        DataType::I8 => out.push((value.round().clamp(-128.0, 127.0) as i8) as u8),
        DataType::U16 => out.extend_from_slice(&(value.round().clamp(0.0, 65535.0) as u16).to_le_bytes()),
        DataType::I16 => out.extend_from_slice(&(value.round().clamp(-32768.0, 32767.0) as i16).to_le_bytes()),
        DataType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        DataType::F64 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn read_component(bytes: &[u8], dtype: DataType) -> f64 {
    match dtype {
        DataType::U8 => bytes[0] as f64,
        DataType::I8 => bytes[0] as i8 as f64,
        DataType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        DataType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        DataType::F32 => f32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DataType::F64 => f64::from_le_bytes(bytes.try_into().unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_core::Device;

    #[test]
    fn int16_round_trip_stays_within_one_quantization_step() {
        let mut buf = ImageBuffer::new(2, 2, 1, DataType::F32, Device::Cpu);
        buf.set_f64(0, 0, 0, 0.25);
        buf.set_f64(1, 1, 0, 0.75);

        let codec = RawRasterCodec;
        let bytes = codec.encode(&buf, CachePrecision::Int16).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert!((decoded.get_f64(0, 0, 0) - 0.25).abs() < 1.0 / 65535.0 + 1e-9);
        assert!((decoded.get_f64(1, 1, 0) - 0.75).abs() < 1.0 / 65535.0 + 1e-9);
    }

    #[test]
    fn native_precision_preserves_dtype() {
        let mut buf = ImageBuffer::new(1, 1, 1, DataType::F32, Device::Cpu);
        buf.set_f64(0, 0, 0, 0.42);

        let codec = RawRasterCodec;
        let bytes = codec.encode(&buf, CachePrecision::Native).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.dtype(), DataType::F32);
        assert!((decoded.get_f64(0, 0, 0) - 0.42).abs() < 1e-6);
    }

    #[test]
    fn truncated_bytes_are_rejected_not_panicking() {
        let codec = RawRasterCodec;
        assert!(codec.decode(&[1, 2, 3]).is_err());
    }
}
