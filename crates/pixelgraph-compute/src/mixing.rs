//! `image_mixing` input normalization (spec.md §4.7.4): every secondary
//! image input is resized or cropped to the base input's size, then
//! channel-adapted to the base's channel count, before the operator ever
//! sees them. Only `"resize"` and `"crop"` are recognized
//! `merge_strategy` values; anything else is `InvalidParameter`.

use pixelgraph_core::{GraphError, GraphResult, ImageBuffer};

pub fn normalize_secondary(base: &ImageBuffer, secondary: &ImageBuffer, merge_strategy: &str) -> GraphResult<ImageBuffer> {
    let (base_w, base_h) = base.size();
    let resized = match merge_strategy {
        "resize" => resize_nearest(secondary, base_w, base_h),
        "crop" => place_top_left_zero_padded(secondary, base_w, base_h),
        other => {
            return Err(GraphError::InvalidParameter(format!(
                "unsupported image_mixing merge_strategy '{other}'"
            )))
        }
    };
    adapt_channels(&resized, base.channels())
}

/// Nearest-neighbor resample, also used by the dirty-roi engine to upsample
/// a real-time cache entry back to high-precision resolution when it is the
/// freshest output an ancestor has available.
pub(crate) fn resize_nearest(src: &ImageBuffer, target_width: u32, target_height: u32) -> ImageBuffer {
    let mut out = ImageBuffer::new(target_width, target_height, src.channels(), src.dtype(), src.device());
    if target_width == 0 || target_height == 0 || src.is_empty() {
        return out;
    }
    for y in 0..target_height {
        let sy = ((y as u64 * src.height() as u64) / target_height as u64).min(src.height() as u64 - 1) as u32;
        for x in 0..target_width {
            let sx = ((x as u64 * src.width() as u64) / target_width as u64).min(src.width() as u64 - 1) as u32;
            for c in 0..src.channels() {
                out.set_f64(x, y, c, src.get_f64(sx, sy, c));
            }
        }
    }
    out
}

fn place_top_left_zero_padded(src: &ImageBuffer, target_width: u32, target_height: u32) -> ImageBuffer {
    let mut out = ImageBuffer::new(target_width, target_height, src.channels(), src.dtype(), src.device());
    let copy_w = src.width().min(target_width);
    let copy_h = src.height().min(target_height);
    for y in 0..copy_h {
        for x in 0..copy_w {
            for c in 0..src.channels() {
                out.set_f64(x, y, c, src.get_f64(x, y, c));
            }
        }
    }
    out
}

/// Replicates a single channel out to 3/4, converts to luma, or drops/adds
/// a default-opaque alpha channel. Any other conversion is unsupported.
fn adapt_channels(src: &ImageBuffer, target_channels: u32) -> GraphResult<ImageBuffer> {
    let source_channels = src.channels();
    if source_channels == target_channels {
        return Ok(src.clone());
    }
    let (w, h) = src.size();
    let mut out = ImageBuffer::new(w, h, target_channels, src.dtype(), src.device());
    match (source_channels, target_channels) {
        (1, 3) | (1, 4) => {
            for y in 0..h {
                for x in 0..w {
                    let v = src.get_f64(x, y, 0);
                    for c in 0..3 {
                        out.set_f64(x, y, c, v);
                    }
                    if target_channels == 4 {
                        out.set_f64(x, y, 3, src.dtype().quantization_max());
                    }
                }
            }
        }
        (3, 1) | (4, 1) => {
            for y in 0..h {
                for x in 0..w {
                    let r = src.get_f64(x, y, 0);
                    let g = src.get_f64(x, y, 1);
                    let b = src.get_f64(x, y, 2);
                    out.set_f64(x, y, 0, 0.299 * r + 0.587 * g + 0.114 * b);
                }
            }
        }
        (4, 3) => {
            for y in 0..h {
                for x in 0..w {
                    for c in 0..3 {
                        out.set_f64(x, y, c, src.get_f64(x, y, c));
                    }
                }
            }
        }
        (3, 4) => {
            for y in 0..h {
                for x in 0..w {
                    for c in 0..3 {
                        out.set_f64(x, y, c, src.get_f64(x, y, c));
                    }
                    out.set_f64(x, y, 3, src.dtype().quantization_max());
                }
            }
        }
        _ => {
            return Err(GraphError::InvalidParameter(format!(
                "unsupported image_mixing channel conversion {source_channels}->{target_channels}"
            )))
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelgraph_core::{DataType, Device};

    #[test]
    fn resize_reshapes_overlay_to_base_size() {
        let base = ImageBuffer::new(256, 256, 3, DataType::F32, Device::Cpu);
        let mut overlay = ImageBuffer::new(64, 64, 1, DataType::F32, Device::Cpu);
        overlay.set_f64(0, 0, 0, 1.0);
        let normalized = normalize_secondary(&base, &overlay, "resize").unwrap();
        assert_eq!(normalized.size(), base.size());
        assert_eq!(normalized.channels(), base.channels());
    }

    #[test]
    fn crop_zero_pads_and_places_top_left() {
        let base = ImageBuffer::new(256, 256, 3, DataType::F32, Device::Cpu);
        let mut overlay = ImageBuffer::new(64, 64, 1, DataType::F32, Device::Cpu);
        overlay.set_f64(10, 10, 0, 1.0);
        let normalized = normalize_secondary(&base, &overlay, "crop").unwrap();
        assert_eq!(normalized.size(), base.size());
        assert!((normalized.get_f64(10, 10, 0) - 1.0).abs() < 1e-6);
        assert_eq!(normalized.get_f64(200, 200, 0), 0.0);
    }

    #[test]
    fn unknown_merge_strategy_is_invalid_parameter() {
        let base = ImageBuffer::new(4, 4, 3, DataType::F32, Device::Cpu);
        let overlay = ImageBuffer::new(4, 4, 1, DataType::F32, Device::Cpu);
        let err = normalize_secondary(&base, &overlay, "blend").unwrap_err();
        assert_eq!(err.kind(), pixelgraph_core::ErrorKind::InvalidParameter);
    }
}
