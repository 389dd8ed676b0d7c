//! Minimal operator library exercised by this crate's own tests. The real
//! operator catalogue (noise generators, convolutions, color grades) is a
//! collaborator out of scope here (spec.md Non-goals); these four
//! deterministic, pure-function operators are just enough to drive the
//! engines through every code path their tests need: a generator with no
//! image inputs, a tileable halo-dependent filter, a pointwise filter, and
//! an `image_mixing` consumer.

use std::sync::Arc;

use pixelgraph_core::{DataType, Device, GraphResult, ImageBuffer, NodeOutput, Rect};
use pixelgraph_registry::{DirtyPropagator, MonolithicOp, OperatorContext, OperatorRegistration, OperatorRegistry, TiledOp};

use crate::halo;

fn value_noise(seed: i64, x: u32, y: u32) -> f64 {
    let mut h = seed ^ (x as i64).wrapping_mul(374_761_393) ^ (y as i64).wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    h ^= h >> 16;
    (h as u32) as f64 / u32::MAX as f64
}

/// `generator:perlin` — deterministic seeded value noise, one channel.
/// Not an actual Perlin-noise implementation; a pure function of
/// `(seed, x, y)` is all the engines' determinism tests need.
pub struct PerlinGenerator;

impl MonolithicOp for PerlinGenerator {
    fn call(&self, ctx: &OperatorContext, _inputs: &[&NodeOutput]) -> GraphResult<NodeOutput> {
        let width = ctx.parameter_f64("width").unwrap_or(64.0) as u32;
        let height = ctx.parameter_f64("height").unwrap_or(64.0) as u32;
        let seed = ctx.parameter_f64("seed").unwrap_or(0.0) as i64;
        let mut buf = ImageBuffer::new(width, height, 1, DataType::F32, Device::Cpu);
        for y in 0..height {
            for x in 0..width {
                buf.set_f64(x, y, 0, value_noise(seed, x, y));
            }
        }
        Ok(NodeOutput::with_image(buf))
    }
}

fn gaussian_weights(radius: i64) -> Vec<f64> {
    let sigma = (radius as f64 / 2.0).max(0.5);
    let mut weights: Vec<f64> = (-radius..=radius).map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp()).collect();
    let sum: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

fn blur_sample(buf: &ImageBuffer, x: u32, y: u32, c: u32, radius: i64, weights: &[f64]) -> f64 {
    let (w, h) = (buf.width() as i64, buf.height() as i64);
    let mut acc = 0.0;
    for (i, ky) in (-radius..=radius).enumerate() {
        let sy = (y as i64 + ky).clamp(0, h - 1) as u32;
        for (j, kx) in (-radius..=radius).enumerate() {
            let sx = (x as i64 + kx).clamp(0, w - 1) as u32;
            acc += buf.get_f64(sx, sy, c) * weights[i] * weights[j];
        }
    }
    acc
}

fn blur_ksize(ctx: &OperatorContext) -> u32 {
    ctx.parameter_f64("ksize").unwrap_or(5.0) as u32
}

/// `filter:gaussian`, whole-image variant: reads the full input buffer and
/// clamps at its edges (there is no halo to read past the image bounds).
pub struct GaussianBlurMonolithic;

impl MonolithicOp for GaussianBlurMonolithic {
    fn call(&self, ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<NodeOutput> {
        let input = inputs.first().ok_or_else(|| {
            pixelgraph_core::GraphError::MissingDependency(format!("node {} has no image input to blur", ctx.node_id))
        })?;
        let radius = halo::gaussian_halo(blur_ksize(ctx)) as i64;
        let weights = gaussian_weights(radius);
        let src = &input.image_buffer;
        let mut out = ImageBuffer::new(src.width(), src.height(), src.channels(), src.dtype(), src.device());
        for y in 0..src.height() {
            for x in 0..src.width() {
                for c in 0..src.channels() {
                    out.set_f64(x, y, c, blur_sample(src, x, y, c, radius, &weights));
                }
            }
        }
        Ok(NodeOutput::with_image(out))
    }
}

/// `filter:gaussian`, tiled high-precision variant. Reads through the same
/// global-coordinate buffer the monolithic variant does (the input `Tile`
/// wraps the full, un-cropped `ImageBuffer`; only `roi` marks the tile's
/// output footprint), so it produces bit-identical output to the
/// monolithic path for any ROI that covers the whole image.
pub struct GaussianBlurTiledHp;

impl TiledOp for GaussianBlurTiledHp {
    fn call(&self, ctx: &OperatorContext, output: &mut pixelgraph_core::Tile, inputs: &[pixelgraph_core::Tile]) -> GraphResult<()> {
        let input = inputs.first().ok_or_else(|| {
            pixelgraph_core::GraphError::MissingDependency(format!("node {} has no image input to blur", ctx.node_id))
        })?;
        let radius = halo::gaussian_halo(blur_ksize(ctx)) as i64;
        let weights = gaussian_weights(radius);
        let src = input.buffer.as_ref();
        let roi = output.roi;
        let out_buf = Arc::make_mut(&mut output.buffer);
        for y in roi.y..roi.bottom() {
            for x in roi.x..roi.right() {
                for c in 0..src.channels() {
                    let value = blur_sample(src, x, y, c, radius, &weights);
                    out_buf.set_f64(x, y, c, value);
                }
            }
        }
        Ok(())
    }
}

/// The gaussian halo depends on the node's `ksize` parameter, not a static
/// metadata hint, so it registers its own propagator instead of relying on
/// `OperatorMetadata::halo_hint`.
pub struct GaussianHaloPropagator;

impl DirtyPropagator for GaussianHaloPropagator {
    fn propagate(&self, ctx: &OperatorContext, dirty_output: Rect, num_inputs: usize) -> Vec<Rect> {
        let halo = halo::gaussian_halo(blur_ksize(ctx));
        vec![dirty_output.expand(halo); num_inputs]
    }
}

/// `filter:curve_transform` — a pointwise `value^gamma` grade, `gamma`
/// defaulting to 1.0 (identity).
pub struct CurveTransform;

impl MonolithicOp for CurveTransform {
    fn call(&self, ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<NodeOutput> {
        let input = inputs.first().ok_or_else(|| {
            pixelgraph_core::GraphError::MissingDependency(format!("node {} has no image input to grade", ctx.node_id))
        })?;
        let gamma = ctx.parameter_f64("gamma").unwrap_or(1.0);
        let src = &input.image_buffer;
        let mut out = ImageBuffer::new(src.width(), src.height(), src.channels(), src.dtype(), src.device());
        for y in 0..src.height() {
            for x in 0..src.width() {
                for c in 0..src.channels() {
                    let v = src.get_f64(x, y, c).clamp(0.0, 1.0).powf(gamma);
                    out.set_f64(x, y, c, v);
                }
            }
        }
        Ok(NodeOutput::with_image(out))
    }
}

/// `image_mixing:default` — an unweighted average of its (already
/// normalized to the base's shape, by the dispatch layer) image inputs.
pub struct ImageMixingDefault;

impl MonolithicOp for ImageMixingDefault {
    fn call(&self, ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<NodeOutput> {
        let base = inputs.first().ok_or_else(|| {
            pixelgraph_core::GraphError::MissingDependency(format!("node {} has no image inputs to mix", ctx.node_id))
        })?;
        let (w, h) = base.image_buffer.size();
        let c = base.image_buffer.channels();
        let mut out = ImageBuffer::new(w, h, c, base.image_buffer.dtype(), base.image_buffer.device());
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    let sum: f64 = inputs.iter().map(|i| i.image_buffer.get_f64(x, y, ch)).sum();
                    out.set_f64(x, y, ch, sum / inputs.len() as f64);
                }
            }
        }
        Ok(NodeOutput::with_image(out))
    }
}

pub fn register_test_operators(registry: &mut OperatorRegistry) {
    registry.register("generator", "perlin", OperatorRegistration::monolithic(PerlinGenerator));
    registry.register(
        "filter",
        "gaussian",
        OperatorRegistration::monolithic(GaussianBlurMonolithic)
            .with_tiled_high_precision(GaussianBlurTiledHp)
            .with_dirty_propagator(GaussianHaloPropagator),
    );
    registry.register("filter", "curve_transform", OperatorRegistration::monolithic(CurveTransform));
    registry.register("image_mixing", "default", OperatorRegistration::monolithic(ImageMixingDefault));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perlin_is_deterministic_for_a_given_seed() {
        let ctx = OperatorContext {
            node_id: 1,
            name: "n".into(),
            op_type: "generator".into(),
            subtype: "perlin".into(),
            parameters: [
                ("width".to_string(), pixelgraph_core::OutputValue::int(8)),
                ("height".to_string(), pixelgraph_core::OutputValue::int(8)),
                ("seed".to_string(), pixelgraph_core::OutputValue::int(42)),
            ]
            .into_iter()
            .collect(),
        };
        let a = PerlinGenerator.call(&ctx, &[]).unwrap();
        let b = PerlinGenerator.call(&ctx, &[]).unwrap();
        assert_eq!(a.image_buffer.get_f64(3, 5, 0), b.image_buffer.get_f64(3, 5, 0));
    }
}
