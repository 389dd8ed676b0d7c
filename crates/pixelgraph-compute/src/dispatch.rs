//! Shared single-node dispatch: `image_mixing` input normalization, then a
//! monolithic call or a whole-image tiled sweep, depending on which variant
//! the registry resolved. Used by both the sequential and parallel
//! engines; the dirty-ROI planner drives [`run_tiled`] directly with its
//! own planned ROIs instead of a uniform tiling of the whole image.

use std::sync::Arc;

use pixelgraph_core::{GraphError, GraphResult, ImageBuffer, NodeOutput, Rect, Tile};
use pixelgraph_registry::{DirtyPropagator, OperatorContext, ResolvedOp, TiledOp};

use crate::mixing;
use crate::shape;

/// Tile edge used when a tiled operator is dispatched over the whole
/// output image rather than a planned dirty ROI (spec.md's HP micro-tile).
pub const WHOLE_IMAGE_TILE: u32 = 64;

pub fn dispatch_global(
    ctx: &OperatorContext,
    resolved: &ResolvedOp,
    propagator: &dyn DirtyPropagator,
    inputs: &[&NodeOutput],
) -> GraphResult<NodeOutput> {
    let normalized = normalize_mixing_inputs(ctx, inputs)?;
    let refs: Vec<&NodeOutput> = normalized.iter().collect();
    match resolved {
        ResolvedOp::Monolithic(op) => op
            .call(ctx, &refs)
            .map_err(|e| GraphError::compute(ctx.node_id, ctx.name.clone(), e.to_string())),
        ResolvedOp::TiledHighPrecision(op) | ResolvedOp::TiledRealTime(op) => {
            dispatch_tiled_whole_image(ctx, op.as_ref(), propagator, &refs)
        }
    }
}

/// `image_mixing` (spec.md §4.7.4): the first image input is the base: the
/// rest are resized/cropped to its size and channel-adapted before the
/// operator sees them. Any other operator type, or fewer than two image
/// inputs, passes inputs through untouched.
fn normalize_mixing_inputs(ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<Vec<NodeOutput>> {
    if ctx.op_type != "image_mixing" || inputs.len() < 2 {
        return Ok(inputs.iter().map(|i| (*i).clone()).collect());
    }
    let merge_strategy = ctx.parameter_str("merge_strategy").unwrap_or("resize");
    let base = inputs[0];
    let mut out = Vec::with_capacity(inputs.len());
    out.push(base.clone());
    for secondary in &inputs[1..] {
        let buffer = mixing::normalize_secondary(&base.image_buffer, &secondary.image_buffer, merge_strategy)?;
        out.push(NodeOutput {
            image_buffer: buffer,
            data: secondary.data.clone(),
        });
    }
    Ok(out)
}

fn dispatch_tiled_whole_image(
    ctx: &OperatorContext,
    op: &dyn TiledOp,
    propagator: &dyn DirtyPropagator,
    inputs: &[&NodeOutput],
) -> GraphResult<NodeOutput> {
    let out_shape = shape::infer_output_shape(ctx, inputs)?;
    let output_buf = ImageBuffer::new(out_shape.width, out_shape.height, out_shape.channels, out_shape.dtype, out_shape.device);
    let output_rect = output_buf.bounds();
    let input_buffers: Vec<Arc<ImageBuffer>> = inputs.iter().map(|i| Arc::new(i.image_buffer.clone())).collect();
    let filled = run_tiled(ctx, op, propagator, &input_buffers, output_buf, output_rect.tiles(WHOLE_IMAGE_TILE))
        .map_err(|e| GraphError::compute(ctx.node_id, ctx.name.clone(), e.to_string()))?;
    Ok(NodeOutput::with_image(filled))
}

/// Runs `op` over every ROI in `tile_rois`, resolving each tile's per-input
/// ROIs through `propagator`. `output_buf` is re-wrapped in a fresh `Arc`
/// each iteration so it always has a unique strong count going into
/// `op.call` — `Arc::make_mut` inside the operator never clones the pixel
/// storage. Empty ROIs are skipped, matching the tile contract's "empty
/// tile is a silent no-op".
pub fn run_tiled(
    ctx: &OperatorContext,
    op: &dyn TiledOp,
    propagator: &dyn DirtyPropagator,
    inputs: &[Arc<ImageBuffer>],
    mut output_buf: ImageBuffer,
    tile_rois: impl IntoIterator<Item = Rect>,
) -> GraphResult<ImageBuffer> {
    for tile_roi in tile_rois {
        if tile_roi.is_empty() {
            continue;
        }
        let input_rois = propagator.propagate(ctx, tile_roi, inputs.len());
        let in_tiles: Vec<Tile> = inputs
            .iter()
            .zip(input_rois.iter())
            .map(|(buf, roi)| buf.view(roi.clip_to_size(buf.width(), buf.height())))
            .collect();
        let mut out_tile = Tile {
            buffer: Arc::new(output_buf),
            roi: tile_roi,
        };
        op.call(ctx, &mut out_tile, &in_tiles)?;
        output_buf = Arc::try_unwrap(out_tile.buffer).unwrap_or_else(|arc| (*arc).clone());
    }
    Ok(output_buf)
}
