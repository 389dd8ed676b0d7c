//! Output-shape inference (spec.md §4.7.3): an explicit `width`/`height`
//! parameter wins, otherwise the node inherits shape, channel count, and
//! dtype from its first image input.

use pixelgraph_core::{DataType, Device, GraphError, GraphResult, NodeOutput};
use pixelgraph_registry::OperatorContext;

pub struct OutputShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub dtype: DataType,
    pub device: Device,
}

pub fn infer_output_shape(ctx: &OperatorContext, inputs: &[&NodeOutput]) -> GraphResult<OutputShape> {
    let explicit = ctx.parameter_f64("width").zip(ctx.parameter_f64("height"));
    if let Some((width, height)) = explicit {
        let (channels, dtype, device) = inputs
            .first()
            .map(|i| (i.image_buffer.channels(), i.image_buffer.dtype(), i.image_buffer.device()))
            .unwrap_or((1, DataType::F32, Device::Cpu));
        return Ok(OutputShape {
            width: width as u32,
            height: height as u32,
            channels,
            dtype,
            device,
        });
    }

    let first = inputs.first().ok_or_else(|| {
        GraphError::MissingDependency(format!(
            "node {} ('{}') has no explicit width/height and no image input to infer shape from",
            ctx.node_id, ctx.name
        ))
    })?;
    let buf = &first.image_buffer;
    Ok(OutputShape {
        width: buf.width(),
        height: buf.height(),
        channels: buf.channels(),
        dtype: buf.dtype(),
        device: buf.device(),
    })
}
