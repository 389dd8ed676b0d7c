//! Image buffer and tile view types.
//!
//! [`ImageBuffer`] is a typed 2D pixel container: explicit ownership (shared,
//! reference-counted storage), stride (`step`), a device tag, and an opaque
//! `context` slot operators never need to understand (a GPU texture handle,
//! for instance). A [`Tile`] is a non-owning `(buffer, roi)` view used by
//! tiled operators and the dirty-ROI scheduler.

use std::any::Any;
use std::sync::Arc;

use crate::dtype::{DataType, Device};
use crate::rect::Rect;

/// Owned, reference-counted pixel storage plus shape metadata.
///
/// Cloning an `ImageBuffer` is cheap: it clones the `Arc`, not the pixels.
/// There is no cyclic ownership anywhere in the system — `Node`s reference
/// each other by id, never by buffer pointer — so plain `Arc` is sufficient;
/// no weak/cycle-breaking scheme is needed (spec.md §9).
#[derive(Clone)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    channels: u32,
    dtype: DataType,
    device: Device,
    step: usize,
    data: Arc<Vec<u8>>,
    /// Keeps an external owner (e.g. an OpenCV `Mat` or a GPU texture) alive
    /// for as long as any `ImageBuffer` clone referencing it exists. Unused
    /// for buffers the engine allocated itself.
    context: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .field("step", &self.step)
            .finish()
    }
}

impl ImageBuffer {
    /// Allocates a new, zero-filled buffer with the minimal row-aligned
    /// stride (`step = width * channels * size_of(dtype)`).
    pub fn new(width: u32, height: u32, channels: u32, dtype: DataType, device: Device) -> Self {
        let step = width as usize * channels as usize * dtype.size_of();
        let data = vec![0u8; step * height as usize];
        ImageBuffer {
            width,
            height,
            channels,
            dtype,
            device,
            step,
            data: Arc::new(data),
            context: None,
        }
    }

    /// An empty (0x0) buffer, used as the default `image_buffer` for
    /// `NodeOutput`s that carry only `data`.
    pub fn empty() -> Self {
        ImageBuffer::new(0, 0, 0, DataType::F32, Device::Cpu)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Wraps externally-owned pixel bytes without copying. `context` is an
    /// opaque handle whose `Drop` keeps the external owner alive until the
    /// last clone of the returned buffer is dropped — the Rust equivalent of
    /// a `shared_ptr<void>` with a custom deleter.
    pub fn wrap_external(
        bytes: Arc<Vec<u8>>,
        width: u32,
        height: u32,
        channels: u32,
        dtype: DataType,
        device: Device,
        step: usize,
        context: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        ImageBuffer {
            width,
            height,
            channels,
            dtype,
            device,
            step,
            data: bytes,
            context: Some(context),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    pub fn context(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.context.as_ref()
    }

    /// Raw pixel bytes, zero-copy.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// A non-owning view over `roi`, clipped to the buffer's bounds. Per the
    /// tile contract, clipping is unconditional and a clipped-to-empty ROI
    /// is returned as an empty [`Tile`] rather than an error — callers treat
    /// an empty tile as a silent no-op.
    pub fn view(self: &Arc<Self>, roi: Rect) -> Tile {
        let clipped = roi.clip_to_size(self.width, self.height);
        Tile { buffer: self.clone(), roi: clipped }
    }

    /// Reads pixel `(x, y, channel)` as a normalized `f64`, regardless of the
    /// underlying storage type. Used by generic code (channel conversion,
    /// linear resampling) that must work across dtypes.
    pub fn get_f64(&self, x: u32, y: u32, c: u32) -> f64 {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        let row = y as usize * self.step;
        let comp = self.dtype.size_of();
        let offset = row + (x as usize * self.channels as usize + c as usize) * comp;
        match self.dtype {
            DataType::U8 => self.data[offset] as f64,
            DataType::I8 => self.data[offset] as i8 as f64,
            DataType::U16 => u16::from_le_bytes([self.data[offset], self.data[offset + 1]]) as f64,
            DataType::I16 => i16::from_le_bytes([self.data[offset], self.data[offset + 1]]) as f64,
            DataType::F32 => f32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap()) as f64,
            DataType::F64 => f64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap()),
        }
    }

    /// Writes pixel `(x, y, channel)` from a raw `f64`. Requires exclusive
    /// access to the underlying storage (see [`Self::make_mut`]).
    pub fn set_f64(&mut self, x: u32, y: u32, c: u32, value: f64) {
        debug_assert!(x < self.width && y < self.height && c < self.channels);
        let row = y as usize * self.step;
        let comp = self.dtype.size_of();
        let offset = row + (x as usize * self.channels as usize + c as usize) * comp;
        let bytes = Arc::make_mut(&mut self.data);
        match self.dtype {
            DataType::U8 => bytes[offset] = value as u8,
            DataType::I8 => bytes[offset] = (value as i8) as u8,
            DataType::U16 => bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            DataType::I16 => bytes[offset..offset + 2].copy_from_slice(&(value as i16).to_le_bytes()),
            DataType::F32 => bytes[offset..offset + 4].copy_from_slice(&(value as f32).to_le_bytes()),
            DataType::F64 => bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Ensures exclusive ownership of the pixel storage, copy-on-write.
    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.data)
    }
}

/// A non-owning view `(buffer, roi)` into an [`ImageBuffer`].
///
/// Tiles may overlap (halo regions shared between neighboring tiles).
/// Operators must treat the halo as read-only and write only within their
/// assigned output ROI.
#[derive(Clone)]
pub struct Tile {
    pub buffer: Arc<ImageBuffer>,
    pub roi: Rect,
}

impl Tile {
    pub fn is_empty(&self) -> bool {
        self.roi.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_zeroed_with_minimal_step() {
        let buf = ImageBuffer::new(4, 3, 3, DataType::U8, Device::Cpu);
        assert_eq!(buf.step(), 4 * 3);
        assert_eq!(buf.as_bytes().len(), 4 * 3 * 3);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn get_set_roundtrip_f32() {
        let mut buf = ImageBuffer::new(2, 2, 1, DataType::F32, Device::Cpu);
        buf.set_f64(1, 1, 0, 0.5);
        assert!((buf.get_f64(1, 1, 0) - 0.5).abs() < 1e-6);
        assert_eq!(buf.get_f64(0, 0, 0), 0.0);
    }

    #[test]
    fn get_set_roundtrip_u16() {
        let mut buf = ImageBuffer::new(1, 1, 1, DataType::U16, Device::Cpu);
        buf.set_f64(0, 0, 0, 40000.0);
        assert_eq!(buf.get_f64(0, 0, 0), 40000.0);
    }

    #[test]
    fn view_clips_roi_to_bounds() {
        let buf = Arc::new(ImageBuffer::new(10, 10, 1, DataType::U8, Device::Cpu));
        let tile = buf.view(Rect::new(5, 5, 20, 20));
        assert_eq!(tile.roi, Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn view_fully_outside_bounds_is_empty_not_error() {
        let buf = Arc::new(ImageBuffer::new(10, 10, 1, DataType::U8, Device::Cpu));
        let tile = buf.view(Rect::new(100, 100, 5, 5));
        assert!(tile.is_empty());
    }
}
