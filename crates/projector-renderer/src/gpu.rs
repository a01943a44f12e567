//! GPU device abstraction used by the render thread.
//!
//! Handles are GL-style integer names. Every call is issued from the render
//! thread after [`GpuDevice::make_current`]; the producer thread never touches
//! the device.

use projector_core::{FrameLayout, FrameSize, GpuError, Quad};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

// MARK: - GpuDevice trait

/// The shared GPU context owned by the monitor window set.
///
/// Implementations:
/// - [`SoftwareDevice`](crate::software::SoftwareDevice): CPU rasterizer for
///   tests and headless runs
pub trait GpuDevice: Send {
    /// Binds the context to the calling thread.
    fn make_current(&mut self) -> Result<(), GpuError>;

    /// Allocates a pixel-unpack buffer of `len` bytes.
    fn create_pixel_buffer(&mut self, len: usize) -> Result<BufferId, GpuError>;

    /// Re-specifies the buffer's storage; previous contents are discarded.
    fn resize_pixel_buffer(&mut self, buffer: BufferId, len: usize) -> Result<(), GpuError>;

    /// Copies `bytes` into the buffer's storage (map, memcpy, unmap).
    fn write_pixel_buffer(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), GpuError>;

    fn delete_pixel_buffer(&mut self, buffer: BufferId);

    fn create_texture(&mut self, size: FrameSize) -> Result<TextureId, GpuError>;

    /// Re-specifies the texture's storage at `size`, clearing it.
    fn resize_texture(&mut self, texture: TextureId, size: FrameSize) -> Result<(), GpuError>;

    /// Uploads a frame from a pixel buffer into the texture's existing
    /// storage. `layout.size` must equal the texture's size; call
    /// [`resize_texture`](Self::resize_texture) first when the frame size changes.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        buffer: BufferId,
        layout: FrameLayout,
    ) -> Result<(), GpuError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Creates a framebuffer with `color` as its colour attachment.
    fn create_framebuffer(&mut self, color: TextureId) -> Result<FramebufferId, GpuError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Clears the framebuffer to opaque black.
    fn clear(&mut self, framebuffer: FramebufferId) -> Result<(), GpuError>;

    /// Draws `source` as one textured quad covering `quad` (pixel coordinates
    /// of the framebuffer's attachment).
    fn draw_textured_quad(
        &mut self,
        framebuffer: FramebufferId,
        source: TextureId,
        quad: Quad,
    ) -> Result<(), GpuError>;

    /// Number of buffers, textures and framebuffers currently alive.
    fn live_handles(&self) -> usize;
}
