//! Composite target and the source texture it is drawn from.
//!
//! Owned exclusively by the render thread. Asset creation failures are logged
//! and leave the stage in a degraded state (nothing drawn) instead of
//! aborting the loop.

use projector_core::{aspect_fit, Bounds, FrameLayout, FrameSize, GpuError};
use tracing::{debug, info, warn};

use crate::gpu::{FramebufferId, GpuDevice, TextureId};
use crate::ring::{PixelRing, RingUploader};
use crate::stats::throttled;

// MARK: - CompositeTarget

/// Texture + framebuffer pair holding the rendered output.
#[derive(Debug)]
pub struct CompositeTarget {
    texture: TextureId,
    framebuffer: FramebufferId,
    size: FrameSize,
}

impl CompositeTarget {
    pub fn create(gpu: &mut dyn GpuDevice, size: FrameSize) -> Result<Self, GpuError> {
        let texture = gpu.create_texture(size)?;
        let framebuffer = match gpu.create_framebuffer(texture) {
            Ok(fb) => fb,
            Err(e) => {
                gpu.delete_texture(texture);
                return Err(e);
            }
        };
        Ok(Self { texture, framebuffer, size })
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Clears the target and draws `source` aspect-fitted into it.
    pub fn draw(&self, gpu: &mut dyn GpuDevice, source: &SourceTexture) -> Result<(), GpuError> {
        gpu.clear(self.framebuffer)?;
        let Some(texture) = source.texture else { return Ok(()) };
        if source.size.is_empty() {
            return Ok(());
        }
        let quad = aspect_fit(source.size, Bounds::from_size(self.size));
        gpu.draw_textured_quad(self.framebuffer, texture, quad)
    }

    pub fn release(self, gpu: &mut dyn GpuDevice) {
        gpu.delete_framebuffer(self.framebuffer);
        gpu.delete_texture(self.texture);
    }
}

// MARK: - SourceTexture

/// Texture receiving uploads from the pixel ring.
#[derive(Debug, Default)]
pub struct SourceTexture {
    texture: Option<TextureId>,
    /// Size of the last uploaded frame; empty until the first upload.
    size: FrameSize,
}

impl SourceTexture {
    pub fn size(&self) -> FrameSize {
        self.size
    }
}

// MARK: - Compositor

/// Source texture, composite target and the ring uploader, as one stage of
/// the render cycle.
pub struct Compositor {
    output_size: FrameSize,
    target: Option<CompositeTarget>,
    source: SourceTexture,
    uploader: RingUploader,
    upload_failures: u64,
}

impl Compositor {
    pub fn new(output_size: FrameSize, ring_capacity: usize) -> Self {
        Self {
            output_size,
            target: None,
            source: SourceTexture::default(),
            uploader: RingUploader::new(ring_capacity),
            upload_failures: 0,
        }
    }

    /// Creates GPU assets. Failures leave the compositor degraded.
    pub fn init(&mut self, gpu: &mut dyn GpuDevice) {
        match gpu.create_texture(FrameSize::default()) {
            Ok(texture) => self.source.texture = Some(texture),
            Err(e) => warn!("Source texture unavailable, output degraded: {}", e),
        }
        match CompositeTarget::create(gpu, self.output_size) {
            Ok(target) => {
                info!("Composite target ready {}", self.output_size);
                self.target = Some(target);
            }
            Err(e) => warn!("Composite target unavailable, output degraded: {}", e),
        }
    }

    pub fn target(&self) -> Option<&CompositeTarget> {
        self.target.as_ref()
    }

    pub fn source_size(&self) -> FrameSize {
        self.source.size
    }

    pub fn is_degraded(&self) -> bool {
        self.target.is_none() || self.source.texture.is_none()
    }

    /// Uploads one dequeued ring slot into the source texture.
    ///
    /// Returns `true` if pixels were uploaded. A failed upload is logged; the
    /// slot still continues its cycle.
    pub fn update_from_ring(&mut self, gpu: &mut dyn GpuDevice, ring: &PixelRing, slot: usize) -> bool {
        let Some(texture) = self.source.texture else { return false };
        match self.uploader.upload(gpu, ring, slot, texture, self.source.size) {
            Ok(Some(layout)) => {
                self.note_upload(layout);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.upload_failures += 1;
                if throttled(self.upload_failures) {
                    warn!("Upload #{} from ring slot {} failed: {}", self.upload_failures, slot, e);
                }
                false
            }
        }
    }

    fn note_upload(&mut self, layout: FrameLayout) {
        if self.source.size != layout.size {
            debug!("Source frame size {} → {}", self.source.size, layout.size);
            self.source.size = layout.size;
        }
    }

    pub fn draw(&self, gpu: &mut dyn GpuDevice) -> Result<(), GpuError> {
        match &self.target {
            Some(target) => target.draw(gpu, &self.source),
            None => Ok(()),
        }
    }

    /// Deletes the composite target and source texture.
    pub fn release_target(&mut self, gpu: &mut dyn GpuDevice) {
        if let Some(target) = self.target.take() {
            target.release(gpu);
        }
        if let Some(texture) = self.source.texture.take() {
            gpu.delete_texture(texture);
        }
    }

    /// Deletes the GPU buffers backing the ring.
    pub fn release_ring(&mut self, gpu: &mut dyn GpuDevice) {
        self.uploader.release(gpu);
    }
}
