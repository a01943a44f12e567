//! CPU implementation of the GPU device and monitor window set.
//!
//! Pixels are 4 bytes each and copied verbatim (no colour conversion); quads
//! are rasterized with nearest-neighbour sampling at pixel centres. The device
//! enforces single-thread ownership: calls from any thread other than the one
//! that last called `make_current` are counted and rejected.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use projector_core::{
    aspect_fit, Bounds, FrameLayout, FrameSize, GpuError, MonitorTarget, ProjectionConfig,
    ProjectorError, Quad,
};
use tracing::{debug, info};

use crate::gpu::{BufferId, FramebufferId, GpuDevice, TextureId};
use crate::monitor::{MonitorSet, WindowSystem};

const BPP: usize = FrameLayout::BYTES_PER_PIXEL;
const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

// MARK: - SoftwareDevice

struct Surface {
    size: FrameSize,
    pixels: Vec<u8>,
}

impl Surface {
    fn new(size: FrameSize) -> Self {
        Self { size, pixels: vec![0; size.total_pixels() as usize * BPP] }
    }
}

pub struct SoftwareDevice {
    next_handle: u32,
    buffers: HashMap<u32, Vec<u8>>,
    textures: HashMap<u32, Surface>,
    framebuffers: HashMap<u32, u32>,
    owner: Option<ThreadId>,
    fail_textures: bool,
    foreign_calls: u64,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            owner: None,
            fail_textures: false,
            foreign_calls: 0,
        }
    }

    /// Makes every subsequent `create_texture` fail.
    pub fn fail_texture_creation(&mut self, fail: bool) {
        self.fail_textures = fail;
    }

    /// Calls issued from a thread that does not own the context.
    pub fn foreign_calls(&self) -> u64 {
        self.foreign_calls
    }

    /// Reads one pixel of a texture.
    pub fn pixel(&self, texture: TextureId, x: u32, y: u32) -> Option<[u8; 4]> {
        let surface = self.textures.get(&texture.0)?;
        if x >= surface.size.width || y >= surface.size.height {
            return None;
        }
        let at = (y as usize * surface.size.width as usize + x as usize) * BPP;
        let mut px = [0; 4];
        px.copy_from_slice(&surface.pixels[at..at + BPP]);
        Some(px)
    }

    fn check_thread(&mut self) -> Result<(), GpuError> {
        if self.owner == Some(thread::current().id()) {
            Ok(())
        } else {
            self.foreign_calls += 1;
            Err(GpuError::ContextLost)
        }
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl GpuDevice for SoftwareDevice {
    fn make_current(&mut self) -> Result<(), GpuError> {
        self.owner = Some(thread::current().id());
        Ok(())
    }

    fn create_pixel_buffer(&mut self, len: usize) -> Result<BufferId, GpuError> {
        self.check_thread()?;
        let handle = self.allocate_handle();
        self.buffers.insert(handle, vec![0; len]);
        Ok(BufferId(handle))
    }

    fn resize_pixel_buffer(&mut self, buffer: BufferId, len: usize) -> Result<(), GpuError> {
        self.check_thread()?;
        let storage = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(GpuError::UnknownHandle { handle: buffer.0 })?;
        *storage = vec![0; len];
        Ok(())
    }

    fn write_pixel_buffer(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), GpuError> {
        self.check_thread()?;
        let storage = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(GpuError::UnknownHandle { handle: buffer.0 })?;
        if storage.len() < bytes.len() {
            return Err(GpuError::Unsupported(format!(
                "write of {} bytes into {}-byte buffer",
                bytes.len(),
                storage.len()
            )));
        }
        storage[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn delete_pixel_buffer(&mut self, buffer: BufferId) {
        if self.check_thread().is_err() {
            return;
        }
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, size: FrameSize) -> Result<TextureId, GpuError> {
        self.check_thread()?;
        if self.fail_textures {
            return Err(GpuError::AllocationFailed { what: format!("texture {size}") });
        }
        let handle = self.allocate_handle();
        self.textures.insert(handle, Surface::new(size));
        Ok(TextureId(handle))
    }

    fn resize_texture(&mut self, texture: TextureId, size: FrameSize) -> Result<(), GpuError> {
        self.check_thread()?;
        let surface = self
            .textures
            .get_mut(&texture.0)
            .ok_or(GpuError::UnknownHandle { handle: texture.0 })?;
        *surface = Surface::new(size);
        Ok(())
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        buffer: BufferId,
        layout: FrameLayout,
    ) -> Result<(), GpuError> {
        self.check_thread()?;
        let source = self
            .buffers
            .get(&buffer.0)
            .ok_or(GpuError::UnknownHandle { handle: buffer.0 })?;
        if !layout.is_valid() || source.len() < layout.byte_len() {
            return Err(GpuError::Unsupported(format!("upload of {layout} from {} bytes", source.len())));
        }
        let surface = self
            .textures
            .get_mut(&texture.0)
            .ok_or(GpuError::UnknownHandle { handle: texture.0 })?;
        if surface.size != layout.size {
            return Err(GpuError::Unsupported(format!(
                "upload of {layout} into {} texture",
                surface.size
            )));
        }
        let row_len = layout.size.width as usize * BPP;
        for (row, dst) in surface.pixels.chunks_exact_mut(row_len).enumerate() {
            let at = row * layout.stride;
            dst.copy_from_slice(&source[at..at + row_len]);
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.check_thread().is_err() {
            return;
        }
        self.textures.remove(&texture.0);
    }

    fn create_framebuffer(&mut self, color: TextureId) -> Result<FramebufferId, GpuError> {
        self.check_thread()?;
        if !self.textures.contains_key(&color.0) {
            return Err(GpuError::UnknownHandle { handle: color.0 });
        }
        let handle = self.allocate_handle();
        self.framebuffers.insert(handle, color.0);
        Ok(FramebufferId(handle))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.check_thread().is_err() {
            return;
        }
        self.framebuffers.remove(&framebuffer.0);
    }

    fn clear(&mut self, framebuffer: FramebufferId) -> Result<(), GpuError> {
        self.check_thread()?;
        let color = *self
            .framebuffers
            .get(&framebuffer.0)
            .ok_or(GpuError::UnknownHandle { handle: framebuffer.0 })?;
        let surface = self
            .textures
            .get_mut(&color)
            .ok_or(GpuError::UnknownHandle { handle: color })?;
        for px in surface.pixels.chunks_exact_mut(BPP) {
            px.copy_from_slice(&OPAQUE_BLACK);
        }
        Ok(())
    }

    fn draw_textured_quad(
        &mut self,
        framebuffer: FramebufferId,
        source: TextureId,
        quad: Quad,
    ) -> Result<(), GpuError> {
        self.check_thread()?;
        let color = *self
            .framebuffers
            .get(&framebuffer.0)
            .ok_or(GpuError::UnknownHandle { handle: framebuffer.0 })?;
        if color == source.0 {
            return Err(GpuError::Unsupported("feedback loop: source is the render target".into()));
        }
        let mut target = self
            .textures
            .remove(&color)
            .ok_or(GpuError::UnknownHandle { handle: color })?;
        let result = match self.textures.get(&source.0) {
            Some(src) => {
                rasterize(&mut target, src, quad);
                Ok(())
            }
            None => Err(GpuError::UnknownHandle { handle: source.0 }),
        };
        self.textures.insert(color, target);
        result
    }

    fn live_handles(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.framebuffers.len()
    }
}

/// Nearest-neighbour blit of `src` into `quad` on `dst`.
fn rasterize(dst: &mut Surface, src: &Surface, quad: Quad) {
    if quad.is_empty() || src.size.is_empty() || dst.size.is_empty() {
        return;
    }
    let x0 = quad.x.max(0.0).floor() as u32;
    let y0 = quad.y.max(0.0).floor() as u32;
    let x1 = ((quad.x + quad.width).ceil().max(0.0) as u32).min(dst.size.width);
    let y1 = ((quad.y + quad.height).ceil().max(0.0) as u32).min(dst.size.height);

    let dst_w = dst.size.width as usize;
    let src_w = src.size.width as usize;
    for py in y0..y1 {
        let cy = py as f64 + 0.5;
        if cy < quad.y || cy >= quad.y + quad.height {
            continue;
        }
        let v = (cy - quad.y) / quad.height;
        let sy = ((v * src.size.height as f64) as u32).min(src.size.height - 1) as usize;
        for px in x0..x1 {
            let cx = px as f64 + 0.5;
            if cx < quad.x || cx >= quad.x + quad.width {
                continue;
            }
            let u = (cx - quad.x) / quad.width;
            let sx = ((u * src.size.width as f64) as u32).min(src.size.width - 1) as usize;
            let from = (sy * src_w + sx) * BPP;
            let to = (py as usize * dst_w + px as usize) * BPP;
            dst.pixels[to..to + BPP].copy_from_slice(&src.pixels[from..from + BPP]);
        }
    }
}

// MARK: - SoftwareProbe

/// Observable record of what the software window system did.
#[derive(Debug, Clone, Default)]
pub struct SoftwareProbe {
    pub sets_created: u64,
    pub sets_destroyed: u64,
    pub windows_created: u64,
    pub windows_destroyed: u64,
    pub hot_reloads: u64,
    pub presents: u64,
    pub flips: u64,
    /// Live GPU handles of the most recent window set, sampled at flip and destroy.
    pub live_handles: usize,
    pub foreign_thread_calls: u64,
    /// Destination rectangle of each window of the live set.
    pub destinations: Vec<Bounds>,
    /// Centre pixel of each destination after the last present.
    pub presented: Vec<Option<[u8; 4]>>,
    /// Destination of the first window after each hot reload, oldest first.
    pub reload_history: Vec<Bounds>,
    pub close_requested: bool,
}

/// Shared handle to a [`SoftwareProbe`].
#[derive(Clone, Default)]
pub struct ProbeHandle {
    inner: Arc<Mutex<SoftwareProbe>>,
}

impl ProbeHandle {
    pub fn snapshot(&self) -> SoftwareProbe {
        self.inner.lock().clone()
    }

    /// Simulates the user closing every window.
    pub fn request_close(&self) {
        self.inner.lock().close_requested = true;
    }

    fn update(&self, f: impl FnOnce(&mut SoftwareProbe)) {
        f(&mut self.inner.lock());
    }
}

// MARK: - SoftwareWindowSystem

pub struct SoftwareWindowSystem {
    desktop: Bounds,
    probe: ProbeHandle,
    fail_creation: bool,
    fail_textures: bool,
}

impl SoftwareWindowSystem {
    /// `desktop` is reported as the default projection bounds.
    pub fn new(desktop: Bounds) -> Self {
        Self { desktop, probe: ProbeHandle::default(), fail_creation: false, fail_textures: false }
    }

    pub fn probe(&self) -> ProbeHandle {
        self.probe.clone()
    }

    /// Makes `create` fail, as when the windowing layer cannot initialize.
    pub fn with_creation_failure(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Makes every texture allocation on created sets fail.
    pub fn with_texture_failure(mut self) -> Self {
        self.fail_textures = true;
        self
    }
}

impl WindowSystem for SoftwareWindowSystem {
    fn create(&mut self, config: &ProjectionConfig) -> Result<Box<dyn MonitorSet>, ProjectorError> {
        if self.fail_creation {
            return Err(ProjectorError::WindowSystem { reason: "software window system disabled".into() });
        }
        let mut device = SoftwareDevice::new();
        device.fail_texture_creation(self.fail_textures);
        let windows: Vec<SoftWindow> = config
            .monitors
            .iter()
            .map(|target| SoftWindow { target: target.clone(), surface: None })
            .collect();

        let count = windows.len();
        self.probe.update(|p| {
            p.sets_created += 1;
            p.windows_created += count as u64;
            p.close_requested = false;
            p.destinations = config.monitors.iter().map(|t| t.destination).collect();
            p.presented = vec![None; count];
        });
        info!("Software window set created with {} window(s)", count);

        Ok(Box::new(SoftwareMonitors { device, windows, probe: self.probe.clone(), flipping: true }))
    }

    fn default_bounds(&self) -> Bounds {
        self.desktop
    }
}

// MARK: - SoftwareMonitors

struct SoftWindow {
    target: MonitorTarget,
    surface: Option<(TextureId, FramebufferId)>,
}

struct SoftwareMonitors {
    device: SoftwareDevice,
    windows: Vec<SoftWindow>,
    probe: ProbeHandle,
    flipping: bool,
}

impl SoftwareMonitors {
    fn ensure_surface(
        device: &mut SoftwareDevice,
        window: &mut SoftWindow,
    ) -> Result<(TextureId, FramebufferId), GpuError> {
        if let Some(surface) = window.surface {
            return Ok(surface);
        }
        let texture = device.create_texture(window.target.window.size())?;
        let framebuffer = match device.create_framebuffer(texture) {
            Ok(fb) => fb,
            Err(e) => {
                device.delete_texture(texture);
                return Err(e);
            }
        };
        debug!("Surface allocated for '{}'", window.target.name);
        window.surface = Some((texture, framebuffer));
        Ok((texture, framebuffer))
    }
}

impl MonitorSet for SoftwareMonitors {
    fn gpu(&mut self) -> &mut dyn GpuDevice {
        &mut self.device
    }

    fn reconfigure(&mut self, config: &ProjectionConfig) {
        for (window, target) in self.windows.iter_mut().zip(&config.monitors) {
            window.target.destination = target.destination;
        }
        self.probe.update(|p| {
            p.hot_reloads += 1;
            p.destinations = config.monitors.iter().map(|t| t.destination).collect();
            if let Some(first) = config.monitors.first() {
                p.reload_history.push(first.destination);
            }
        });
    }

    fn present(&mut self, composite: TextureId, size: FrameSize) -> Result<(), GpuError> {
        let mut centres = Vec::with_capacity(self.windows.len());
        for window in &mut self.windows {
            let (texture, framebuffer) = Self::ensure_surface(&mut self.device, window)?;
            self.device.clear(framebuffer)?;
            let dest = window.target.destination;
            self.device.draw_textured_quad(framebuffer, composite, aspect_fit(size, dest))?;

            let cx = dest.x.max(0) as u32 + dest.width / 2;
            let cy = dest.y.max(0) as u32 + dest.height / 2;
            centres.push(self.device.pixel(texture, cx, cy));
        }
        self.probe.update(|p| {
            p.presents += 1;
            p.presented = centres;
        });
        Ok(())
    }

    fn flip(&mut self) {
        if !self.flipping {
            return;
        }
        let live = self.device.live_handles();
        let foreign = self.device.foreign_calls();
        self.probe.update(|p| {
            p.flips += 1;
            p.live_handles = live;
            p.foreign_thread_calls = foreign;
        });
    }

    fn stop_flip(&mut self) {
        self.flipping = false;
    }

    fn should_close(&self) -> bool {
        self.probe.inner.lock().close_requested
    }

    fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn destroy(mut self: Box<Self>) {
        let mut windows = std::mem::take(&mut self.windows);
        for window in &mut windows {
            if let Some((texture, framebuffer)) = window.surface.take() {
                self.device.delete_framebuffer(framebuffer);
                self.device.delete_texture(texture);
            }
        }
        let live = self.device.live_handles();
        let foreign = self.device.foreign_calls();
        let count = windows.len() as u64;
        self.probe.update(|p| {
            p.sets_destroyed += 1;
            p.windows_destroyed += count;
            p.live_handles = live;
            p.foreign_thread_calls = foreign;
        });
        info!("Software window set destroyed ({} window(s), {} live handle(s))", count, live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SoftwareDevice {
        let mut gpu = SoftwareDevice::new();
        gpu.make_current().unwrap();
        gpu
    }

    fn upload_solid(gpu: &mut SoftwareDevice, fill: [u8; 4], layout: FrameLayout) -> TextureId {
        let bytes: Vec<u8> = fill.iter().copied().cycle().take(layout.byte_len()).collect();
        let buffer = gpu.create_pixel_buffer(bytes.len()).unwrap();
        gpu.write_pixel_buffer(buffer, &bytes).unwrap();
        let texture = gpu.create_texture(layout.size).unwrap();
        gpu.upload_texture(texture, buffer, layout).unwrap();
        texture
    }

    #[test]
    fn upload_honours_row_stride() {
        let mut gpu = device();
        let layout = FrameLayout::new(2, 2, 12);
        let mut bytes = vec![0u8; layout.byte_len()];
        bytes[..8].copy_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2]);
        bytes[12..20].copy_from_slice(&[3, 3, 3, 3, 4, 4, 4, 4]);
        let buffer = gpu.create_pixel_buffer(bytes.len()).unwrap();
        gpu.write_pixel_buffer(buffer, &bytes).unwrap();
        let texture = gpu.create_texture(FrameSize::default()).unwrap();
        gpu.resize_texture(texture, layout.size).unwrap();
        gpu.upload_texture(texture, buffer, layout).unwrap();

        assert_eq!(gpu.pixel(texture, 1, 0), Some([2; 4]));
        assert_eq!(gpu.pixel(texture, 0, 1), Some([3; 4]));
        assert_eq!(gpu.pixel(texture, 1, 1), Some([4; 4]));
    }

    #[test]
    fn upload_requires_matching_texture_size() {
        let mut gpu = device();
        let layout = FrameLayout::packed(FrameSize::new(2, 2));
        let buffer = gpu.create_pixel_buffer(layout.byte_len()).unwrap();
        let texture = gpu.create_texture(FrameSize::new(4, 4)).unwrap();

        assert!(matches!(gpu.upload_texture(texture, buffer, layout), Err(GpuError::Unsupported(_))));
        assert_eq!(gpu.pixel(texture, 3, 3), Some([0; 4]), "storage left untouched");

        gpu.resize_texture(texture, layout.size).unwrap();
        gpu.upload_texture(texture, buffer, layout).unwrap();
        assert_eq!(gpu.pixel(texture, 3, 3), None);
    }

    #[test]
    fn quad_covers_only_pixel_centres_inside() {
        let mut gpu = device();
        let source = upload_solid(&mut gpu, [9, 9, 9, 255], FrameLayout::packed(FrameSize::new(1, 1)));
        let target = gpu.create_texture(FrameSize::new(4, 4)).unwrap();
        let fb = gpu.create_framebuffer(target).unwrap();
        gpu.clear(fb).unwrap();
        gpu.draw_textured_quad(fb, source, Quad::new(1.0, 1.0, 2.0, 2.0)).unwrap();

        assert_eq!(gpu.pixel(target, 0, 0), Some(OPAQUE_BLACK));
        assert_eq!(gpu.pixel(target, 1, 1), Some([9, 9, 9, 255]));
        assert_eq!(gpu.pixel(target, 2, 2), Some([9, 9, 9, 255]));
        assert_eq!(gpu.pixel(target, 3, 3), Some(OPAQUE_BLACK));
    }

    #[test]
    fn calls_from_other_threads_are_rejected() {
        let mut gpu = SoftwareDevice::new();
        assert_eq!(gpu.create_texture(FrameSize::new(1, 1)), Err(GpuError::ContextLost));

        gpu.make_current().unwrap();
        let texture = gpu.create_texture(FrameSize::new(1, 1)).unwrap();
        let mut gpu = std::thread::spawn(move || {
            assert_eq!(gpu.create_pixel_buffer(4), Err(GpuError::ContextLost));
            gpu.delete_texture(texture);
            gpu
        })
        .join()
        .unwrap();
        assert_eq!(gpu.foreign_calls(), 3);
        assert_eq!(gpu.live_handles(), 1, "foreign delete leaves the texture alive");
        assert_eq!(gpu.pixel(texture, 0, 0), Some([0; 4]));

        gpu.delete_texture(texture);
        assert_eq!(gpu.live_handles(), 0);
    }

    #[test]
    fn window_set_records_lifecycle() {
        let mut system = SoftwareWindowSystem::new(Bounds::new(0, 0, 64, 48));
        let probe = system.probe();
        let config = ProjectionConfig::default_for(system.default_bounds());

        let mut set = system.create(&config).unwrap();
        set.gpu().make_current().unwrap();
        assert_eq!(set.window_count(), 1);
        assert!(!set.should_close());
        set.flip();
        probe.request_close();
        assert!(set.should_close());
        set.stop_flip();
        set.flip();
        set.destroy();

        let snap = probe.snapshot();
        assert_eq!((snap.sets_created, snap.sets_destroyed), (1, 1));
        assert_eq!((snap.windows_created, snap.windows_destroyed), (1, 1));
        assert_eq!(snap.flips, 1);
        assert_eq!(snap.live_handles, 0);
    }

    #[test]
    fn creation_failure_is_reported() {
        let mut system = SoftwareWindowSystem::new(Bounds::new(0, 0, 64, 48)).with_creation_failure();
        let config = ProjectionConfig::default_for(system.default_bounds());
        assert!(matches!(system.create(&config), Err(ProjectorError::WindowSystem { .. })));
    }
}
