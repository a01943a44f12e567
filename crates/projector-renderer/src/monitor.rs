use projector_core::{Bounds, FrameSize, GpuError, ProjectionConfig, ProjectorError};

use crate::gpu::{GpuDevice, TextureId};

// MARK: - WindowSystem trait

/// Creates monitor window sets. Called from the control thread.
///
/// Display enumeration and OS window chrome live behind this trait.
pub trait WindowSystem: Send {
    /// Opens one surface per configured target. Failure here is fatal for
    /// `start`: the output does not come up.
    fn create(&mut self, config: &ProjectionConfig) -> Result<Box<dyn MonitorSet>, ProjectorError>;

    /// Geometry used to generate a default configuration.
    fn default_bounds(&self) -> Bounds;
}

// MARK: - MonitorSet trait

/// The live windows for one configuration plus the GPU context they share
/// with the render loop. Moved onto the render thread after creation and
/// destroyed there.
pub trait MonitorSet: Send {
    /// Shared GPU context.
    fn gpu(&mut self) -> &mut dyn GpuDevice;

    /// Applies a hot-reloaded configuration (destination rectangles only;
    /// the target list is unchanged by construction).
    fn reconfigure(&mut self, config: &ProjectionConfig);

    /// Draws the composite texture into every window's destination rectangle.
    fn present(&mut self, composite: TextureId, size: FrameSize) -> Result<(), GpuError>;

    /// Swaps buffers on every window.
    fn flip(&mut self);

    /// Stops flipping; subsequent `flip` calls do nothing.
    fn stop_flip(&mut self);

    /// True once every window has requested to close.
    fn should_close(&self) -> bool;

    fn window_count(&self) -> usize;

    /// Releases surfaces and closes the windows.
    fn destroy(self: Box<Self>);
}
