//! GPU-composited projection of a host video stream onto monitor windows.
//!
//! ```text
//! host tick ─► FrameIngest ─► PixelRing ─► render thread ─► composite ─► MonitorSet
//!   (accept)   (staging)     (slots)      (fixed cadence)   (target)    (windows)
//! ```
//!
//! The producer never issues GPU calls and never waits on the render thread.
//! All GPU work runs on the render thread, which owns the monitor set for its
//! whole lifetime.

pub mod cadence;
pub mod composite;
pub mod events;
pub mod gpu;
pub mod monitor;
pub mod projector;
pub mod reload;
mod render_loop;
pub mod ring;
pub mod software;
pub mod staging;
pub mod stats;

pub use events::{EventPump, PollFn, TaskQueue};
pub use gpu::{BufferId, FramebufferId, GpuDevice, TextureId};
pub use monitor::{MonitorSet, WindowSystem};
pub use projector::{PolicyFactory, Projector, ProjectorBuilder};
pub use reload::{LoopState, ReloadOutcome};
pub use ring::{CompletionPolicy, FrameDelay, Immediate};
pub use software::{ProbeHandle, SoftwareProbe, SoftwareWindowSystem};
pub use stats::PipelineStats;
