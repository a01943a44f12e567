pub mod config;
pub mod errors;
pub mod types;

pub use config::{MonitorTarget, ProjectionConfig, RenderSettings};
pub use errors::{ConfigError, GpuError, ProjectorError, RingError};
pub use types::*;
