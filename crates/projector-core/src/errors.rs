use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectorError {
    #[error("Window system unavailable: {reason}")]
    WindowSystem { reason: String },

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn render thread: {reason}")]
    ThreadSpawn { reason: String },

    #[error("Render thread exited before completing initialization")]
    RenderThreadLost,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("GPU allocation failed: {what}")]
    AllocationFailed { what: String },

    #[error("Unknown GPU handle: {handle}")]
    UnknownHandle { handle: u32 },

    #[error("GPU context lost")]
    ContextLost,

    #[error("Unsupported GPU operation: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring slot {slot} cannot move from {from} to {to}")]
    InvalidTransition { slot: usize, from: &'static str, to: &'static str },

    #[error("Ring slot {slot} does not exist")]
    UnknownSlot { slot: usize },
}
