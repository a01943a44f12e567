use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::Bounds;

/// Smallest and largest number of slots a pixel transfer ring may have.
pub const MIN_RING_CAPACITY: usize = 2;
pub const MAX_RING_CAPACITY: usize = 8;

// MARK: - MonitorTarget

/// One projection surface: a window placed on a physical display and the
/// box inside it where the composite is drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorTarget {
    #[serde(alias = "monitorIndex")]
    pub monitor_index: u32,
    pub name: String,
    /// Window placement in desktop coordinates.
    pub window: Bounds,
    /// Destination rectangle relative to the window origin.
    pub destination: Bounds,
}

impl Default for MonitorTarget {
    fn default() -> Self {
        let bounds = Bounds::new(0, 0, 1920, 1080);
        Self {
            monitor_index: 0,
            name: "Projector 0".into(),
            window: bounds,
            destination: Bounds::from_size(bounds.size()),
        }
    }
}

impl MonitorTarget {
    /// Whether `other` refers to the same OS window (same display, same placement).
    /// Destination rectangles are not part of a target's identity.
    pub fn same_surface(&self, other: &Self) -> bool {
        self.monitor_index == other.monitor_index
            && self.name == other.name
            && self.window == other.window
    }
}

// MARK: - RenderSettings

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Number of pixel transfer slots. Fixed for the life of a running loop.
    #[serde(alias = "ringCapacity")]
    pub ring_capacity: usize,
    /// Target period of one render cycle.
    #[serde(alias = "frameIntervalMs")]
    pub frame_interval_ms: u64,
    /// Cycles an uploaded slot stays in flight before it is recycled.
    #[serde(alias = "flushDelayFrames")]
    pub flush_delay_frames: u64,
    /// Minimum spacing between delegated window-system event polls.
    #[serde(alias = "eventPollIntervalMs")]
    pub event_poll_interval_ms: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 3,
            frame_interval_ms: 15,
            flush_delay_frames: 1,
            event_poll_interval_ms: 1000,
        }
    }
}

impl RenderSettings {
    /// Ring capacity clamped into the supported range.
    pub fn effective_ring_capacity(&self) -> usize {
        self.ring_capacity.clamp(MIN_RING_CAPACITY, MAX_RING_CAPACITY)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }
}

// MARK: - ProjectionConfig

/// Immutable snapshot of the monitor targets and render settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub monitors: Vec<MonitorTarget>,
    pub render: RenderSettings,
}

impl ProjectionConfig {
    /// Generated fallback: one window covering `bounds`, composite drawn over
    /// the whole window.
    pub fn default_for(bounds: Bounds) -> Self {
        Self {
            monitors: vec![MonitorTarget {
                monitor_index: 0,
                name: "Projector 0".into(),
                window: bounds,
                destination: Bounds::from_size(bounds.size()),
            }],
            render: RenderSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitors.is_empty() {
            return Err(ConfigError::Invalid { reason: "no monitor targets".into() });
        }
        for target in &self.monitors {
            if target.window.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("monitor '{}' has an empty window", target.name),
                });
            }
            if target.destination.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("monitor '{}' has an empty destination", target.name),
                });
            }
        }
        if self.render.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid { reason: "frame interval must be positive".into() });
        }
        Ok(())
    }

    /// Whether moving from `old` to `new` needs a full stop/rebuild/start.
    ///
    /// Window topology and ring capacity are baked into the running loop;
    /// everything else is applied in place by a hot reload.
    pub fn requires_restart(old: &Self, new: &Self) -> bool {
        if old.monitors.len() != new.monitors.len() {
            return true;
        }
        if old
            .monitors
            .iter()
            .zip(&new.monitors)
            .any(|(a, b)| !a.same_surface(b))
        {
            return true;
        }
        old.render.effective_ring_capacity() != new.render.effective_ring_capacity()
    }
}
