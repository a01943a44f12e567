//! Window-system event polling.
//!
//! Some platforms only allow the event poll on one designated thread. There
//! the render loop hands the poll to that thread's task queue at low
//! frequency instead of calling it inline, and never waits for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

pub type PollFn = Arc<dyn Fn() + Send + Sync>;

/// Queue running tasks on the thread allowed to poll window events
/// (typically the host's UI thread).
pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send>);
}

/// How the render loop gets window-system events pumped.
#[derive(Clone, Default)]
pub enum EventPump {
    /// Nothing to poll.
    #[default]
    None,
    /// Poll on the render thread every cycle.
    Inline(PollFn),
    /// Hand the poll to another thread's queue, at most once per interval.
    Delegated { queue: Arc<dyn TaskQueue>, poll: PollFn },
}

impl std::fmt::Debug for EventPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "EventPump::None"),
            Self::Inline(_) => write!(f, "EventPump::Inline"),
            Self::Delegated { .. } => write!(f, "EventPump::Delegated"),
        }
    }
}

/// Per-loop state driving an [`EventPump`].
pub struct EventPoller {
    pump: EventPump,
    interval: Duration,
    last_submit: Option<Instant>,
    in_flight: Arc<AtomicBool>,
}

impl EventPoller {
    pub fn new(pump: EventPump, interval: Duration) -> Self {
        Self { pump, interval, last_submit: None, in_flight: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Runs or schedules a poll. Never blocks on the delegated thread.
    pub fn tick(&mut self, now: Instant) {
        match &self.pump {
            EventPump::None => {}
            EventPump::Inline(poll) => poll(),
            EventPump::Delegated { queue, poll } => {
                let due = self
                    .last_submit
                    .map_or(true, |at| now.duration_since(at) >= self.interval);
                if !due || self.in_flight.swap(true, Ordering::AcqRel) {
                    return;
                }
                self.last_submit = Some(now);
                let poll = Arc::clone(poll);
                let in_flight = Arc::clone(&self.in_flight);
                trace!("Delegating window-system event poll");
                queue.submit(Box::new(move || {
                    poll();
                    in_flight.store(false, Ordering::Release);
                }));
            }
        }
    }
}
