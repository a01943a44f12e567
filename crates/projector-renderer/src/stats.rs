use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

/// Accumulates the duration of one render-cycle stage.
#[derive(Debug)]
pub struct StageTimer {
    name: &'static str,
    started: Option<Instant>,
    total: Duration,
    samples: u64,
}

impl StageTimer {
    pub fn new(name: &'static str) -> Self {
        Self { name, started: None, total: Duration::ZERO, samples: 0 }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn end(&mut self) {
        if let Some(start) = self.started.take() {
            self.total += start.elapsed();
            self.samples += 1;
        }
    }

    pub fn average(&self) -> Duration {
        if self.samples == 0 {
            Duration::ZERO
        } else {
            self.total / self.samples as u32
        }
    }

    /// Logs and resets the window.
    pub fn report(&mut self) {
        debug!("{}: avg {:?} over {} cycles", self.name, self.average(), self.samples);
        self.total = Duration::ZERO;
        self.samples = 0;
    }
}

/// Whether the `n`th occurrence of a recurring failure should be logged:
/// the first ten, then every hundredth.
pub(crate) fn throttled(n: u64) -> bool {
    n <= 10 || n % 100 == 0
}

/// Counters written by the render thread, read by anyone.
#[derive(Debug, Default)]
pub struct LoopCounters {
    pub cycles: AtomicU64,
    pub uploads: AtomicU64,
    pub presents: AtomicU64,
    pub hot_reloads: AtomicU64,
    pub restarts: AtomicU64,
}

impl LoopCounters {
    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub uploads: u64,
    pub presents: u64,
    pub hot_reloads: u64,
    pub restarts: u64,
    pub frames_accepted: u64,
    pub frames_promoted: u64,
    pub frames_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_logs_first_ten_then_every_hundredth() {
        let logged: Vec<u64> = (1..=300).filter(|n| throttled(*n)).collect();
        assert_eq!(logged, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 100, 200, 300]);
    }

    #[test]
    fn timer_averages_and_resets_on_report() {
        let mut timer = StageTimer::new("upload");
        assert_eq!(timer.average(), Duration::ZERO);
        timer.end();
        assert_eq!(timer.average(), Duration::ZERO, "end without begin is ignored");

        timer.begin();
        std::thread::sleep(Duration::from_millis(2));
        timer.end();
        assert!(timer.average() >= Duration::from_millis(2));

        timer.report();
        assert_eq!(timer.average(), Duration::ZERO);
    }
}
