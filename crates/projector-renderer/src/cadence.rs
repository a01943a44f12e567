use std::time::{Duration, Instant};

/// Time left in a cycle of length `period` after `elapsed` of work, clamped at zero.
pub fn remaining_sleep(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Monotonic-clock pacer for the render loop.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    cycle_start: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period, cycle_start: Instant::now() }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn begin_cycle(&mut self) {
        self.cycle_start = Instant::now();
    }

    /// Sleeps out the remainder of the cycle. Returns how long it slept.
    pub fn finish_cycle(&mut self) -> Duration {
        let sleep = remaining_sleep(self.period, self.cycle_start.elapsed());
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
        sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_the_remainder() {
        assert_eq!(
            remaining_sleep(Duration::from_millis(15), Duration::from_millis(4)),
            Duration::from_millis(11)
        );
    }

    #[test]
    fn overrun_clamps_to_zero() {
        assert_eq!(remaining_sleep(Duration::from_millis(15), Duration::from_millis(40)), Duration::ZERO);
        assert_eq!(remaining_sleep(Duration::from_millis(15), Duration::from_millis(15)), Duration::ZERO);
    }

    #[test]
    fn pacer_holds_cycle_length() {
        let mut pacer = Pacer::new(Duration::from_millis(5));
        let start = Instant::now();
        pacer.begin_cycle();
        pacer.finish_cycle();
        assert!(start.elapsed() >= Duration::from_millis(5));

        pacer.set_period(Duration::ZERO);
        pacer.begin_cycle();
        assert_eq!(pacer.finish_cycle(), Duration::ZERO);
    }
}
