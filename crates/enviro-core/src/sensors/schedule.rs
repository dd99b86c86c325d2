//! Timekeeping for the polling state machines
//!
//! Waiting is logical: a driver parks in a waiting state and compares the
//! monotonic clock against the timestamps kept here on every tick.

use embassy_time::{Duration, Instant};

/// Source of monotonic time for the aggregator.
pub trait Monotonic {
    fn now(&self) -> Instant;
}

/// Reads the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMonotonic;

impl Monotonic for SystemMonotonic {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cycle-start, state-entry and last-success timestamps for one sensor.
#[derive(Debug, Clone, Copy)]
pub struct PollTimer {
    interval: Duration,
    cycle_started: Instant,
    state_entered: Instant,
    last_success: Option<Instant>,
}

impl PollTimer {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            cycle_started: Instant::from_ticks(0),
            state_entered: Instant::from_ticks(0),
            last_success: None,
        }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// True once a full poll interval has passed since the last cycle started.
    pub fn interval_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cycle_started) >= self.interval
    }

    /// Start a new cycle; also counts as entering a state.
    pub fn begin_cycle(&mut self, now: Instant) {
        self.cycle_started = now;
        self.state_entered = now;
    }

    pub fn enter_state(&mut self, now: Instant) {
        self.state_entered = now;
    }

    /// True once `wait` has passed since the current state was entered.
    pub fn waited(&self, now: Instant, wait: Duration) -> bool {
        now.saturating_duration_since(self.state_entered) >= wait
    }

    pub fn record_success(&mut self, now: Instant) {
        self.last_success = Some(now);
    }

    pub const fn last_success(&self) -> Option<Instant> {
        self.last_success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_gate() {
        let mut timer = PollTimer::new(Duration::from_millis(1000));
        timer.begin_cycle(Instant::from_millis(500));

        assert!(!timer.interval_elapsed(Instant::from_millis(1499)));
        assert!(timer.interval_elapsed(Instant::from_millis(1500)));
    }

    #[test]
    fn test_clock_behind_cycle_start_never_elapses() {
        let mut timer = PollTimer::new(Duration::from_millis(10));
        timer.begin_cycle(Instant::from_millis(100));

        assert!(!timer.interval_elapsed(Instant::from_millis(0)));
    }

    #[test]
    fn test_state_wait_is_measured_from_entry() {
        let mut timer = PollTimer::new(Duration::from_millis(1000));
        timer.begin_cycle(Instant::from_millis(0));
        timer.enter_state(Instant::from_millis(40));

        assert!(!timer.waited(Instant::from_millis(55), Duration::from_millis(16)));
        assert!(timer.waited(Instant::from_millis(56), Duration::from_millis(16)));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemMonotonic;
        let first = clock.now();
        let second = clock.now();

        assert!(second >= first);
    }
}
