//! GC Timer - phase timing and marking-step deadlines

use std::time::{Duration, Instant};

/// Measures one phase
#[derive(Debug, Clone, Copy)]
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Point in time after which incremental work yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Run to completion
    Unlimited,
    At(Instant),
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Deadline::At(Instant::now() + budget)
    }

    #[inline]
    pub fn is_reached(&self) -> bool {
        match self {
            Deadline::Unlimited => false,
            Deadline::At(at) => Instant::now() >= *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines() {
        assert!(!Deadline::Unlimited.is_reached());
        assert!(Deadline::after(Duration::ZERO).is_reached());
        assert!(!Deadline::after(Duration::from_secs(3600)).is_reached());
    }

    #[test]
    fn test_timer_monotonic() {
        let timer = GcTimer::new();
        let first = timer.elapsed();
        assert!(timer.elapsed() >= first);
    }
}
