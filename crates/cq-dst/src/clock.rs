//! Simulated time. Nothing here reads the wall clock.

/// Monotonic simulated clock in nanoseconds.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: u64,
    ticks: u64,
}

impl SimClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    pub fn advance_ns(&mut self, ns: u64) {
        self.now_ns = self.now_ns.saturating_add(ns);
    }

    pub fn advance_us(&mut self, us: u64) {
        self.advance_ns(us.saturating_mul(1_000));
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance_ns(ms.saturating_mul(1_000_000));
    }

    /// Logical tick, strictly increasing from 1. Used as the history step.
    pub fn tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
