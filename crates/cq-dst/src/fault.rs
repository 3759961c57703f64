//! Seeded fault decisions.
//!
//! The injector only decides *whether* a fault happens. What a fault means
//! (a crashed caller, a stalled thread) is up to the harness that asks.

use serde::Serialize;

use crate::random::DeterministicRng;

#[derive(Debug, Clone, Serialize)]
pub struct FaultConfig {
    /// Probability that an operation boundary injects a fault
    pub fault_probability: f64,
    /// Probability that a delay is simulated between operations
    pub delay_probability: f64,
    /// Upper bound for a simulated delay
    pub max_delay_us: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            fault_probability: 0.01,
            delay_probability: 0.05,
            max_delay_us: 100,
        }
    }
}

impl FaultConfig {
    #[must_use]
    pub fn none() -> Self {
        Self {
            fault_probability: 0.0,
            delay_probability: 0.0,
            max_delay_us: 0,
        }
    }

    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            fault_probability: 0.1,
            delay_probability: 0.2,
            max_delay_us: 1_000,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.fault_probability > 0.0 || self.delay_probability > 0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaultStats {
    pub checks_count: u64,
    pub faults_count: u64,
    pub delays_count: u64,
}

#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn should_fail(&mut self) -> bool {
        self.stats.checks_count += 1;
        if self.config.fault_probability <= 0.0 {
            return false;
        }
        let fail = self.rng.gen_bool(self.config.fault_probability);
        if fail {
            self.stats.faults_count += 1;
        }
        fail
    }

    /// A simulated delay in microseconds, if one should happen now.
    pub fn maybe_delay_us(&mut self) -> Option<u64> {
        if self.config.delay_probability <= 0.0 || self.config.max_delay_us == 0 {
            return None;
        }
        if !self.rng.gen_bool(self.config.delay_probability) {
            return None;
        }
        self.stats.delays_count += 1;
        Some(self.rng.gen_range(1..=self.config.max_delay_us))
    }

    /// Pick one of `count` fault kinds.
    pub fn choose_kind(&mut self, count: usize) -> usize {
        debug_assert!(count > 0);
        self.rng.gen_range(0..count)
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
