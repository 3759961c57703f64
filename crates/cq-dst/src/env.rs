//! Everything nondeterministic in a simulation, derived from one seed.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;
use crate::scheduler::Scheduler;

const FAULT_STREAM: u64 = 1;
const SCHEDULER_STREAM: u64 = 2;

pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    clock: SimClock,
    fault: FaultInjector,
    scheduler: Option<Scheduler>,
}

impl DstEnv {
    /// Environment with default fault injection and no scheduler.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        let rng = DeterministicRng::new(seed);
        let fault = FaultInjector::new(rng.fork(FAULT_STREAM), config);
        Self {
            seed,
            rng,
            clock: SimClock::new(),
            fault,
            scheduler: None,
        }
    }

    /// Environment with a scheduler over `threads_count` simulated threads.
    #[must_use]
    pub fn with_scheduler(
        seed: u64,
        threads_count: usize,
        yield_probability: f64,
        config: FaultConfig,
    ) -> Self {
        let mut env = Self::with_fault_config(seed, config);
        env.scheduler = Some(Scheduler::new(
            env.rng.fork(SCHEDULER_STREAM),
            threads_count,
            yield_probability,
        ));
        env
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn scheduler(&mut self) -> Option<&mut Scheduler> {
        self.scheduler.as_mut()
    }

    /// Advance simulated time if the fault config rolls a delay.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        let delay = self.fault.maybe_delay_us()?;
        self.clock.advance_us(delay);
        Some(delay)
    }

    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    pub fn stats(&self) -> String {
        let f = self.fault.stats();
        format!(
            "{} sim_time={}ns faults={} delays={}",
            self.format_seed(),
            self.clock.now_ns(),
            f.faults_count,
            f.delays_count
        )
    }
}
