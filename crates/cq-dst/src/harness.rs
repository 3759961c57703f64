//! Simulated producer/consumer runs with deterministic scheduling.
//!
//! Simulated threads take turns on one OS thread; the scheduler decides
//! who runs the next operation. The same seed replays the same
//! interleaving, the same faults and therefore the same history.

use cq_core::{PropertyChecker, PropertyResult, QueuePropertyChecker};
use cq_queue::{Pop, Push};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fault::FaultConfig;
use crate::fault_injection::DstRunner;
use crate::{DstEnv, DstError, ScheduleDecision};

const THREADS_MAX: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    pub producers_count: usize,
    pub consumers_count: usize,
    /// Operations each simulated thread performs
    pub operations_per_thread: u64,
    /// Probability of a context switch at each yield point
    pub yield_probability: f64,
    pub fault_config: FaultConfig,
    /// Check history invariants every N operations (0 = only at the end)
    pub invariant_check_interval: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            producers_count: 3,
            consumers_count: 1,
            operations_per_thread: 100,
            yield_probability: 0.2,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl HarnessConfig {
    pub fn stress() -> Self {
        Self {
            producers_count: 6,
            consumers_count: 2,
            operations_per_thread: 1000,
            yield_probability: 0.3,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }

    pub fn quick() -> Self {
        Self {
            producers_count: 2,
            consumers_count: 1,
            operations_per_thread: 50,
            yield_probability: 0.1,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 10,
        }
    }

    /// Default config with `operations_per_thread` from `DST_ITERATIONS`.
    pub fn from_env() -> Result<Self, DstError> {
        let mut config = Self::default();
        if let Some(ops) = crate::iterations_from_env()? {
            config.operations_per_thread = ops;
        }
        Ok(config)
    }

    /// Same config with a different consumer count.
    #[must_use]
    pub fn with_consumers(mut self, consumers_count: usize) -> Self {
        self.consumers_count = consumers_count;
        self
    }

    pub fn threads_count(&self) -> usize {
        self.producers_count + self.consumers_count
    }

    pub fn validate(&self) -> Result<(), DstError> {
        if self.producers_count == 0 || self.consumers_count == 0 {
            return Err(DstError::InvalidConfig(
                "need at least one producer and one consumer".to_string(),
            ));
        }
        if self.threads_count() > THREADS_MAX {
            return Err(DstError::InvalidConfig(format!(
                "{} simulated threads, at most {} supported",
                self.threads_count(),
                THREADS_MAX
            )));
        }
        if !(0.0..=1.0).contains(&self.yield_probability) {
            return Err(DstError::InvalidConfig(format!(
                "yield probability {} outside [0, 1]",
                self.yield_probability
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessResult {
    pub seed: u64,
    pub operations_count: u64,
    pub context_switches_count: u64,
    pub faults_injected_count: u64,
    pub invariant_checks_count: u64,
    pub all_invariants_held: bool,
    pub first_violation: Option<String>,
    /// Rendered counterexample for the first violation, if any
    pub counterexample: Option<String>,
}

impl HarnessResult {
    pub fn format(&self) -> String {
        let status = if self.all_invariants_held { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] DST_SEED={} ops={} switches={} faults={} checks={}",
            status,
            self.seed,
            self.operations_count,
            self.context_switches_count,
            self.faults_injected_count,
            self.invariant_checks_count
        );
        if let Some(ref violation) = self.first_violation {
            out.push_str(&format!("\n  Violation: {}", violation));
        }
        if let Some(ref ce) = self.counterexample {
            out.push('\n');
            out.push_str(ce);
        }
        out
    }
}

pub struct DstHarness {
    env: DstEnv,
    config: HarnessConfig,
    operations_count: u64,
    context_switches_count: u64,
    invariant_checks_count: u64,
    violation: Option<PropertyResult>,
}

impl DstHarness {
    pub fn new(seed: u64, config: HarnessConfig) -> Result<Self, DstError> {
        config.validate()?;
        let env = DstEnv::with_scheduler(
            seed,
            config.threads_count(),
            config.yield_probability,
            FaultConfig::none(),
        );
        Ok(Self {
            env,
            config,
            operations_count: 0,
            context_switches_count: 0,
            invariant_checks_count: 0,
            violation: None,
        })
    }

    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn is_stopped(&self) -> bool {
        self.violation.is_some()
    }

    fn yield_point(&mut self) {
        if let Some(scheduler) = self.env.scheduler() {
            if scheduler.decide() != ScheduleDecision::Continue {
                self.context_switches_count += 1;
            }
        }
    }

    fn should_check_invariants(&self) -> bool {
        let interval = self.config.invariant_check_interval;
        interval != 0 && self.operations_count % interval == 0
    }

    fn record_results(&mut self, results: Vec<PropertyResult>) {
        self.invariant_checks_count += 1;
        if let Some(failed) = results.into_iter().find(|r| !r.holds) {
            warn!(seed = self.seed(), property = failed.name, "{}", failed.summary());
            self.violation = Some(failed);
        }
    }

    /// Run simulated producers and consumers against `queue`.
    ///
    /// Threads `0..producers_count` push values unique across the run;
    /// the rest pop. Pass a config with one consumer for a
    /// single-consumer queue. After the schedule completes the queue is
    /// drained and every invariant is checked.
    pub fn run_queue<Q: Push<u64> + Pop<u64>>(&mut self, queue: Q) -> HarnessResult {
        let seed = self.seed();
        let producers = self.config.producers_count;
        let ops_per_thread = self.config.operations_per_thread;
        let mut runner = DstRunner::with_fault_config(queue, seed, self.config.fault_config.clone());
        let mut thread_steps = vec![0u64; self.config.threads_count()];

        info!(
            seed,
            producers,
            consumers = self.config.consumers_count,
            ops_per_thread,
            "starting DST run"
        );

        while !self.is_stopped() {
            let Some(scheduler) = self.env.scheduler() else {
                break;
            };
            if scheduler.all_finished() {
                break;
            }
            let current = scheduler.current_thread();
            if thread_steps[current] >= ops_per_thread {
                scheduler.finish(current);
                if scheduler.force_switch() != ScheduleDecision::Continue {
                    self.context_switches_count += 1;
                }
                continue;
            }

            let thread_id = current as u64;
            let step = thread_steps[current];
            let outcome = if current < producers {
                // Unique across producers, increasing per producer.
                runner.push(thread_id, (thread_id << 32) | step)
            } else {
                runner.pop(thread_id).map(|_| ())
            };
            if outcome.is_err() {
                debug!(thread_id, step, "fault injected");
            }
            thread_steps[current] += 1;
            self.operations_count += 1;

            if self.should_check_invariants() {
                let results = QueuePropertyChecker::new(&runner).with_seed(seed).check_history();
                self.record_results(results);
            }

            self.yield_point();
        }

        runner.drain();
        if !self.is_stopped() {
            let results = QueuePropertyChecker::new(&runner).with_seed(seed).check_all();
            self.record_results(results);
        }

        let result = self.build_result(runner.stats().faults.faults_count);
        info!(
            seed,
            passed = result.all_invariants_held,
            ops = result.operations_count,
            switches = result.context_switches_count,
            "DST run finished"
        );
        result
    }

    /// Run an arbitrary simulated concurrent workload.
    ///
    /// `generate_op` is asked for each thread's next operation until every
    /// thread has produced `operations_per_thread` of them; `execute`
    /// returning an error stops the run with that violation.
    pub fn run_concurrent<F, T, R, I>(
        &mut self,
        mut generate_op: F,
        mut execute: R,
        mut check_invariants: I,
    ) -> HarnessResult
    where
        F: FnMut(&mut DstEnv, usize, u64) -> Option<T>,
        R: FnMut(&mut DstEnv, usize, T) -> Result<(), String>,
        I: FnMut() -> Result<(), String>,
    {
        let ops_per_thread = self.config.operations_per_thread;
        let mut thread_steps = vec![0u64; self.config.threads_count()];

        while !self.is_stopped() {
            let Some(scheduler) = self.env.scheduler() else {
                break;
            };
            if scheduler.all_finished() {
                break;
            }
            let current = scheduler.current_thread();
            if thread_steps[current] >= ops_per_thread {
                scheduler.finish(current);
                if scheduler.force_switch() != ScheduleDecision::Continue {
                    self.context_switches_count += 1;
                }
                continue;
            }

            if let Some(op) = generate_op(&mut self.env, current, thread_steps[current]) {
                if let Err(e) = execute(&mut self.env, current, op) {
                    self.stop_with(format!("Thread {}: {}", current, e));
                    break;
                }
                self.operations_count += 1;
            }
            thread_steps[current] += 1;

            if self.should_check_invariants() {
                self.invariant_checks_count += 1;
                if let Err(e) = check_invariants() {
                    self.stop_with(e);
                    break;
                }
            }

            self.yield_point();
        }

        if !self.is_stopped() {
            self.invariant_checks_count += 1;
            if let Err(e) = check_invariants() {
                self.stop_with(e);
            }
        }

        let faults = self.env.fault().stats().faults_count;
        self.build_result(faults)
    }

    fn stop_with(&mut self, message: String) {
        warn!(seed = self.seed(), "{}", message);
        self.violation = Some(PropertyResult::fail("Workload", message, None));
    }

    fn build_result(&self, faults_injected_count: u64) -> HarnessResult {
        let violation = self.violation.as_ref();
        HarnessResult {
            seed: self.env.seed(),
            operations_count: self.operations_count,
            context_switches_count: self.context_switches_count,
            faults_injected_count,
            invariant_checks_count: self.invariant_checks_count,
            all_invariants_held: violation.is_none(),
            first_violation: violation.map(PropertyResult::summary),
            counterexample: violation
                .and_then(|v| v.counterexample.as_ref())
                .map(|ce| ce.render_diagram()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cq_queue::{MultiConsumerQueue, SingleConsumerQueue};

    #[test]
    fn test_single_consumer_queue_passes() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick()).unwrap();
        let result = harness.run_queue(SingleConsumerQueue::new());
        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(result.operations_count, 150);
        assert!(result.invariant_checks_count > 1);
    }

    #[test]
    fn test_multi_consumer_queue_passes_with_faults() {
        let config = HarnessConfig {
            fault_config: FaultConfig::aggressive(),
            ..HarnessConfig::default().with_consumers(3)
        };
        let mut harness = DstHarness::new(999, config).unwrap();
        let result = harness.run_queue(MultiConsumerQueue::new());
        assert!(result.all_invariants_held, "{}", result.format());
        assert!(result.faults_injected_count > 0);
        assert!(result.context_switches_count > 0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let run = || {
            let mut harness = DstHarness::new(7, HarnessConfig::default()).unwrap();
            harness.run_queue(SingleConsumerQueue::new())
        };
        let (a, b) = (run(), run());
        assert_eq!(a.context_switches_count, b.context_switches_count);
        assert_eq!(a.faults_injected_count, b.faults_injected_count);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let no_consumers = HarnessConfig::quick().with_consumers(0);
        assert!(matches!(
            DstHarness::new(1, no_consumers),
            Err(DstError::InvalidConfig(_))
        ));

        let too_many = HarnessConfig {
            producers_count: 16,
            ..HarnessConfig::quick()
        };
        assert!(DstHarness::new(1, too_many).is_err());
    }

    #[test]
    fn test_run_concurrent_stops_on_violation() {
        let config = HarnessConfig {
            operations_per_thread: 100,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(12345, config).unwrap();
        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, _thread, op| {
                if op == 5 {
                    Err("Intentional failure at step 5".to_string())
                } else {
                    Ok(())
                }
            },
            || Ok(()),
        );
        assert!(!result.all_invariants_held);
        assert!(result.operations_count < 300);
    }

    #[test]
    fn test_run_concurrent_runs_every_thread() {
        let config = HarnessConfig {
            producers_count: 1,
            consumers_count: 1,
            operations_per_thread: 10,
            yield_probability: 0.5,
            invariant_check_interval: 5,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(12345, config).unwrap();
        let mut counters = [0u64; 2];
        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, thread, _op| {
                counters[thread] += 1;
                Ok(())
            },
            || Ok(()),
        );
        assert!(result.all_invariants_held);
        assert_eq!(counters, [10, 10]);
        assert!(result.context_switches_count > 0);
    }
}
