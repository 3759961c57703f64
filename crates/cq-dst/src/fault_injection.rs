//! Fault injection around queue operations.
//!
//! Faults happen at operation boundaries, never inside the queue: the
//! queue code is the same code that ships. Interleavings inside an
//! operation are loom's and stateright's job.
//!
//! ```text
//!   BeforeOperation        queue.push()/pop()        AfterOperation
//!   "crash: never runs"  ->  pure, uninstrumented  ->  "crash: result lost"
//! ```

use std::collections::HashSet;

use cq_core::{QueueHistory, QueueProperties};
use cq_queue::{Pop, Push};
use serde::Serialize;

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultStats};
use crate::random::DeterministicRng;

/// Where a fault lands relative to the queue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultPoint {
    /// A crash here abandons the operation; the queue never sees it
    BeforeOperation,
    /// A crash here loses the result; the queue already applied it
    AfterOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultType {
    /// The calling thread dies; see [`FaultPoint`] for what survives
    ThreadCrash,
}

/// Wraps a queue and records everything needed for [`QueueProperties`].
///
/// `thread_id` arguments name the simulated caller; the runner itself is
/// driven from one OS thread.
pub struct DstRunner<Q> {
    queue: Q,
    fault_injector: FaultInjector,
    clock: SimClock,
    seed: u64,
    pushed: HashSet<u64>,
    popped: Vec<u64>,
    /// Left in the queue at the end; filled by [`DstRunner::drain`]
    remaining: Vec<u64>,
    history: QueueHistory,
    operations_count: u64,
    abandoned_operations: u64,
    lost_results: u64,
}

impl<Q: Push<u64> + Pop<u64>> DstRunner<Q> {
    #[must_use]
    pub fn new(queue: Q, seed: u64) -> Self {
        Self::with_fault_config(queue, seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(queue: Q, seed: u64, config: FaultConfig) -> Self {
        let fault_injector = FaultInjector::new(DeterministicRng::new(seed).fork(1), config);
        Self {
            queue,
            fault_injector,
            clock: SimClock::new(),
            seed,
            pushed: HashSet::new(),
            popped: Vec::new(),
            remaining: Vec::new(),
            history: QueueHistory::new(),
            operations_count: 0,
            abandoned_operations: 0,
            lost_results: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Push unless a fault abandons it first.
    ///
    /// A crash after the push still leaves the value queued, so it is
    /// recorded as pushed.
    pub fn push(&mut self, thread_id: u64, value: u64) -> Result<(), FaultType> {
        self.maybe_inject_fault(FaultPoint::BeforeOperation)?;

        self.queue.push(value);
        self.operations_count += 1;
        self.pushed.insert(value);
        let step = self.clock.tick();
        self.history.record_push(thread_id, value, step);

        self.maybe_inject_fault(FaultPoint::AfterOperation)
    }

    /// Pop unless a fault abandons it first.
    ///
    /// A crash after the pop loses the value for the caller, but it has
    /// left the queue and is recorded as popped.
    pub fn pop(&mut self, thread_id: u64) -> Result<Option<u64>, FaultType> {
        self.maybe_inject_fault(FaultPoint::BeforeOperation)?;

        let result = self.queue.pop();
        self.operations_count += 1;
        self.popped.extend(result);
        let step = self.clock.tick();
        self.history.record_pop(thread_id, result, step);

        self.maybe_inject_fault(FaultPoint::AfterOperation)?;
        Ok(result)
    }

    /// Pop everything left, without faults, into the remaining contents.
    ///
    /// Drained values are not part of the history; they are what
    /// [`QueueProperties::current_contents`] reports afterwards.
    pub fn drain(&mut self) -> usize {
        let before = self.remaining.len();
        while let Some(v) = self.queue.pop() {
            self.remaining.push(v);
        }
        self.remaining.len() - before
    }

    /// Err only for a crash. A stall advances the clock and the caller
    /// carries on.
    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Result<(), FaultType> {
        if let Some(delay) = self.fault_injector.maybe_delay_us() {
            self.clock.advance_us(delay);
        }
        if !self.fault_injector.should_fail() {
            return Ok(());
        }
        match self.fault_injector.choose_kind(2) {
            0 => {
                match point {
                    FaultPoint::BeforeOperation => self.abandoned_operations += 1,
                    FaultPoint::AfterOperation => self.lost_results += 1,
                }
                Err(FaultType::ThreadCrash)
            }
            _ => {
                self.clock.advance_ms(1);
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed,
            operations_count: self.operations_count,
            abandoned_operations: self.abandoned_operations,
            lost_results: self.lost_results,
            sim_time_ns: self.clock.now_ns(),
            faults: self.fault_injector.stats(),
        }
    }
}

impl<Q> QueueProperties for DstRunner<Q> {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.pushed.clone()
    }

    fn popped_elements(&self) -> Vec<u64> {
        self.popped.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.remaining.clone()
    }

    fn history(&self) -> QueueHistory {
        self.history.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    /// Crashes before the queue call
    pub abandoned_operations: u64,
    /// Crashes after the queue call
    pub lost_results: u64,
    pub sim_time_ns: u64,
    pub faults: FaultStats,
}

impl DstStats {
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} lost={} sim_time={}ns",
            self.seed,
            self.operations_count,
            self.faults.faults_count,
            self.abandoned_operations,
            self.lost_results,
            self.sim_time_ns
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Push(u64),
    Pop,
}

#[derive(Debug)]
pub struct DstResult {
    pub passed: bool,
    pub violations: Vec<String>,
    pub stats: DstStats,
    pub faults_hit: usize,
}

impl DstResult {
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!("[{}] {}", status, self.stats.format());
        for v in &self.violations {
            out.push_str("\n  VIOLATION: ");
            out.push_str(v);
        }
        out
    }
}

/// Run a fixed operation script from one simulated thread, drain, check.
pub fn run_dst_scenario<Q: Push<u64> + Pop<u64>>(queue: Q, seed: u64, ops: &[DstOp]) -> DstResult {
    use cq_core::{PropertyChecker, QueuePropertyChecker};

    let mut runner = DstRunner::new(queue, seed);
    let mut faults_hit = 0;
    for op in ops {
        let result = match *op {
            DstOp::Push(v) => runner.push(0, v),
            DstOp::Pop => runner.pop(0).map(|_| ()),
        };
        if result.is_err() {
            faults_hit += 1;
        }
    }
    runner.drain();

    let violations: Vec<String> = QueuePropertyChecker::new(&runner)
        .with_seed(seed)
        .violations()
        .iter()
        .map(|r| r.summary())
        .collect();

    DstResult {
        passed: violations.is_empty(),
        violations,
        stats: runner.stats(),
        faults_hit,
    }
}
