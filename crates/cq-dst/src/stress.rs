//! Real-thread stress runs.
//!
//! Unlike the simulation harness these runs use OS threads and the real
//! memory model, so they are not reproducible. The seed only varies how
//! much each thread spins between operations.
//!
//! Each operation takes two timestamps from one shared `SeqCst` counter:
//! one before the call and one after. If call A's return stamp is below
//! call B's invoke stamp, A really did finish before B started, which is
//! exactly the real-time order a linearizability check needs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use clap::ValueEnum;
use cq_core::{check_linearizable, Call, QueueOp, QueueRet, CALLS_MAX};
use cq_queue::{MultiConsumerQueue, SingleConsumerQueue};
use serde::Serialize;
use tracing::{info, warn};

use crate::random::DeterministicRng;
use crate::DstError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// One consumer, pop without read-modify-write
    Single,
    /// Any number of consumers, pop by CAS
    Multi,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    pub variant: Variant,
    pub producers_count: usize,
    /// Forced to 1 for [`Variant::Single`]
    pub consumers_count: usize,
    pub ops_per_producer: u64,
    /// Pops per consumer; `None` pops until every value has been seen
    pub pop_attempts: Option<u64>,
    pub iterations: u64,
    pub check_linearizability: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Multi,
            producers_count: 4,
            consumers_count: 4,
            ops_per_producer: 10_000,
            pop_attempts: None,
            iterations: 1,
            check_linearizability: false,
        }
    }
}

impl StressConfig {
    pub fn quick() -> Self {
        Self {
            producers_count: 4,
            consumers_count: 2,
            ops_per_producer: 1_000,
            ..Self::default()
        }
    }

    /// Many tiny runs, each short enough for an exhaustive check.
    pub fn linearizable() -> Self {
        Self {
            producers_count: 2,
            consumers_count: 2,
            ops_per_producer: 4,
            pop_attempts: Some(5),
            iterations: 200,
            check_linearizability: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    fn effective_consumers(&self) -> usize {
        match self.variant {
            Variant::Single => 1,
            Variant::Multi => self.consumers_count,
        }
    }

    /// Upper bound on one iteration's history length, if pops are bounded.
    ///
    /// Every push, every consumer pop, and a drain that returns each value
    /// at most once plus the final empty pop.
    pub fn worst_case_calls(&self) -> Option<u64> {
        let pushes = (self.producers_count as u64).checked_mul(self.ops_per_producer)?;
        let pops = (self.effective_consumers() as u64).checked_mul(self.pop_attempts?)?;
        pushes.checked_mul(2)?.checked_add(pops)?.checked_add(1)
    }

    pub fn validate(&self) -> Result<(), DstError> {
        if self.producers_count == 0 || self.effective_consumers() == 0 {
            return Err(DstError::InvalidConfig(
                "need at least one producer and one consumer".to_string(),
            ));
        }
        if self.producers_count as u64 > u64::from(u32::MAX) || self.ops_per_producer > u64::from(u32::MAX) {
            return Err(DstError::InvalidConfig(
                "producer ids and sequence numbers must fit in 32 bits".to_string(),
            ));
        }
        if self.check_linearizability {
            match self.worst_case_calls() {
                None => {
                    return Err(DstError::InvalidConfig(
                        "linearizability checks need a bounded pop_attempts".to_string(),
                    ))
                }
                Some(calls) if calls > CALLS_MAX as u64 => {
                    return Err(DstError::InvalidConfig(format!(
                        "histories of up to {} calls exceed the checker limit of {}",
                        calls, CALLS_MAX
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StressReport {
    pub seed: u64,
    pub iterations: u64,
    pub pushed: u64,
    pub popped: u64,
    pub empty_pops: u64,
    pub linearizability_checks: u64,
    pub violations: Vec<String>,
}

impl StressReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn format(&self) -> String {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] seed={} iterations={} pushed={} popped={} empty_pops={} lin_checks={}",
            status,
            self.seed,
            self.iterations,
            self.pushed,
            self.popped,
            self.empty_pops,
            self.linearizability_checks
        );
        for v in self.violations.iter().take(10) {
            out.push_str("\n  VIOLATION: ");
            out.push_str(v);
        }
        out
    }
}

fn encode(producer: usize, seq: u64) -> u64 {
    ((producer as u64) << 32) | seq
}

fn decode(value: u64) -> (u64, u64) {
    (value >> 32, value & 0xFFFF_FFFF)
}

/// Shared logical clock for real-time stamps.
struct Stamps(AtomicU64);

impl Stamps {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ThreadLog {
    values: Vec<u64>,
    empty_pops: u64,
    calls: Vec<Call>,
}

fn spin(n: u32) {
    for _ in 0..n {
        std::hint::spin_loop();
    }
}

/// Run `config.iterations` stress iterations.
pub fn run(config: &StressConfig, seed: u64) -> Result<StressReport, DstError> {
    config.validate()?;
    let mut rng = DeterministicRng::new(seed);
    let mut report = StressReport {
        seed,
        ..StressReport::default()
    };

    info!(
        seed,
        variant = ?config.variant,
        producers = config.producers_count,
        consumers = config.effective_consumers(),
        ops = config.ops_per_producer,
        iterations = config.iterations,
        "starting stress run"
    );

    for iteration in 0..config.iterations {
        let spins: Vec<u32> = (0..config.producers_count + config.effective_consumers())
            .map(|_| rng.gen_range(0..32))
            .collect();
        let logs = match config.variant {
            Variant::Single => run_single(config, &spins),
            Variant::Multi => run_multi(config, &spins),
        };
        check_iteration(config, iteration, logs, &mut report);
        report.iterations += 1;
        if !report.passed() {
            break;
        }
    }

    if report.passed() {
        info!(seed, "{}", report.format());
    } else {
        warn!(seed, "{}", report.format());
    }
    Ok(report)
}

fn produce(producer: usize, push: impl Fn(u64), ops: u64, spins: u32, stamps: &Stamps, record: bool) -> ThreadLog {
    let mut log = ThreadLog::default();
    for seq in 0..ops {
        let value = encode(producer, seq);
        let invoked_at = stamps.next();
        push(value);
        let returned_at = stamps.next();
        if record {
            log.calls.push(Call {
                thread_id: producer as u64,
                op: QueueOp::Push(value),
                ret: QueueRet::Pushed,
                invoked_at,
                returned_at,
            });
        }
        spin(spins);
    }
    log
}

struct ConsumeCtx<'a> {
    thread_id: u64,
    attempts: Option<u64>,
    total: u64,
    consumed: &'a AtomicU64,
    spins: u32,
    stamps: &'a Stamps,
    record: bool,
}

fn consume(ctx: ConsumeCtx<'_>, mut pop: impl FnMut() -> Option<u64>) -> ThreadLog {
    let mut log = ThreadLog::default();
    let mut attempts = 0u64;
    loop {
        match ctx.attempts {
            Some(max) if attempts >= max => break,
            None if ctx.consumed.load(Ordering::Acquire) >= ctx.total => break,
            _ => {}
        }
        attempts += 1;

        let invoked_at = ctx.stamps.next();
        let got = pop();
        let returned_at = ctx.stamps.next();
        match got {
            Some(v) => {
                log.values.push(v);
                ctx.consumed.fetch_add(1, Ordering::AcqRel);
            }
            None => log.empty_pops += 1,
        }
        if ctx.record {
            log.calls.push(Call {
                thread_id: ctx.thread_id,
                op: QueueOp::Pop,
                ret: QueueRet::Popped(got),
                invoked_at,
                returned_at,
            });
        }
        spin(ctx.spins);
    }
    log
}

/// Pops on the calling thread after every worker has joined.
fn drain_after(thread_id: u64, stamps: &Stamps, record: bool, mut pop: impl FnMut() -> Option<u64>) -> ThreadLog {
    let mut log = ThreadLog::default();
    loop {
        let invoked_at = stamps.next();
        let got = pop();
        let returned_at = stamps.next();
        if record {
            log.calls.push(Call {
                thread_id,
                op: QueueOp::Pop,
                ret: QueueRet::Popped(got),
                invoked_at,
                returned_at,
            });
        }
        match got {
            Some(v) => log.values.push(v),
            None => break,
        }
    }
    log
}

struct IterationLogs {
    producers: Vec<ThreadLog>,
    /// One log per consumer, then the post-join drain
    consumers: Vec<ThreadLog>,
}

fn run_single(config: &StressConfig, spins: &[u32]) -> IterationLogs {
    let mut queue = SingleConsumerQueue::<u64>::new();
    let stamps = Stamps(AtomicU64::new(0));
    let consumed = AtomicU64::new(0);
    let total = config.producers_count as u64 * config.ops_per_producer;
    let record = config.check_linearizability;
    let handles: Vec<_> = (0..config.producers_count).map(|_| queue.producer()).collect();

    let (producers, consumer) = thread::scope(|s| {
        let producer_threads: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(p, handle)| {
                let stamps = &stamps;
                let spins = spins[p];
                s.spawn(move || produce(p, |v| handle.push(v), config.ops_per_producer, spins, stamps, record))
            })
            .collect();

        let queue = &mut queue;
        let ctx = ConsumeCtx {
            thread_id: config.producers_count as u64,
            attempts: config.pop_attempts,
            total,
            consumed: &consumed,
            spins: spins[config.producers_count],
            stamps: &stamps,
            record,
        };
        let consumer = s.spawn(move || consume(ctx, || queue.pop()));

        let producers: Vec<ThreadLog> = producer_threads.into_iter().map(join).collect();
        (producers, join(consumer))
    });

    let drain = drain_after(config.producers_count as u64 + 1, &stamps, record, || queue.pop());
    IterationLogs {
        producers,
        consumers: vec![consumer, drain],
    }
}

fn run_multi(config: &StressConfig, spins: &[u32]) -> IterationLogs {
    let queue = MultiConsumerQueue::<u64>::new();
    let stamps = Stamps(AtomicU64::new(0));
    let consumed = AtomicU64::new(0);
    let total = config.producers_count as u64 * config.ops_per_producer;
    let record = config.check_linearizability;
    let consumers_count = config.effective_consumers();

    let (producers, mut consumers) = thread::scope(|s| {
        let producer_threads: Vec<_> = (0..config.producers_count)
            .map(|p| {
                let (queue, stamps, spins) = (&queue, &stamps, spins[p]);
                s.spawn(move || produce(p, |v| queue.push(v), config.ops_per_producer, spins, stamps, record))
            })
            .collect();

        let consumer_threads: Vec<_> = (0..consumers_count)
            .map(|c| {
                let queue = &queue;
                let ctx = ConsumeCtx {
                    thread_id: (config.producers_count + c) as u64,
                    attempts: config.pop_attempts,
                    total,
                    consumed: &consumed,
                    spins: spins[config.producers_count + c],
                    stamps: &stamps,
                    record,
                };
                s.spawn(move || consume(ctx, || queue.pop()))
            })
            .collect();

        let producers: Vec<ThreadLog> = producer_threads.into_iter().map(join).collect();
        let consumers: Vec<ThreadLog> = consumer_threads.into_iter().map(join).collect();
        (producers, consumers)
    });

    let drain_id = (config.producers_count + consumers_count) as u64;
    consumers.push(drain_after(drain_id, &stamps, record, || queue.pop()));
    IterationLogs { producers, consumers }
}

fn join(handle: thread::ScopedJoinHandle<'_, ThreadLog>) -> ThreadLog {
    // A panicking worker is a bug in this module, not in the queue.
    match handle.join() {
        Ok(log) => log,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn check_iteration(config: &StressConfig, iteration: u64, logs: IterationLogs, report: &mut StressReport) {
    let expected = config.producers_count as u64 * config.ops_per_producer;
    report.pushed += expected;

    let mut seen = HashSet::new();
    for (consumer, log) in logs.consumers.iter().enumerate() {
        report.empty_pops += log.empty_pops;
        let mut last_seq: HashMap<u64, u64> = HashMap::new();
        for &value in &log.values {
            report.popped += 1;
            if !seen.insert(value) {
                report
                    .violations
                    .push(format!("iteration {}: value {:#x} popped twice", iteration, value));
            }
            let (producer, seq) = decode(value);
            if let Some(&prev) = last_seq.get(&producer) {
                if seq <= prev {
                    report.violations.push(format!(
                        "iteration {}: consumer {} saw producer {} #{} after #{}",
                        iteration, consumer, producer, seq, prev
                    ));
                }
            }
            last_seq.insert(producer, seq);
        }
    }

    if seen.len() as u64 != expected {
        report.violations.push(format!(
            "iteration {}: pushed {} values, {} came out",
            iteration,
            expected,
            seen.len()
        ));
    }

    if !config.check_linearizability {
        return;
    }
    let calls: Vec<Call> = logs
        .producers
        .into_iter()
        .chain(logs.consumers)
        .flat_map(|log| log.calls)
        .collect();
    report.linearizability_checks += 1;
    if let Err(e) = check_linearizable(&calls) {
        report.violations.push(format!("iteration {}: {}", iteration, e));
    }
}

/// A consumer that pushes and then pops must never see the queue empty,
/// however many producers push alongside it.
pub fn run_push_visible(variant: Variant, producers_count: usize, iterations: u64) -> StressReport {
    let mut report = StressReport::default();
    for iteration in 0..iterations {
        let failed = match variant {
            Variant::Single => {
                let mut queue = SingleConsumerQueue::<u64>::new();
                let handles: Vec<_> = (0..producers_count).map(|_| queue.producer()).collect();
                thread::scope(|s| {
                    for (p, handle) in handles.into_iter().enumerate() {
                        s.spawn(move || {
                            for seq in 0..64 {
                                handle.push(encode(p + 1, seq));
                            }
                        });
                    }
                    queue.push(0);
                    queue.pop().is_none()
                })
            }
            Variant::Multi => {
                let queue = MultiConsumerQueue::<u64>::new();
                thread::scope(|s| {
                    for p in 0..producers_count {
                        let queue = &queue;
                        s.spawn(move || {
                            for seq in 0..64 {
                                queue.push(encode(p + 1, seq));
                            }
                        });
                    }
                    queue.push(0);
                    queue.pop().is_none()
                })
            }
        };
        report.iterations += 1;
        report.pushed += 1 + producers_count as u64 * 64;
        if failed {
            report.empty_pops += 1;
            report
                .violations
                .push(format!("iteration {}: pop after own push returned empty", iteration));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_single() {
        let config = StressConfig::quick().with_variant(Variant::Single);
        let report = run(&config, 1).unwrap();
        assert!(report.passed(), "{}", report.format());
        assert_eq!(report.popped, 4_000);
    }

    #[test]
    fn test_quick_multi() {
        let report = run(&StressConfig::quick(), 2).unwrap();
        assert!(report.passed(), "{}", report.format());
        assert_eq!(report.popped, report.pushed);
    }

    #[test]
    fn test_linearizable_runs_are_checked() {
        for variant in [Variant::Single, Variant::Multi] {
            let config = StressConfig {
                iterations: 20,
                ..StressConfig::linearizable().with_variant(variant)
            };
            let report = run(&config, 3).unwrap();
            assert!(report.passed(), "{}", report.format());
            assert_eq!(report.linearizability_checks, 20);
        }
    }

    #[test]
    fn test_push_visible() {
        for variant in [Variant::Single, Variant::Multi] {
            let report = run_push_visible(variant, 3, 50);
            assert!(report.passed(), "{}", report.format());
        }
    }

    #[test]
    fn test_linearizable_rejects_unbounded_histories() {
        let too_long = StressConfig {
            ops_per_producer: 40,
            iterations: 3,
            ..StressConfig::linearizable()
        };
        assert!(too_long.worst_case_calls().unwrap() > CALLS_MAX as u64);
        assert!(matches!(run(&too_long, 7), Err(DstError::InvalidConfig(_))));

        let unbounded_pops = StressConfig {
            pop_attempts: None,
            ..StressConfig::linearizable()
        };
        assert!(matches!(run(&unbounded_pops, 7), Err(DstError::InvalidConfig(_))));

        for variant in [Variant::Single, Variant::Multi] {
            let preset = StressConfig::linearizable().with_variant(variant);
            assert!(preset.worst_case_calls().unwrap() <= CALLS_MAX as u64);
            assert!(preset.validate().is_ok());
        }
    }

    #[test]
    fn test_invalid_config() {
        let config = StressConfig {
            producers_count: 0,
            ..StressConfig::quick()
        };
        assert!(matches!(run(&config, 0), Err(DstError::InvalidConfig(_))));
    }

    #[test]
    fn test_encode_roundtrip() {
        assert_eq!(decode(encode(3, 17)), (3, 17));
    }
}
