//! FIFO queue invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every pushed element was popped or is still queued |
//! | NoDuplicates | No element popped twice, or both popped and queued |
//! | FIFO_Order | History replays against a sequential FIFO, including empty pops |
//! | PerProducerOrder | Each producer's elements leave in the order pushed |
//!
//! The history-based checks assume operations were recorded in their
//! linearization order, which holds for the simulation harness where
//! operations execute one at a time. Real-thread histories go through
//! [`crate::linearizability`] instead.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::counterexample::{Counterexample, StateSnapshot};
use crate::property::{PropertyChecker, PropertyResult};

/// What a queue under test exposes for checking.
pub trait QueueProperties {
    /// Every element pushed so far.
    fn pushed_elements(&self) -> HashSet<u64>;

    /// Every element popped so far, in pop order.
    fn popped_elements(&self) -> Vec<u64>;

    /// Elements known to be still queued, oldest first.
    ///
    /// Only complete once the queue has been drained or is otherwise
    /// quiescent; `NoLostElements` relies on it.
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history in linearization order.
    fn history(&self) -> QueueHistory;
}

/// Recorded queue operations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueHistory {
    pub operations: Vec<QueueOperation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueOperation {
    pub thread_id: u64,
    pub op_type: QueueOpType,
    /// Pushed value, or the value a pop returned
    pub element: Option<u64>,
    pub step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueOpType {
    Push,
    Pop,
    PopEmpty,
}

impl QueueHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_push(&mut self, thread_id: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id,
            op_type: QueueOpType::Push,
            element: Some(element),
            step,
        });
    }

    pub fn record_pop(&mut self, thread_id: u64, element: Option<u64>, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id,
            op_type: if element.is_some() {
                QueueOpType::Pop
            } else {
                QueueOpType::PopEmpty
            },
            element,
            step,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Last few operations as a counterexample.
    fn tail_counterexample(&self, seed: Option<u64>, upto: usize, description: String) -> Counterexample {
        let mut ce = match seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
        .with_description(description);

        let start = upto.saturating_sub(8);
        for op in &self.operations[start..upto] {
            let action = match (op.op_type, op.element) {
                (QueueOpType::Push, Some(v)) => format!("push({})", v),
                (QueueOpType::Pop, Some(v)) => format!("pop() = {}", v),
                _ => "pop() = empty".to_string(),
            };
            ce.push_action(op.thread_id, action, op.op_type != QueueOpType::PopEmpty);
        }
        ce
    }
}

/// Checks [`QueueProperties`] against the FIFO queue invariants.
pub struct QueuePropertyChecker<'a, T: QueueProperties> {
    queue: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: QueueProperties> QueuePropertyChecker<'a, T> {
    #[must_use]
    pub fn new(queue: &'a T) -> Self {
        Self {
            queue,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dst_seed = Some(seed);
        self
    }

    /// The properties that hold mid-run without knowing queue contents.
    #[must_use]
    pub fn check_history(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_duplicates(),
            self.check_fifo_order(),
            self.check_per_producer_order(),
        ]
    }

    fn check_no_lost_elements(&self) -> PropertyResult {
        let pushed = self.queue.pushed_elements();
        let popped: HashSet<u64> = self.queue.popped_elements().into_iter().collect();
        let contents: HashSet<u64> = self.queue.current_contents().into_iter().collect();

        let mut lost: Vec<u64> = pushed
            .iter()
            .filter(|e| !popped.contains(e) && !contents.contains(e))
            .copied()
            .collect();
        if lost.is_empty() {
            return PropertyResult::pass("NoLostElements");
        }
        lost.sort_unstable();

        let mut ce = match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        ce.add_state(StateSnapshot {
            step: 1,
            description: format!("Elements {:?} lost", lost),
            variables: vec![
                ("pushed".to_string(), pushed.len().to_string()),
                ("popped".to_string(), popped.len().to_string()),
                ("contents".to_string(), contents.len().to_string()),
            ],
        });

        PropertyResult::fail(
            "NoLostElements",
            format!(
                "{} element(s) pushed but neither popped nor queued, first {}",
                lost.len(),
                lost[0]
            ),
            Some(ce),
        )
    }

    fn check_no_duplicates(&self) -> PropertyResult {
        let mut seen = HashSet::new();
        for element in self.queue.popped_elements() {
            if !seen.insert(element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} popped more than once", element),
                    None,
                );
            }
        }

        let mut queued = HashSet::new();
        for element in self.queue.current_contents() {
            if seen.contains(&element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} was popped but is still queued", element),
                    None,
                );
            }
            if !queued.insert(element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} queued more than once", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    /// Replay the history against a `VecDeque`.
    fn check_fifo_order(&self) -> PropertyResult {
        let history = self.queue.history();
        let mut model: VecDeque<u64> = VecDeque::new();

        for (i, op) in history.operations.iter().enumerate() {
            let violation = match (op.op_type, op.element) {
                (QueueOpType::Push, Some(e)) => {
                    model.push_back(e);
                    None
                }
                (QueueOpType::Pop, Some(got)) => match model.pop_front() {
                    Some(expected) if expected == got => None,
                    Some(expected) => Some(format!(
                        "pop returned {} but model expected {} (step {})",
                        got, expected, op.step
                    )),
                    None => Some(format!(
                        "pop returned {} but model was empty (step {})",
                        got, op.step
                    )),
                },
                (QueueOpType::PopEmpty, _) if !model.is_empty() => Some(format!(
                    "pop returned empty but model has {} elements (step {})",
                    model.len(),
                    op.step
                )),
                _ => None,
            };

            if let Some(violation) = violation {
                let ce = history.tail_counterexample(self.dst_seed, i + 1, violation.clone());
                return PropertyResult::fail("FIFO_Order", violation, Some(ce));
            }
        }

        PropertyResult::pass("FIFO_Order")
    }

    /// Each producer's elements must come out (popped, then still queued)
    /// in the order that producer pushed them.
    fn check_per_producer_order(&self) -> PropertyResult {
        let history = self.queue.history();
        let mut position: HashMap<u64, (u64, usize)> = HashMap::new();
        let mut pushed_count: HashMap<u64, usize> = HashMap::new();

        for op in &history.operations {
            if let (QueueOpType::Push, Some(e)) = (op.op_type, op.element) {
                let seq = pushed_count.entry(op.thread_id).or_insert(0);
                position.insert(e, (op.thread_id, *seq));
                *seq += 1;
            }
        }

        let mut last_out: HashMap<u64, usize> = HashMap::new();
        let out = self
            .queue
            .popped_elements()
            .into_iter()
            .chain(self.queue.current_contents());

        for element in out {
            let Some(&(producer, seq)) = position.get(&element) else {
                continue;
            };
            if let Some(&prev) = last_out.get(&producer) {
                if seq < prev {
                    return PropertyResult::fail(
                        "PerProducerOrder",
                        format!(
                            "Producer {} element {} (push #{}) left after push #{}",
                            producer, element, seq, prev
                        ),
                        None,
                    );
                }
            }
            last_out.insert(producer, seq);
        }

        PropertyResult::pass("PerProducerOrder")
    }
}

impl<T: QueueProperties> PropertyChecker for QueuePropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        let mut results = vec![self.check_no_lost_elements()];
        results.extend(self.check_history());
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestQueue {
        pushed: HashSet<u64>,
        popped: Vec<u64>,
        contents: VecDeque<u64>,
        history: QueueHistory,
    }

    impl TestQueue {
        fn step(&self) -> u64 {
            self.history.len() as u64 + 1
        }

        fn push(&mut self, thread: u64, val: u64) {
            self.pushed.insert(val);
            self.contents.push_back(val);
            let step = self.step();
            self.history.record_push(thread, val, step);
        }

        fn pop(&mut self, thread: u64) -> Option<u64> {
            let val = self.contents.pop_front();
            self.popped.extend(val);
            let step = self.step();
            self.history.record_pop(thread, val, step);
            val
        }
    }

    impl QueueProperties for TestQueue {
        fn pushed_elements(&self) -> HashSet<u64> {
            self.pushed.clone()
        }

        fn popped_elements(&self) -> Vec<u64> {
            self.popped.clone()
        }

        fn current_contents(&self) -> Vec<u64> {
            self.contents.iter().copied().collect()
        }

        fn history(&self) -> QueueHistory {
            self.history.clone()
        }
    }

    fn result<'r>(results: &'r [PropertyResult], name: &str) -> &'r PropertyResult {
        results.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_correct_queue_passes_all() {
        let mut queue = TestQueue::default();
        queue.push(0, 1);
        queue.push(1, 2);
        queue.pop(2);
        queue.push(0, 3);
        queue.pop(2);
        queue.pop(2);
        queue.pop(2);

        let checker = QueuePropertyChecker::new(&queue);
        assert!(checker.all_hold(), "{:?}", checker.violations());
    }

    #[test]
    fn test_lost_element_detected() {
        let queue = TestQueue {
            pushed: [1, 2, 3].into_iter().collect(),
            popped: vec![1],
            contents: [2].into_iter().collect(),
            history: QueueHistory::new(),
        };

        let results = QueuePropertyChecker::new(&queue).with_seed(7).check_all();
        let no_lost = result(&results, "NoLostElements");
        assert!(!no_lost.holds);
        assert!(no_lost.violation.as_ref().unwrap().contains('3'));
        assert_eq!(no_lost.counterexample.as_ref().unwrap().dst_seed, Some(7));
    }

    #[test]
    fn test_duplicate_pop_detected() {
        let queue = TestQueue {
            pushed: [1].into_iter().collect(),
            popped: vec![1, 1],
            ..TestQueue::default()
        };

        let results = QueuePropertyChecker::new(&queue).check_all();
        assert!(!result(&results, "NoDuplicates").holds);
    }

    #[test]
    fn test_popped_and_queued_detected() {
        let queue = TestQueue {
            pushed: [1].into_iter().collect(),
            popped: vec![1],
            contents: [1].into_iter().collect(),
            history: QueueHistory::new(),
        };

        let results = QueuePropertyChecker::new(&queue).check_all();
        assert!(!result(&results, "NoDuplicates").holds);
    }

    #[test]
    fn test_lifo_history_fails_fifo() {
        let mut history = QueueHistory::new();
        history.record_push(0, 1, 1);
        history.record_push(0, 2, 2);
        history.record_pop(1, Some(2), 3);

        let queue = TestQueue {
            pushed: [1, 2].into_iter().collect(),
            popped: vec![2],
            contents: [1].into_iter().collect(),
            history,
        };

        let results = QueuePropertyChecker::new(&queue).check_history();
        let fifo = result(&results, "FIFO_Order");
        assert!(!fifo.holds);
        let ce = fifo.counterexample.as_ref().unwrap();
        assert_eq!(ce.interleaving.len(), 3);
        assert!(!result(&results, "PerProducerOrder").holds);
    }

    #[test]
    fn test_spurious_empty_pop_fails_fifo() {
        let mut history = QueueHistory::new();
        history.record_push(0, 5, 1);
        history.record_pop(1, None, 2);

        let queue = TestQueue {
            pushed: [5].into_iter().collect(),
            contents: [5].into_iter().collect(),
            history,
            ..TestQueue::default()
        };

        let results = QueuePropertyChecker::new(&queue).check_history();
        assert!(!result(&results, "FIFO_Order").holds);
    }

    #[test]
    fn test_interleaved_producers_keep_own_order() {
        let mut queue = TestQueue::default();
        queue.push(0, 10);
        queue.push(1, 20);
        queue.push(0, 11);
        queue.push(1, 21);
        queue.pop(2);
        queue.pop(2);

        let results = QueuePropertyChecker::new(&queue).check_history();
        assert!(result(&results, "PerProducerOrder").holds);
        assert!(result(&results, "FIFO_Order").holds);
    }
}
