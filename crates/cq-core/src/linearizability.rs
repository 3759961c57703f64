//! Linearizability checking for real-time queue histories.
//!
//! Each [`Call`] carries the logical time it was invoked and the time it
//! returned. A history is linearizable if some total order of the calls
//! respects real time (a call that returned before another was invoked
//! comes first) and replays correctly against a sequential FIFO queue.
//!
//! The search is the Wing–Gong depth-first search: repeatedly pick a
//! minimal pending call, apply it to the model, backtrack on mismatch.
//! Failed (done set, model) pairs are memoised, which keeps the search
//! cheap for the small histories the stress runner records.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use thiserror::Error;

/// Histories longer than this are rejected; the done set is a `u64` mask.
pub const CALLS_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueOp {
    Push(u64),
    Pop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueRet {
    Pushed,
    Popped(Option<u64>),
}

/// One completed operation with its real-time interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    pub thread_id: u64,
    pub op: QueueOp,
    pub ret: QueueRet,
    pub invoked_at: u64,
    pub returned_at: u64,
}

/// A witness order, as indices into the checked history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linearization {
    pub order: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history has {len} calls, at most {max} can be checked")]
    TooLong { len: usize, max: usize },

    #[error("call {index} returned at {returned_at} before its invocation at {invoked_at}")]
    InvertedInterval {
        index: usize,
        invoked_at: u64,
        returned_at: u64,
    },

    #[error("call {index} pairs {op:?} with result {ret:?}")]
    MismatchedReturn {
        index: usize,
        op: QueueOp,
        ret: QueueRet,
    },

    #[error("not linearizable: longest consistent prefix covers {prefix_len} of {len} calls")]
    NotLinearizable { prefix_len: usize, len: usize },
}

/// Search for a linearization of `calls` against a sequential FIFO queue.
pub fn check_linearizable(calls: &[Call]) -> Result<Linearization, HistoryError> {
    if calls.len() > CALLS_MAX {
        return Err(HistoryError::TooLong {
            len: calls.len(),
            max: CALLS_MAX,
        });
    }
    for (index, call) in calls.iter().enumerate() {
        if call.returned_at < call.invoked_at {
            return Err(HistoryError::InvertedInterval {
                index,
                invoked_at: call.invoked_at,
                returned_at: call.returned_at,
            });
        }
        let paired = matches!(
            (call.op, call.ret),
            (QueueOp::Push(_), QueueRet::Pushed) | (QueueOp::Pop, QueueRet::Popped(_))
        );
        if !paired {
            return Err(HistoryError::MismatchedReturn {
                index,
                op: call.op,
                ret: call.ret,
            });
        }
    }

    let mut search = Search {
        calls,
        failed: HashSet::new(),
        order: Vec::with_capacity(calls.len()),
        best_prefix: 0,
    };
    if search.explore(0, &mut VecDeque::new()) {
        Ok(Linearization { order: search.order })
    } else {
        Err(HistoryError::NotLinearizable {
            prefix_len: search.best_prefix,
            len: calls.len(),
        })
    }
}

struct Search<'a> {
    calls: &'a [Call],
    failed: HashSet<(u64, VecDeque<u64>)>,
    order: Vec<usize>,
    best_prefix: usize,
}

impl Search<'_> {
    fn explore(&mut self, done: u64, model: &mut VecDeque<u64>) -> bool {
        self.best_prefix = self.best_prefix.max(self.order.len());
        if self.order.len() == self.calls.len() {
            return true;
        }
        if self.failed.contains(&(done, model.clone())) {
            return false;
        }

        // A pending call may go next only if no other pending call
        // returned before it was invoked.
        let earliest_return = self
            .pending(done)
            .map(|i| self.calls[i].returned_at)
            .min()
            .unwrap_or(u64::MAX);

        let candidates: Vec<usize> = self
            .pending(done)
            .filter(|&i| self.calls[i].invoked_at <= earliest_return)
            .collect();

        for index in candidates {
            let call = &self.calls[index];
            let undo = match (call.op, call.ret) {
                (QueueOp::Push(v), QueueRet::Pushed) => {
                    model.push_back(v);
                    Undo::PopBack
                }
                (QueueOp::Pop, QueueRet::Popped(got)) => {
                    if model.front().copied() != got {
                        continue;
                    }
                    match model.pop_front() {
                        Some(v) => Undo::PushFront(v),
                        None => Undo::Nothing,
                    }
                }
                _ => continue,
            };

            self.order.push(index);
            if self.explore(done | (1 << index), model) {
                return true;
            }
            self.order.pop();

            match undo {
                Undo::PopBack => {
                    model.pop_back();
                }
                Undo::PushFront(v) => model.push_front(v),
                Undo::Nothing => {}
            }
        }

        self.failed.insert((done, model.clone()));
        false
    }

    fn pending(&self, done: u64) -> impl Iterator<Item = usize> + '_ {
        (0..self.calls.len()).filter(move |&i| done & (1 << i) == 0)
    }
}

enum Undo {
    PopBack,
    PushFront(u64),
    Nothing,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(thread_id: u64, v: u64, invoked_at: u64, returned_at: u64) -> Call {
        Call {
            thread_id,
            op: QueueOp::Push(v),
            ret: QueueRet::Pushed,
            invoked_at,
            returned_at,
        }
    }

    fn pop(thread_id: u64, got: Option<u64>, invoked_at: u64, returned_at: u64) -> Call {
        Call {
            thread_id,
            op: QueueOp::Pop,
            ret: QueueRet::Popped(got),
            invoked_at,
            returned_at,
        }
    }

    #[test]
    fn test_sequential_history() {
        let calls = vec![
            push(0, 1, 1, 2),
            push(0, 2, 3, 4),
            pop(0, Some(1), 5, 6),
            pop(0, Some(2), 7, 8),
            pop(0, None, 9, 10),
        ];
        let lin = check_linearizable(&calls).unwrap();
        assert_eq!(lin.order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_pushes_either_order() {
        // Two overlapping pushes; the pops decide which went first.
        let calls = vec![
            push(0, 1, 1, 4),
            push(1, 2, 2, 3),
            pop(2, Some(2), 5, 6),
            pop(2, Some(1), 7, 8),
        ];
        let lin = check_linearizable(&calls).unwrap();
        assert_eq!(lin.order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_reordered_sequential_pushes_rejected() {
        let calls = vec![
            push(0, 1, 1, 2),
            push(0, 2, 3, 4),
            pop(1, Some(2), 5, 6),
        ];
        assert!(matches!(
            check_linearizable(&calls),
            Err(HistoryError::NotLinearizable { .. })
        ));
    }

    #[test]
    fn test_duplicate_pop_rejected() {
        let calls = vec![
            push(0, 1, 1, 2),
            pop(1, Some(1), 3, 5),
            pop(2, Some(1), 4, 6),
        ];
        assert!(check_linearizable(&calls).is_err());
    }

    #[test]
    fn test_empty_pop_overlapping_push_is_fine() {
        let calls = vec![push(0, 1, 1, 4), pop(1, None, 2, 3)];
        assert!(check_linearizable(&calls).is_ok());
    }

    #[test]
    fn test_empty_pop_after_completed_push_rejected() {
        // Scenario: a push that has returned must be visible.
        let calls = vec![push(0, 5, 1, 2), pop(1, None, 3, 4)];
        assert!(check_linearizable(&calls).is_err());
    }

    #[test]
    fn test_too_long_history_rejected() {
        let calls: Vec<Call> = (0..=CALLS_MAX as u64)
            .map(|i| push(0, i, 2 * i, 2 * i + 1))
            .collect();
        assert_eq!(
            check_linearizable(&calls),
            Err(HistoryError::TooLong {
                len: CALLS_MAX + 1,
                max: CALLS_MAX
            })
        );
    }

    #[test]
    fn test_malformed_calls_rejected() {
        let inverted = vec![push(0, 1, 5, 2)];
        assert!(matches!(
            check_linearizable(&inverted),
            Err(HistoryError::InvertedInterval { index: 0, .. })
        ));

        let mismatched = vec![Call {
            thread_id: 0,
            op: QueueOp::Pop,
            ret: QueueRet::Pushed,
            invoked_at: 1,
            returned_at: 2,
        }];
        assert!(matches!(
            check_linearizable(&mismatched),
            Err(HistoryError::MismatchedReturn { index: 0, .. })
        ));
    }
}
