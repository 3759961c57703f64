//! Single-consumer queue.
//!
//! Producers share the chain through [`Producer`] handles (or `&self` on
//! the queue). The queue value itself is the one consumer: it is not
//! `Clone` and [`SingleConsumerQueue::pop`] takes `&mut self`, so the
//! head is a plain field that no other thread can ever see.

use crate::chain::Chain;
use crate::node::Node;
use crate::sync::{Arc, Ordering};
use crate::{Pop, Push};

/// Unbounded lock-free FIFO queue with many producers and one consumer.
///
/// `pop` uses no atomic read-modify-write: a single `Acquire` load of the
/// sentinel's successor, then plain writes to consumer-owned state.
pub struct SingleConsumerQueue<T> {
    chain: Arc<Chain<T>>,
    /// Current sentinel. Only this value reads or writes it.
    head: *mut Node<T>,
}

/// Cloneable push handle for a [`SingleConsumerQueue`].
///
/// Keeps the chain alive on its own, so it may outlive the consumer.
pub struct Producer<T> {
    chain: Arc<Chain<T>>,
}

impl<T> SingleConsumerQueue<T> {
    /// Create an empty queue: head and tail share one sentinel.
    #[must_use]
    pub fn new() -> Self {
        let chain = Chain::new();
        let head = chain.first();
        Self {
            chain: Arc::new(chain),
            head,
        }
    }

    /// Append `value`. Safe to call from any number of threads.
    pub fn push(&self, value: T) {
        self.chain.push(value);
    }

    /// Remove the oldest value, or return `None` if nothing is linked
    /// after the sentinel right now.
    ///
    /// `None` is not terminal; a later call may observe a concurrent push.
    pub fn pop(&mut self) -> Option<T> {
        // Safety: head is always a node of the chain we hold an Arc to.
        let head = unsafe { &*self.head };
        let next = head.next.load(Ordering::Acquire);
        if next.is_null() {
            return None;
        }

        self.head = next;
        // Safety: we are the only consumer and just observed `next` with
        // Acquire, so its payload write is visible and nobody else reads it.
        let value = unsafe { (*next).take() };
        debug_assert!(value.is_some(), "linked node past the sentinel had no payload");
        value
    }

    /// Whether the queue had no element at the moment of the check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        // Safety: see `pop`.
        let head = unsafe { &*self.head };
        head.next.load(Ordering::Acquire).is_null()
    }

    /// A new producer handle for this queue.
    #[must_use]
    pub fn producer(&self) -> Producer<T> {
        Producer {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<T> Producer<T> {
    /// Append `value`. See [`SingleConsumerQueue::push`].
    pub fn push(&self, value: T) {
        self.chain.push(value);
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<T> Default for SingleConsumerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Push<T> for SingleConsumerQueue<T> {
    fn push(&self, value: T) {
        SingleConsumerQueue::push(self, value);
    }
}

impl<T> Push<T> for Producer<T> {
    fn push(&self, value: T) {
        Producer::push(self, value);
    }
}

impl<T> Pop<T> for SingleConsumerQueue<T> {
    fn pop(&mut self) -> Option<T> {
        SingleConsumerQueue::pop(self)
    }
}

impl<T> std::fmt::Debug for SingleConsumerQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleConsumerQueue")
            .field("empty", &self.is_empty())
            .finish()
    }
}

// Safety: `head` points into the chain owned through `chain`; `&self`
// methods only push or load atomically, and `pop` needs `&mut self`.
unsafe impl<T: Send> Send for SingleConsumerQueue<T> {}
unsafe impl<T: Send> Sync for SingleConsumerQueue<T> {}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    #[test]
    fn test_push_pop_sequential() {
        let mut queue = SingleConsumerQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_empty_is_idempotent() {
        let mut queue = SingleConsumerQueue::<u64>::new();
        assert!(queue.is_empty());
        for _ in 0..10 {
            assert_eq!(queue.pop(), None);
        }
        queue.push(9);
        assert!(!queue.is_empty());
        assert_eq!(queue.pop(), Some(9));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_optional_payloads() {
        let mut queue = SingleConsumerQueue::new();
        queue.push(None);
        queue.push(Some(3));
        assert_eq!(queue.pop(), Some(None));
        assert_eq!(queue.pop(), Some(Some(3)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_producer_outlives_consumer() {
        let queue = SingleConsumerQueue::new();
        let producer = queue.producer();
        drop(queue);
        producer.push(String::from("orphan"));
    }

    #[test]
    fn test_push_from_other_thread_is_visible() {
        let mut queue = SingleConsumerQueue::new();
        let producer = queue.producer();
        thread::spawn(move || producer.push(5)).join().unwrap();
        assert_eq!(queue.pop(), Some(5));
    }

    #[test]
    fn test_concurrent_producers_per_producer_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2_000;

        let mut queue = SingleConsumerQueue::new();
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let producer = queue.producer();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        producer.push((p, seq));
                    }
                })
            })
            .collect();

        let mut last_seen: HashMap<u64, u64> = HashMap::new();
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            if let Some((p, seq)) = queue.pop() {
                if let Some(&prev) = last_seen.get(&p) {
                    assert!(seq > prev, "producer {} out of order: {} after {}", p, seq, prev);
                }
                last_seen.insert(p, seq);
                received += 1;
            } else {
                std::hint::spin_loop();
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.pop(), None);
    }
}

#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn test_push_push() {
        loom::model(|| {
            let mut queue = SingleConsumerQueue::new();
            let p1 = queue.producer();
            let p2 = queue.producer();

            let h1 = thread::spawn(move || p1.push(1));
            let h2 = thread::spawn(move || p2.push(2));
            h1.join().unwrap();
            h2.join().unwrap();

            let mut values = vec![];
            while let Some(v) = queue.pop() {
                values.push(v);
            }
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
        });
    }

    #[test]
    fn test_pop_races_push() {
        loom::model(|| {
            let mut queue = SingleConsumerQueue::new();
            let producer = queue.producer();

            let h = thread::spawn(move || {
                producer.push(1);
                producer.push(2);
            });

            let first = queue.pop();
            h.join().unwrap();

            let mut values: Vec<u64> = first.into_iter().collect();
            while let Some(v) = queue.pop() {
                values.push(v);
            }
            assert_eq!(values, vec![1, 2], "lost or reordered element");
        });
    }

    #[test]
    fn test_own_push_is_visible() {
        loom::model(|| {
            let mut queue = SingleConsumerQueue::new();
            let producer = queue.producer();

            let h = thread::spawn(move || producer.push(1));

            queue.push(0);
            assert!(queue.pop().is_some(), "consumer missed an element after its own push");
            h.join().unwrap();
        });
    }
}
