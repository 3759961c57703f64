//! Multi-consumer queue.
//!
//! Push is the shared chain push. Pop advances an atomic head with a CAS
//! retry loop; the successful CAS is the pop's linearization point and the
//! only place where consumers contend.

use crossbeam_utils::CachePadded;

use crate::chain::Chain;
use crate::node::Node;
use crate::sync::{retry_hint, AtomicPtr, Ordering};
use crate::{Pop, Push};

/// Unbounded lock-free FIFO queue with many producers and many consumers.
///
/// Share it behind an `Arc` (or by reference in scoped threads); every
/// operation takes `&self`.
pub struct MultiConsumerQueue<T> {
    /// Current sentinel.
    head: CachePadded<AtomicPtr<Node<T>>>,
    chain: Chain<T>,
}

impl<T> MultiConsumerQueue<T> {
    /// Create an empty queue: head and tail share one sentinel.
    #[must_use]
    pub fn new() -> Self {
        let chain = Chain::new();
        Self {
            head: CachePadded::new(AtomicPtr::new(chain.first())),
            chain,
        }
    }

    /// Append `value`. Safe to call from any number of threads.
    pub fn push(&self, value: T) {
        self.chain.push(value);
    }

    /// Remove the oldest value, or return `None` if nothing is linked after
    /// the sentinel at the time of the check.
    ///
    /// At most one caller receives any pushed value. Lock-free but not
    /// wait-free: a failed CAS means another consumer made progress.
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            // Safety: nodes live as long as the chain.
            let next = unsafe { &*head }.next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }

            match self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // Safety: our CAS moved head onto `next`, so no other
                    // consumer can claim it; the Acquire load above made the
                    // producer's payload write visible.
                    let value = unsafe { (*next).take() };
                    debug_assert!(value.is_some(), "claimed node had no payload");
                    return value;
                }
                Err(current) => {
                    head = current;
                    retry_hint();
                }
            }
        }
    }

    /// Whether the queue had no element at the moment of the check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        // Safety: see `pop`.
        unsafe { &*head }.next.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for MultiConsumerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Push<T> for MultiConsumerQueue<T> {
    fn push(&self, value: T) {
        MultiConsumerQueue::push(self, value);
    }
}

impl<T> Pop<T> for MultiConsumerQueue<T> {
    fn pop(&mut self) -> Option<T> {
        MultiConsumerQueue::pop(self)
    }
}

impl<T> Push<T> for &MultiConsumerQueue<T> {
    fn push(&self, value: T) {
        MultiConsumerQueue::push(self, value);
    }
}

impl<T> Pop<T> for &MultiConsumerQueue<T> {
    fn pop(&mut self) -> Option<T> {
        MultiConsumerQueue::pop(self)
    }
}

impl<T> std::fmt::Debug for MultiConsumerQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiConsumerQueue")
            .field("empty", &self.is_empty())
            .finish()
    }
}

// Safety: payloads are only touched by the consumer whose CAS claimed the
// node; everything else shared is atomic.
unsafe impl<T: Send> Send for MultiConsumerQueue<T> {}
unsafe impl<T: Send> Sync for MultiConsumerQueue<T> {}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_sequential() {
        let queue = MultiConsumerQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_is_empty_reflects_state() {
        let queue = MultiConsumerQueue::new();
        assert!(queue.is_empty());
        queue.push("a");
        assert!(!queue.is_empty());
        queue.pop();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_through_shared_reference() {
        let queue = MultiConsumerQueue::new();
        let mut consumer = &queue;
        Push::push(&consumer, 4);
        assert_eq!(Pop::pop(&mut consumer), Some(4));
    }

    #[test]
    fn test_concurrent_push_pop_no_loss_no_duplicates() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let queue = Arc::new(MultiConsumerQueue::new());
        let received = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let received = Arc::clone(&received);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    while received.load(Ordering::Relaxed) < TOTAL {
                        match queue.pop() {
                            Some(v) => {
                                mine.push(v);
                                received.fetch_add(1, Ordering::Relaxed);
                            }
                            None => std::hint::spin_loop(),
                        }
                    }
                    mine
                })
            })
            .collect();

        for handle in producers {
            handle.join().unwrap();
        }

        let mut seen = HashSet::new();
        for handle in consumers {
            let mine = handle.join().unwrap();
            // Each consumer observes any one producer's values in push order.
            let mut last = vec![None; PRODUCERS];
            for v in mine {
                let p = v / PER_PRODUCER;
                if let Some(prev) = last[p] {
                    assert!(v > prev, "producer {} reordered: {} after {}", p, v, prev);
                }
                last[p] = Some(v);
                assert!(seen.insert(v), "value {} popped twice", v);
            }
        }
        assert_eq!(seen.len(), TOTAL);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_single_element_two_consumers() {
        for _ in 0..200 {
            let queue = Arc::new(MultiConsumerQueue::new());
            queue.push(1);

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || queue.pop())
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let got: Vec<_> = results.iter().flatten().collect();
            assert_eq!(got, vec![&1], "exactly one consumer must get the element");
        }
    }
}

#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn test_push_push() {
        loom::model(|| {
            let queue = Arc::new(MultiConsumerQueue::new());
            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);

            let h1 = thread::spawn(move || q1.push(1));
            let h2 = thread::spawn(move || q2.push(2));
            h1.join().unwrap();
            h2.join().unwrap();

            let mut values = vec![queue.pop().unwrap(), queue.pop().unwrap()];
            assert_eq!(queue.pop(), None);
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
        });
    }

    #[test]
    fn test_concurrent_pop() {
        loom::model(|| {
            let queue = Arc::new(MultiConsumerQueue::new());
            queue.push(1);

            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);
            let h1 = thread::spawn(move || q1.pop());
            let h2 = thread::spawn(move || q2.pop());

            match (h1.join().unwrap(), h2.join().unwrap()) {
                (Some(1), None) | (None, Some(1)) => {}
                other => panic!("unexpected pop results: {:?}", other),
            }
        });
    }

    #[test]
    fn test_push_pop_race() {
        loom::model(|| {
            let queue = Arc::new(MultiConsumerQueue::new());
            queue.push(1);

            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);
            let h1 = thread::spawn(move || q1.push(2));
            let h2 = thread::spawn(move || q2.pop());

            h1.join().unwrap();
            // The element pushed first must leave first.
            assert_eq!(h2.join().unwrap(), Some(1));
            assert_eq!(queue.pop(), Some(2));
            assert_eq!(queue.pop(), None);
        });
    }
}
