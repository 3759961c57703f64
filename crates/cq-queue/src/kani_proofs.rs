//! Kani proof harnesses for the queues.
//!
//! Bounded model checking of sequential behaviour for all values up to the
//! unwind bound. Kani has no thread model; concurrency is covered by loom
//! and by the `cq-stateright` model.
//!
//! ```bash
//! cargo kani -p cq-queue
//! cargo kani -p cq-queue --harness proof_fifo_two_elements
//! ```

#[cfg(kani)]
mod proofs {
    use crate::{MultiConsumerQueue, SingleConsumerQueue};

    /// A pushed value comes back out of the single-consumer queue.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_single_pop_returns_pushed_value() {
        let mut queue = SingleConsumerQueue::new();
        let value: u64 = kani::any();

        queue.push(value);

        kani::assert(queue.pop() == Some(value), "pop must return the pushed value");
        kani::assert(queue.pop().is_none(), "queue must be empty afterwards");
    }

    /// Two values leave in the order they were pushed.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_fifo_two_elements() {
        let queue = MultiConsumerQueue::new();
        let first: u64 = kani::any();
        let second: u64 = kani::any();

        queue.push(first);
        queue.push(second);

        kani::assert(queue.pop() == Some(first), "first in, first out");
        kani::assert(queue.pop() == Some(second), "second follows");
        kani::assert(queue.pop().is_none(), "nothing else queued");
    }

    /// Popping an empty queue any number of times stays empty.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_empty_pop_is_idempotent() {
        let queue = MultiConsumerQueue::<u8>::new();
        let attempts: u8 = kani::any();
        kani::assume(attempts < 5);

        for _ in 0..attempts {
            kani::assert(queue.pop().is_none(), "empty queue returned a value");
        }
        kani::assert(queue.is_empty(), "queue became non-empty without a push");
    }

    /// `None` is a legitimate payload, distinct from an empty queue.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_absent_payload_is_not_empty() {
        let mut queue = SingleConsumerQueue::<Option<u8>>::new();
        queue.push(None);

        kani::assert(!queue.is_empty(), "queue holding None reported empty");
        kani::assert(queue.pop() == Some(None), "None payload was lost");
    }
}
