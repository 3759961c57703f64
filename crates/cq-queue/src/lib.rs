//! # cq-queue
//!
//! Unbounded lock-free linked FIFO queues.
//!
//! Both queues share one node chain and one push algorithm: CAS the
//! successor of a tail snapshot from null to the new node, walking forward
//! on failure, then store the new node into tail as a best-effort hint.
//! They differ only in how the head sentinel advances:
//!
//! - [`SingleConsumerQueue`]: the queue value is the sole consumer and
//!   `pop(&mut self)` advances a plain head pointer. Producers push through
//!   `&self` or cloned [`Producer`] handles.
//! - [`MultiConsumerQueue`]: any thread may `pop(&self)`; head advances by
//!   CAS in a retry loop.
//!
//! ```
//! use cq_queue::MultiConsumerQueue;
//!
//! let queue = MultiConsumerQueue::new();
//! queue.push(1);
//! queue.push(2);
//! assert_eq!(queue.pop(), Some(1));
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), None);
//! ```
//!
//! # Memory
//!
//! Nodes are retained until the queue (and, for the single-consumer queue,
//! every producer handle) is dropped. Popped values are moved out
//! immediately; only the emptied cells stay allocated.
//!
//! # Verification
//!
//! - loom: `RUSTFLAGS="--cfg loom" cargo test -p cq-queue --release`
//! - kani: `cargo kani -p cq-queue`
//! - simulation, stress and linearizability: the `cq-dst` crate
//! - step-level model checking: the `cq-stateright` crate

mod chain;
mod node;
mod sync;

pub mod kani_proofs;
pub mod multi;
pub mod single;

pub use multi::MultiConsumerQueue;
pub use single::{Producer, SingleConsumerQueue};

/// Producer side of a FIFO queue. Never fails, never blocks.
pub trait Push<T> {
    fn push(&self, value: T);
}

/// Consumer side of a FIFO queue.
///
/// Takes `&mut self` so single-consumer queues can demand exclusive access;
/// multi-consumer queues also implement it for `&MultiConsumerQueue`.
pub trait Pop<T> {
    /// The oldest value, or `None` if the queue was empty when checked.
    fn pop(&mut self) -> Option<T>;
}
