//! Invariant traits for the queues.
//!
//! - `queue`: NoLostElements, NoDuplicates, FIFO_Order, PerProducerOrder

pub mod queue;

pub use queue::{QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker};
