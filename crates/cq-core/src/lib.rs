//! # cq-core
//!
//! Core types and invariants for verifying the lock-free queues.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - `QueueProperties` and its checker (no loss, no duplicates, FIFO order,
//!   per-producer order)
//! - A linearizability checker for real-time histories against a
//!   sequential FIFO queue
//!
//! Nothing here depends on the queue implementation: harnesses record what
//! they observe and hand it to the checkers.

pub mod counterexample;
pub mod invariants;
pub mod linearizability;
pub mod property;

pub use counterexample::{Counterexample, StateSnapshot, ThreadAction};
pub use invariants::queue::{
    QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker,
};
pub use linearizability::{
    check_linearizable, Call, HistoryError, Linearization, QueueOp, QueueRet, CALLS_MAX,
};
pub use property::{PropertyChecker, PropertyResult};
