//! # cq-stateright
//!
//! Exhaustive model checking of the queue algorithms, one shared-memory
//! step at a time.
//!
//! Loom explores the real code but only small thread counts and only the
//! assertions written into each test. The model here is the algorithm
//! itself (link CAS, tail hint store, head CAS or plain head advance,
//! payload take) with every property checked in every reachable state.
//!
//! ```ignore
//! use cq_stateright::{check_model, Discipline, QueueModel};
//!
//! let model = QueueModel::producers_consumers(Discipline::MultiConsumer, 2, 1, 2, 1);
//! let report = check_model(model);
//! assert!(report.passed, "{}", report.format());
//! ```
//!
//! Run with `cargo test -p cq-stateright --release`.

pub mod queue_model;

pub use queue_model::{
    check_model, Discipline, FifoSpec, ModelBug, ModelReport, Phase, QueueAction, QueueModel,
    QueueState, ScriptOp, ALWAYS_PROPERTIES,
};
