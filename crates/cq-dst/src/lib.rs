//! # cq-dst
//!
//! Deterministic simulation testing and real-thread stress runs for the
//! `cq-queue` queues.
//!
//! - [`DstHarness`]: simulated producer and consumer threads on one OS
//!   thread, seeded scheduling and faults, invariants checked as it goes.
//! - [`stress`]: real OS threads hammering a queue, with per-consumer order
//!   checks and, for small runs, a full linearizability check.
//!
//! ```rust
//! use cq_dst::{DstHarness, HarnessConfig};
//! use cq_queue::MultiConsumerQueue;
//!
//! let mut harness = DstHarness::new(12345, HarnessConfig::quick()).unwrap();
//! let result = harness.run_queue(MultiConsumerQueue::<u64>::new());
//! assert!(result.all_invariants_held, "{}", result.format());
//! ```
//!
//! ## Reproducibility
//!
//! Every run prints its seed. To replay a failure:
//! ```bash
//! DST_SEED=12345 cargo test -p cq-dst
//! ```

use std::num::ParseIntError;

use thiserror::Error;
use tracing::info;

pub mod clock;
pub mod env;
pub mod fault;
pub mod fault_injection;
pub mod harness;
pub mod random;
pub mod scheduler;
pub mod stress;

pub use clock::SimClock;
pub use env::DstEnv;
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use fault_injection::{run_dst_scenario, DstOp, DstResult, DstRunner, DstStats, FaultPoint, FaultType};
pub use harness::{DstHarness, HarnessConfig, HarnessResult};
pub use random::DeterministicRng;
pub use scheduler::{ScheduleDecision, Scheduler};
pub use stress::{StressConfig, StressReport, Variant};

#[derive(Debug, Error)]
pub enum DstError {
    #[error("DST_SEED must be a u64, got {value:?}")]
    InvalidSeed {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("DST_ITERATIONS must be a u64, got {value:?}")]
    InvalidIterations {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Seed from `DST_SEED`, or a fresh random one.
///
/// The seed is printed as `DST_SEED=<n>` so a failing run can be replayed.
pub fn get_or_generate_seed() -> Result<u64, DstError> {
    match std::env::var("DST_SEED") {
        Ok(value) => {
            let seed = value
                .trim()
                .parse()
                .map_err(|source| DstError::InvalidSeed { value, source })?;
            println!("DST_SEED={} (from environment)", seed);
            info!(seed, "using DST seed from environment");
            Ok(seed)
        }
        Err(_) => {
            let seed = rand::random::<u64>();
            println!("DST_SEED={} (randomly generated)", seed);
            info!(seed, "generated DST seed");
            Ok(seed)
        }
    }
}

/// `DST_ITERATIONS`, if set.
pub fn iterations_from_env() -> Result<Option<u64>, DstError> {
    match std::env::var("DST_ITERATIONS") {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|source| DstError::InvalidIterations { value, source }),
        Err(_) => Ok(None),
    }
}

/// Install a `RUST_LOG`-filtered fmt subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
