//! cq-stress: run the queues under simulation or on real threads.
//!
//! # Usage
//!
//! ```bash
//! cq-stress --mode stress --variant multi --producers 4 --consumers 4 --ops 100000
//! cq-stress --mode dst --variant single --seed 12345 --iterations 50
//! cq-stress --mode linearizable --variant multi --iterations 1000 --json
//! ```
//!
//! Exits non-zero if any run finds a violation.

use std::process;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::error;

use cq_dst::stress::{self, run_push_visible, StressConfig, Variant};
use cq_dst::{get_or_generate_seed, init_tracing, DstHarness, FaultConfig, HarnessConfig};
use cq_queue::{MultiConsumerQueue, SingleConsumerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Deterministic simulation, one seed per iteration
    Dst,
    /// Real threads, large runs
    Stress,
    /// Real threads, tiny runs each checked for linearizability
    Linearizable,
    /// Consumer pushes then pops while producers run
    PushVisible,
}

#[derive(Parser, Debug)]
#[command(name = "cq-stress")]
#[command(about = "Stress and simulation runner for the lock-free queues")]
struct Cli {
    #[arg(long, value_enum, default_value = "stress")]
    mode: Mode,

    #[arg(long, value_enum, default_value = "multi")]
    variant: Variant,

    /// Seed (DST_SEED or random if not set).
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Ignored for the single-consumer variant.
    #[arg(long, default_value_t = 4)]
    consumers: usize,

    /// Operations per producer (per simulated thread under --mode dst).
    #[arg(long)]
    ops: Option<u64>,

    #[arg(long, default_value_t = 1)]
    iterations: u64,

    /// Inject faults in simulation runs.
    #[arg(long)]
    faults: bool,

    /// Print a JSON report to stdout.
    #[arg(long)]
    json: bool,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let seed = match cli.seed {
        Some(seed) => seed,
        None => match get_or_generate_seed() {
            Ok(seed) => seed,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(2);
            }
        },
    };

    let (passed, report) = match cli.mode {
        Mode::Dst => run_dst(&cli, seed),
        Mode::Stress | Mode::Linearizable => run_stress(&cli, seed),
        Mode::PushVisible => {
            let report = run_push_visible(cli.variant, cli.producers, cli.iterations);
            (report.passed(), json!(report))
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    } else {
        println!("{}", if passed { "PASS" } else { "FAIL" });
    }
    if !passed {
        process::exit(1);
    }
}

fn run_dst(cli: &Cli, seed: u64) -> (bool, serde_json::Value) {
    let consumers = match cli.variant {
        Variant::Single => 1,
        Variant::Multi => cli.consumers,
    };
    let mut config = HarnessConfig {
        producers_count: cli.producers,
        consumers_count: consumers,
        fault_config: if cli.faults {
            FaultConfig::aggressive()
        } else {
            FaultConfig::none()
        },
        ..HarnessConfig::default()
    };
    if let Some(ops) = cli.ops {
        config.operations_per_thread = ops;
    }

    let mut results = Vec::new();
    for i in 0..cli.iterations {
        let run_seed = seed.wrapping_add(i);
        let mut harness = match DstHarness::new(run_seed, config.clone()) {
            Ok(h) => h,
            Err(e) => {
                error!("{e}");
                return (false, json!({ "error": e.to_string() }));
            }
        };
        let result = match cli.variant {
            Variant::Single => harness.run_queue(SingleConsumerQueue::<u64>::new()),
            Variant::Multi => harness.run_queue(MultiConsumerQueue::<u64>::new()),
        };
        let held = result.all_invariants_held;
        if !cli.json {
            println!("{}", result.format());
        }
        results.push(result);
        if !held {
            break;
        }
    }

    let passed = results.iter().all(|r| r.all_invariants_held);
    (passed, json!({ "config": config, "runs": results }))
}

fn run_stress(cli: &Cli, seed: u64) -> (bool, serde_json::Value) {
    let base = match cli.mode {
        Mode::Linearizable => StressConfig::linearizable(),
        _ => StressConfig::default(),
    };
    let config = StressConfig {
        variant: cli.variant,
        producers_count: cli.producers,
        consumers_count: cli.consumers,
        ops_per_producer: cli.ops.unwrap_or(base.ops_per_producer),
        iterations: cli.iterations.max(base.iterations),
        ..base
    };

    match stress::run(&config, seed) {
        Ok(report) => {
            if !cli.json {
                println!("{}", report.format());
            }
            (report.passed(), json!({ "config": config, "report": report }))
        }
        Err(e) => {
            error!("{e}");
            (false, json!({ "error": e.to_string() }))
        }
    }
}
