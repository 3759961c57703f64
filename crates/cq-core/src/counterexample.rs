//! Counterexample representation and rendering.
//!
//! When a property fails, a counterexample shows the interleaving of queue
//! steps that led there, one column per thread.

use std::fmt::Write as _;

/// A failure path: thread steps in order, plus optional state snapshots.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    /// Snapshots of queue state, keyed by step
    pub states: Vec<StateSnapshot>,
    /// Thread steps that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Which property failed and how
    pub description: Option<String>,
}

/// Snapshot of queue state after a step.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub step: u64,
    pub description: String,
    pub variables: Vec<(String, String)>,
}

/// One step taken by one thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    pub thread_id: u64,
    pub step: u64,
    /// e.g. `push(3): link CAS`
    pub action: String,
    /// False for a lost CAS or an empty pop
    pub success: bool,
}

impl Counterexample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counterexample reproducible with `DST_SEED=seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a state snapshot. Steps must increase.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Append the next thread action. Its step is assigned automatically.
    pub fn push_action(&mut self, thread_id: u64, action: impl Into<String>, success: bool) {
        let step = self.interleaving.last().map_or(1, |a| a.step + 1);
        self.interleaving.push(ThreadAction {
            thread_id,
            step,
            action: action.into(),
            success,
        });
    }

    /// Render as a step-by-thread table.
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0             | Thread 1             | State
    /// -----|----------------------|----------------------|------
    ///    1 | push(1): read tail   |                      |
    ///    2 |                      | push(2): read tail   |
    ///    3 | push(1): link CAS    |                      | chain=[1]
    ///    4 |                      | push(2): link CAS ✗  |
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        const COLUMN_WIDTH: usize = 22;
        let mut out = String::new();

        if let Some(seed) = self.dst_seed {
            let _ = writeln!(out, "DST_SEED={}\n", seed);
        }
        if let Some(desc) = &self.description {
            let _ = writeln!(out, "Failure: {}\n", desc);
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            out.push_str("(no thread actions recorded)\n");
            return out;
        }

        out.push_str("Step |");
        for tid in &threads {
            let _ = write!(out, " {:<w$} |", format!("Thread {}", tid), w = COLUMN_WIDTH - 2);
        }
        out.push_str(" State\n-----|");
        for _ in &threads {
            out.push_str(&"-".repeat(COLUMN_WIDTH));
            out.push('|');
        }
        out.push_str("------\n");

        for action in &self.interleaving {
            let _ = write!(out, "{:4} |", action.step);
            for tid in &threads {
                let cell = if *tid == action.thread_id {
                    let mark = if action.success { "" } else { " ✗" };
                    format!("{}{}", action.action, mark)
                } else {
                    String::new()
                };
                let _ = write!(out, " {:<w$} |", cell, w = COLUMN_WIDTH - 2);
            }
            if let Some(state) = self.states.iter().find(|s| s.step == action.step) {
                let _ = write!(out, " {}", state.description);
            }
            out.push('\n');
        }

        out
    }
}
