//! Seeded choice of which simulated thread runs next.

use crate::random::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Keep running the current thread
    Continue,
    /// Switch to the given thread
    SwitchTo(usize),
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    rng: DeterministicRng,
    threads_count: usize,
    yield_probability: f64,
    current: usize,
    runnable: Vec<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(rng: DeterministicRng, threads_count: usize, yield_probability: f64) -> Self {
        assert!(threads_count > 0, "Scheduler needs at least one thread");
        Self {
            rng,
            threads_count,
            yield_probability,
            current: 0,
            runnable: vec![true; threads_count],
        }
    }

    pub fn current_thread(&self) -> usize {
        self.current
    }

    pub fn threads_count(&self) -> usize {
        self.threads_count
    }

    /// Mark a thread finished; it is never chosen again.
    pub fn finish(&mut self, thread: usize) {
        if let Some(slot) = self.runnable.get_mut(thread) {
            *slot = false;
        }
    }

    pub fn all_finished(&self) -> bool {
        self.runnable.iter().all(|r| !r)
    }

    /// At a yield point: maybe switch to another runnable thread.
    pub fn decide(&mut self) -> ScheduleDecision {
        let current_runnable = self.runnable[self.current];
        if current_runnable && !self.rng.gen_bool(self.yield_probability) {
            return ScheduleDecision::Continue;
        }
        self.switch_to_random(current_runnable)
    }

    /// Switch away from the current thread regardless of the yield roll.
    pub fn force_switch(&mut self) -> ScheduleDecision {
        self.switch_to_random(false)
    }

    fn switch_to_random(&mut self, allow_current: bool) -> ScheduleDecision {
        let candidates: Vec<usize> = (0..self.threads_count)
            .filter(|&t| self.runnable[t] && (allow_current || t != self.current))
            .collect();
        match self.rng.choose(&candidates) {
            Some(&next) if next != self.current => {
                self.current = next;
                ScheduleDecision::SwitchTo(next)
            }
            _ => ScheduleDecision::Continue,
        }
    }
}
