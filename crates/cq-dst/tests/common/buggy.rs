//! Broken queues the harness must reject.
//!
//! | Queue | Bug | Caught by |
//! |-------|-----|-----------|
//! | `LifoQueue` | pops the newest element | FIFO_Order, PerProducerOrder |
//! | `LossyQueue` | silently drops every third push | NoLostElements |
//! | `StutteringQueue` | every other pop leaves the element queued | NoDuplicates |

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cq_queue::{Pop, Push};

#[derive(Default)]
pub struct LifoQueue {
    items: Mutex<Vec<u64>>,
}

impl Push<u64> for LifoQueue {
    fn push(&self, value: u64) {
        self.items.lock().unwrap().push(value);
    }
}

impl Pop<u64> for LifoQueue {
    fn pop(&mut self) -> Option<u64> {
        self.items.lock().unwrap().pop()
    }
}

#[derive(Default)]
pub struct LossyQueue {
    items: Mutex<VecDeque<u64>>,
    pushes: AtomicU64,
}

impl Push<u64> for LossyQueue {
    fn push(&self, value: u64) {
        // BUG: the third, sixth, ... push never lands.
        if self.pushes.fetch_add(1, Ordering::Relaxed) % 3 == 2 {
            return;
        }
        self.items.lock().unwrap().push_back(value);
    }
}

impl Pop<u64> for LossyQueue {
    fn pop(&mut self) -> Option<u64> {
        self.items.lock().unwrap().pop_front()
    }
}

#[derive(Default)]
pub struct StutteringQueue {
    items: Mutex<VecDeque<u64>>,
    pops: u64,
}

impl Push<u64> for StutteringQueue {
    fn push(&self, value: u64) {
        self.items.lock().unwrap().push_back(value);
    }
}

impl Pop<u64> for StutteringQueue {
    fn pop(&mut self) -> Option<u64> {
        self.pops += 1;
        let mut items = self.items.lock().unwrap();
        // BUG: the head does not advance on even pops.
        if self.pops % 2 == 0 {
            items.front().copied()
        } else {
            items.pop_front()
        }
    }
}
