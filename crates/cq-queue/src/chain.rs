//! The node chain and the push algorithm shared by both queue disciplines.
//!
//! # Reclamation
//!
//! Nodes are never freed while the chain is alive. The tail hint is a plain
//! store that may land after its node has already been popped past, so a
//! producer can reach a retired node through a stale tail at any time. The
//! chain therefore keeps every node from `first` onwards and frees them all
//! on drop. Popped nodes have their payload moved out, so only the empty
//! cells are retained. Since no address is ever reused, neither CAS can be
//! fooled by ABA.

use crossbeam_utils::CachePadded;

use crate::node::Node;
use crate::sync::{retry_hint, AtomicPtr, Ordering};

pub(crate) struct Chain<T> {
    /// Some linked node, not necessarily the last one.
    tail: CachePadded<AtomicPtr<Node<T>>>,
    /// The initial sentinel; every node ever linked is reachable from here.
    first: *mut Node<T>,
}

impl<T> Chain<T> {
    pub(crate) fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            first: sentinel,
        }
    }

    /// The sentinel the chain was created with. Head starts here.
    pub(crate) fn first(&self) -> *mut Node<T> {
        self.first
    }

    /// Append `value` at the structural end of the chain.
    ///
    /// Lock-free: every failed CAS moves the snapshot one node forward along
    /// links that other producers have already installed.
    pub(crate) fn push(&self, value: T) {
        let node = Node::new(value);
        let mut snapshot = self.tail.load(Ordering::Acquire);

        loop {
            // Safety: nodes live as long as the chain.
            let current = unsafe { &*snapshot };

            match current.next.compare_exchange(
                std::ptr::null_mut(),
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Best-effort hint; a faster producer may already have
                    // stored a later node and this store can move tail back.
                    self.tail.store(node, Ordering::Release);
                    return;
                }
                Err(next) => {
                    debug_assert!(!next.is_null(), "failed link CAS must see a successor");
                    snapshot = next;
                    retry_hint();
                }
            }
        }
    }
}

impl<T> Drop for Chain<T> {
    fn drop(&mut self) {
        let mut current = self.first;
        while !current.is_null() {
            // Safety: `&mut self` means no other thread holds the chain, and
            // each node is reachable exactly once from `first`.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed);
        }
    }
}

// Safety: values are moved between threads through the chain, and all shared
// node fields are atomics or written only under the consumer protocol.
unsafe impl<T: Send> Send for Chain<T> {}
unsafe impl<T: Send> Sync for Chain<T> {}
