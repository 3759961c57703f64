//! Singly-linked queue cell.

use std::ptr;

use crate::sync::{AtomicPtr, UnsafeCell};

/// A cell of the queue chain.
///
/// `payload` is `None` for the sentinel and for every node a consumer has
/// already moved past. The presence flag is the `Option` itself, so a queue
/// of `Option<U>` can carry `None` values without them looking like
/// sentinels.
pub(crate) struct Node<T> {
    payload: UnsafeCell<Option<T>>,
    /// Append-only: null until a producer links a successor, then fixed.
    pub(crate) next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    /// Allocate an empty sentinel.
    pub(crate) fn sentinel() -> *mut Self {
        Self::alloc(None)
    }

    /// Allocate a node holding `value` with no successor.
    pub(crate) fn new(value: T) -> *mut Self {
        Self::alloc(Some(value))
    }

    fn alloc(payload: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Node {
            payload: UnsafeCell::new(payload),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Move the payload out, turning this node into the sentinel.
    ///
    /// # Safety
    ///
    /// The caller must be the single consumer that advanced head onto this
    /// node, and must have observed the node through an `Acquire` load of
    /// its predecessor's `next`.
    pub(crate) unsafe fn take(&self) -> Option<T> {
        self.payload.with_mut(|payload| (*payload).take())
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::Ordering;

    #[test]
    fn test_sentinel_has_no_payload() {
        let node = Node::<u64>::sentinel();
        // Safety: freshly allocated, exclusively owned here.
        let node = unsafe { Box::from_raw(node) };
        assert!(node.next.load(Ordering::Relaxed).is_null());
        assert_eq!(unsafe { node.take() }, None);
    }

    #[test]
    fn test_take_clears_payload() {
        let node = unsafe { Box::from_raw(Node::new(7_u64)) };
        assert_eq!(unsafe { node.take() }, Some(7));
        assert_eq!(unsafe { node.take() }, None);
    }

    #[test]
    fn test_absent_value_is_still_a_payload() {
        let node = unsafe { Box::from_raw(Node::new(None::<u64>)) };
        assert_eq!(unsafe { node.take() }, Some(None));
        assert_eq!(unsafe { node.take() }, None);
    }
}
