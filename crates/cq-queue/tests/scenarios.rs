//! End-to-end behaviour of both queues through the public API.
#![cfg(not(loom))]

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use cq_queue::{MultiConsumerQueue, SingleConsumerQueue};

#[test]
fn sequential_fifo_then_empty() {
    let mut scq = SingleConsumerQueue::new();
    scq.push(1);
    scq.push(2);
    assert_eq!(scq.pop(), Some(1));
    assert_eq!(scq.pop(), Some(2));
    assert_eq!(scq.pop(), None);

    let mcq = MultiConsumerQueue::new();
    mcq.push(1);
    mcq.push(2);
    assert_eq!(mcq.pop(), Some(1));
    assert_eq!(mcq.pop(), Some(2));
    assert_eq!(mcq.pop(), None);
}

#[test]
fn concurrent_pushes_each_popped_once() {
    for _ in 0..200 {
        let mut queue = SingleConsumerQueue::new();
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [1, 2]
            .into_iter()
            .map(|v| {
                let producer = queue.producer();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    producer.push(v);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let got: HashSet<i32> = [queue.pop().unwrap(), queue.pop().unwrap()].into();
        assert_eq!(got, HashSet::from([1, 2]));
        assert_eq!(queue.pop(), None);
    }
}

#[test]
fn one_element_two_consumers() {
    for _ in 0..200 {
        let queue = Arc::new(MultiConsumerQueue::new());
        queue.push(7);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    queue.pop()
                })
            })
            .collect();
        let mut results: Vec<Option<i32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![None, Some(7)]);
    }
}

#[test]
fn completed_push_visible_to_consumer() {
    for _ in 0..200 {
        let mut queue = SingleConsumerQueue::new();
        let producer = queue.producer();
        thread::spawn(move || producer.push(5)).join().unwrap();

        let consumer = thread::spawn(move || {
            let got = queue.pop();
            (got, queue.pop())
        });
        assert_eq!(consumer.join().unwrap(), (Some(5), None));
    }
}
