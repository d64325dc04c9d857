//! CommandQueue ordering under concurrency.
//!
//! GREEN when:
//! - Sequential pushes come back from `take_next` in push order.
//! - With several producer threads pushing at once, every producer's own
//!   commands come back in the order it pushed them.
//! - With several consumer threads taking at once, every command is
//!   delivered exactly once and none is lost.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use mtb_broker::CommandQueue;

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 50;

#[test]
fn sequential_pushes_are_taken_in_order() {
    let q = CommandQueue::new();
    let pushed: Vec<_> = (0..20)
        .map(|i| q.push(&format!("cmd{i}"), "p").unwrap())
        .collect();

    let taken: Vec<_> = std::iter::from_fn(|| q.take_next()).map(|c| c.id).collect();
    let expected: Vec<_> = pushed.iter().map(|e| e.command.id).collect();
    assert_eq!(taken, expected);
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    let q = CommandQueue::new();
    // Gates must outlive the drain or dropping them retires the commands.
    let gates = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = q.clone();
            let gates = Arc::clone(&gates);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let e = q.push(&format!("p{p}"), &i.to_string()).unwrap();
                    gates.lock().unwrap().push(e.gate);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(q.pending_count(), PRODUCERS * PER_PRODUCER);

    let mut last_seen = vec![None::<usize>; PRODUCERS];
    let mut seen = HashSet::new();
    while let Some(cmd) = q.take_next() {
        assert!(seen.insert(cmd.id), "command {} delivered twice", cmd.id);
        let p: usize = cmd.name[1..].parse().unwrap();
        let i: usize = cmd.payload.parse().unwrap();
        if let Some(prev) = last_seen[p] {
            assert!(i > prev, "producer {p}: {i} taken after {prev}");
        }
        last_seen[p] = Some(i);
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
}

#[test]
fn concurrent_consumers_never_share_a_command() {
    let q = CommandQueue::new();
    let enqueued: Vec<_> = (0..400).map(|i| q.push("c", &i.to_string()).unwrap()).collect();
    let all: HashSet<_> = enqueued.iter().map(|e| e.command.id).collect();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let q = q.clone();
            thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(c) = q.take_next() {
                    mine.push(c.id);
                }
                mine
            })
        })
        .collect();

    let mut delivered = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(delivered.insert(id), "command {id} delivered twice");
        }
    }
    assert_eq!(delivered, all);
    assert_eq!(q.inflight_count(), 400);
    assert!(!q.has_pending());
}
