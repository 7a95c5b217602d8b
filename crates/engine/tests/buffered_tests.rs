//! Integration tests for buffered ingestion and barrier semantics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use serde_json::json;

use streamfuse_engine::prelude::*;

fn sorted_ints(snapshot: Message) -> Vec<i64> {
    let Message::Array(items) = snapshot else {
        panic!("expected an array snapshot, got {snapshot:?}");
    };
    let mut values: Vec<i64> = items.iter().map(|v| v.as_i64().unwrap()).collect();
    values.sort_unstable();
    values
}

#[test]
fn flush_barrier_observes_every_message() {
    // Capacity 2 forces internal flushes mid-stream; the barrier must still
    // observe all five messages.
    let descriptor = Descriptor::from(buffered(accumulator(), BufferConfig { capacity: 2 }));
    let op = instantiate(&descriptor, CreateOptions::default()).unwrap();

    for i in 0..5 {
        op.process(json!(i)).unwrap();
    }
    flush(op.as_ref()).unwrap();
    assert_eq!(sorted_ints(snapshot(op.as_ref())), vec![0, 1, 2, 3, 4]);
}

#[test]
fn concurrent_producers_do_not_lose_messages() {
    let descriptor = Descriptor::from(buffered(accumulator(), BufferConfig { capacity: 16 }));
    let op = instantiate(&descriptor, CreateOptions::default()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|producer: i64| {
            let op = Arc::clone(&op);
            thread::spawn(move || {
                for i in 0..250 {
                    op.process(json!(producer * 1000 + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    flush(op.as_ref()).unwrap();
    let values = sorted_ints(snapshot(op.as_ref()));
    assert_eq!(values.len(), 1000);
    let mut expected: Vec<i64> = (0..4)
        .flat_map(|p| (0..250).map(move |i| p * 1000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(values, expected);
}

#[test]
fn flush_is_idempotent_between_batches() {
    let descriptor = Descriptor::from(buffered(accumulator(), BufferConfig { capacity: 8 }));
    let op = instantiate(&descriptor, CreateOptions::default()).unwrap();

    op.process(json!(1)).unwrap();
    flush(op.as_ref()).unwrap();
    flush(op.as_ref()).unwrap();
    op.process(json!(2)).unwrap();
    flush(op.as_ref()).unwrap();
    assert_eq!(sorted_ints(snapshot(op.as_ref())), vec![1, 2]);
}

#[test]
fn buffered_branch_inside_a_split_stays_consistent() {
    let sum = || {
        monoid(
            || json!(0),
            |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
        )
        .build()
    };

    // The monoid branch is non-concurrent, so split pins its buffered
    // ingestion to a stable shard through the execution affinity.
    let mut branches = BTreeMap::new();
    branches.insert(
        "total".to_string(),
        Descriptor::from(buffered(sum(), BufferConfig { capacity: 4 })),
    );
    branches.insert("seen".to_string(), Descriptor::seq([map_op(|m| m).into()]));

    let op = instantiate(&Descriptor::split(branches), CreateOptions::default()).unwrap();
    process(op.as_ref(), (1..=10).map(|i| json!(i)).collect()).unwrap();
    flush(op.as_ref()).unwrap();

    let result = snapshot(op.as_ref());
    assert_eq!(result["total"], json!(55));
    assert_eq!(sorted_ints(result["seen"].clone()), (1..=10).collect::<Vec<_>>());
}

#[test]
fn reset_after_flush_clears_the_downstream_state() {
    let descriptor = Descriptor::from(buffered(accumulator(), BufferConfig { capacity: 4 }));
    let op = instantiate(&descriptor, CreateOptions::default()).unwrap();

    for i in 0..6 {
        op.process(json!(i)).unwrap();
    }
    flush(op.as_ref()).unwrap();
    reset(op.as_ref());
    flush(op.as_ref()).unwrap();
    assert_eq!(snapshot(op.as_ref()), json!([]));
}
