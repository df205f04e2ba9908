#![allow(missing_docs)]

mod common;

use common::test_helpers::{ScriptedTransport, PRIMARY};
use flightq::{DeliveryQueue, EndpointConfig, FailureKind, FailureLedger, FailureRecord, Hooks, MemoryReporter, QueueConfig};

#[test]
fn capped_ledger_keeps_the_newest_records() {
    let ledger = FailureLedger::with_capacity(3);
    for n in 0..5 {
        ledger.append(FailureRecord::rejected_event(n));
    }

    let kept: Vec<i32> = ledger.snapshot().iter().filter_map(|r| r.event().copied()).collect();
    assert_eq!(kept, vec![2, 3, 4]);
    assert_eq!(ledger.evicted(), 2);
    assert_eq!(ledger.total_recorded(), 5);
}

#[test]
fn unbounded_ledger_never_evicts() {
    let ledger = FailureLedger::unbounded();
    for n in 0..1_000 {
        ledger.append(FailureRecord::rejected_event(n));
    }
    assert_eq!(ledger.len(), 1_000);
    assert_eq!(ledger.evicted(), 0);
}

#[tokio::test]
async fn queue_ledger_follows_configured_capacity() {
    let config = QueueConfig::builder()
        .buffer_size(4)
        .primary(EndpointConfig::primary(PRIMARY))
        .ledger_capacity(2)
        .build()
        .unwrap();
    let queue = DeliveryQueue::builder(config, ScriptedTransport::new().always(PRIMARY, 200))
        .hooks(Hooks::new().with_validation(|_: &u8| false))
        .reporter(MemoryReporter::new())
        .build();

    for n in 0..5 {
        queue.push(n);
    }

    let ledger = queue.ledger();
    assert_eq!(ledger.capacity(), 2);
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.evicted(), 3);
    assert_eq!(ledger.count(FailureKind::PayloadValidationError), 2);
    assert_eq!(ledger.snapshot()[1].event(), Some(&4));
}

#[tokio::test]
async fn unbounded_config_keeps_everything() {
    let config = QueueConfig::builder().unbounded_ledger().build().unwrap();
    let queue = DeliveryQueue::builder(config, ScriptedTransport::new())
        .hooks(Hooks::new().with_validation(|_: &u8| false))
        .reporter(MemoryReporter::new())
        .build();
    for n in 0..50 {
        queue.push(n);
    }
    assert_eq!(queue.ledger().len(), 50);
}
