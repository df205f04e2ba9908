//! Failure ledger: rejected events and permanently failed batches.
//!
//! The ledger is shared between the queue (validation rejects) and its dispatch tasks
//! (permanent failures). Records are appended and never edited. Retention is capped: once
//! `capacity` records are held, appending evicts the oldest one and bumps [`FailureLedger::evicted`].
//! Use [`FailureLedger::unbounded`] to keep everything.

use crate::batch::Batch;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Why a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The validation hook refused an event.
    PayloadValidationError,
    /// A batch exhausted every configured endpoint.
    RejectedPayload,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadValidationError => f.write_str("PAYLOAD_VALIDATION_ERROR"),
            Self::RejectedPayload => f.write_str("REJECTED_PAYLOAD"),
        }
    }
}

/// What the record refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FailurePayload<T> {
    Event(T),
    Batch(Batch<T>),
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord<T> {
    pub kind: FailureKind,
    pub payload: FailurePayload<T>,
}

impl<T> FailureRecord<T> {
    pub fn rejected_event(event: T) -> Self {
        Self { kind: FailureKind::PayloadValidationError, payload: FailurePayload::Event(event) }
    }

    pub fn rejected_batch(batch: Batch<T>) -> Self {
        Self { kind: FailureKind::RejectedPayload, payload: FailurePayload::Batch(batch) }
    }

    pub fn batch(&self) -> Option<&Batch<T>> {
        match &self.payload {
            FailurePayload::Batch(batch) => Some(batch),
            FailurePayload::Event(_) => None,
        }
    }

    pub fn event(&self) -> Option<&T> {
        match &self.payload {
            FailurePayload::Event(event) => Some(event),
            FailurePayload::Batch(_) => None,
        }
    }
}

/// Wire shape: `{"type": "...", "payload": ...}`.
impl<T: Serialize> Serialize for FailureRecord<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("FailureRecord", 2)?;
        record.serialize_field("type", &self.kind)?;
        record.serialize_field("payload", &self.payload)?;
        record.end()
    }
}

/// Shared, capped, append-only record of failures.
#[derive(Debug)]
pub struct FailureLedger<T> {
    records: Arc<Mutex<VecDeque<FailureRecord<T>>>>,
    capacity: usize,
    recorded: Arc<AtomicU64>,
    evicted: Arc<AtomicU64>,
}

impl<T> Clone for FailureLedger<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            capacity: self.capacity,
            recorded: self.recorded.clone(),
            evicted: self.evicted.clone(),
        }
    }
}

impl<T: Clone> FailureLedger<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            recorded: Arc::new(AtomicU64::new(0)),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(usize::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FailureRecord<T>>> {
        // no critical section leaves the deque half-updated, so poisoning is ignored
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record, evicting the oldest one if the ledger is full.
    pub fn append(&self, record: FailureRecord<T>) {
        let mut records = self.lock();
        self.push_locked(&mut records, record);
    }

    /// Append and return the full ledger as it stands right after the append.
    pub fn append_and_snapshot(&self, record: FailureRecord<T>) -> Vec<FailureRecord<T>> {
        let mut records = self.lock();
        self.push_locked(&mut records, record);
        records.iter().cloned().collect()
    }

    fn push_locked(&self, records: &mut VecDeque<FailureRecord<T>>, record: FailureRecord<T>) {
        if records.len() >= self.capacity {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(record);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records in append order.
    pub fn snapshot(&self) -> Vec<FailureRecord<T>> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends ever made, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.lock().iter().filter(|r| r.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_in_append_order() {
        let ledger = FailureLedger::unbounded();
        ledger.append(FailureRecord::rejected_event(1));
        ledger.append(FailureRecord::rejected_batch(Batch::new(vec![2, 3])));

        let records = ledger.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event(), Some(&1));
        assert_eq!(records[1].batch().map(|b| b.events().to_vec()), Some(vec![2, 3]));
        assert_eq!(ledger.count(FailureKind::PayloadValidationError), 1);
        assert_eq!(ledger.count(FailureKind::RejectedPayload), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let ledger = FailureLedger::with_capacity(3);
        for n in 0..5 {
            ledger.append(FailureRecord::rejected_event(n));
        }
        let kept: Vec<_> = ledger.snapshot().iter().filter_map(|r| r.event().copied()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(ledger.evicted(), 2);
        assert_eq!(ledger.total_recorded(), 5);
        assert_eq!(ledger.len(), ledger.capacity());
    }

    #[test]
    fn snapshot_after_append_includes_new_record() {
        let ledger = FailureLedger::with_capacity(10);
        ledger.append(FailureRecord::rejected_event(0));
        let all = ledger.append_and_snapshot(FailureRecord::rejected_batch(Batch::new(vec![9])));
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].kind, FailureKind::RejectedPayload);
    }

    #[test]
    fn clones_share_records() {
        let ledger = FailureLedger::unbounded();
        let other = ledger.clone();
        other.append(FailureRecord::rejected_event("x"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = serde_json::to_value(FailureRecord::rejected_event(json!({"a": 1}))).unwrap();
        assert_eq!(event, json!({"type": "PAYLOAD_VALIDATION_ERROR", "payload": {"a": 1}}));

        let batch = serde_json::to_value(FailureRecord::rejected_batch(Batch::new(vec![1, 2])))
            .unwrap();
        assert_eq!(batch, json!({"type": "REJECTED_PAYLOAD", "payload": [1, 2]}));
    }
}
