//! Immutable batches of events.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bound for values the queue can carry.
///
/// Events are opaque to the queue; they only need to be cloneable, serializable (to become a
/// request body), and shareable with the dispatch tasks.
pub trait Event: Clone + Serialize + fmt::Debug + Send + Sync + 'static {}

impl<T> Event for T where T: Clone + Serialize + fmt::Debug + Send + Sync + 'static {}

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique batch identifier, increasing in flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BatchId(u64);

impl BatchId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered, immutable snapshot of events flushed together.
///
/// Cloning a batch is cheap and shares the same events; nothing can mutate them once the batch
/// is formed.
#[derive(Clone)]
pub struct Batch<T> {
    id: BatchId,
    events: Arc<[T]>,
}

impl<T> Batch<T> {
    pub(crate) fn new(events: Vec<T>) -> Self {
        Self { id: BatchId::next(), events: events.into() }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn events(&self) -> &[T] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.events.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").field("id", &self.id).field("events", &&*self.events).finish()
    }
}

impl<T: PartialEq> PartialEq for Batch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.events == other.events
    }
}

/// Batches serialize as the bare event array, which is also the request body.
impl<T: Serialize> Serialize for Batch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.events.serialize(serializer)
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_increase_in_creation_order() {
        let a = Batch::new(vec![1]);
        let b = Batch::new(vec![2]);
        assert!(b.id() > a.id());
    }

    #[test]
    fn clones_share_events() {
        let batch = Batch::new(vec!["a".to_string(), "b".to_string()]);
        let copy = batch.clone();
        assert_eq!(batch, copy);
        assert!(std::ptr::eq(batch.events().as_ptr(), copy.events().as_ptr()));
    }

    #[test]
    fn serializes_as_event_array() {
        let batch = Batch::new(vec![json!({"n": 1}), json!({"n": 2})]);
        let encoded = serde_json::to_value(&batch).unwrap();
        assert_eq!(encoded, json!([{"n": 1}, {"n": 2}]));
    }

    #[test]
    fn display_id() {
        assert_eq!(BatchId::new(42).to_string(), "#42");
    }
}
