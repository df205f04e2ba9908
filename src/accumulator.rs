//! Pending events awaiting a flush.

use crate::batch::Batch;

/// Arrival-ordered buffer of events not yet flushed.
#[derive(Debug)]
pub struct Accumulator<T> {
    pending: Vec<T>,
}

impl<T> Accumulator<T> {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { pending: Vec::with_capacity(capacity) }
    }

    /// Append at the tail. Returns the new pending count.
    pub fn push(&mut self, event: T) -> usize {
        self.pending.push(event);
        self.pending.len()
    }

    /// Move every pending event into a new batch, leaving the accumulator empty.
    ///
    /// Taking `&mut self` makes snapshot and reset one step: no event can be observed by two
    /// snapshots.
    pub fn snapshot_and_clear(&mut self) -> Batch<T> {
        let capacity = self.pending.capacity();
        Batch::new(std::mem::replace(&mut self.pending, Vec::with_capacity(capacity)))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[T] {
        &self.pending
    }
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_arrival_order() {
        let mut acc = Accumulator::new();
        for n in 0..10 {
            acc.push(n);
        }
        let batch = acc.snapshot_and_clear();
        assert_eq!(batch.events(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(acc.is_empty());
    }

    #[test]
    fn snapshots_never_share_events() {
        let mut acc = Accumulator::new();
        acc.push("a");
        acc.push("b");
        let first = acc.snapshot_and_clear();
        acc.push("c");
        let second = acc.snapshot_and_clear();
        assert_eq!(first.events(), &["a", "b"]);
        assert_eq!(second.events(), &["c"]);
        assert!(acc.snapshot_and_clear().is_empty());
    }

    #[test]
    fn push_reports_pending_count() {
        let mut acc = Accumulator::with_capacity(2);
        assert_eq!(acc.push(1), 1);
        assert_eq!(acc.push(2), 2);
        assert_eq!(acc.push(3), 3);
        assert_eq!(acc.pending(), &[1, 2, 3]);
        acc.clear();
        assert_eq!(acc.len(), 0);
    }
}
