//! Flush decisions and the singular timer slot.
//!
//! Decisions are pure: [`FlushTrigger`] looks at the pending count and says what should happen;
//! the queue carries it out. Two modes exist:
//!
//! - no interval: the push that brings the buffer to `buffer_size` flushes immediately;
//! - with an interval: the first push into an empty buffer arms a timer, and each firing either
//!   flushes (buffer full) or re-arms (buffer not yet full).
//!
//! A forced flush ignores both and takes whatever is pending.

use std::time::Duration;
use tokio::task::AbortHandle;

/// What the queue should do after a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    Nothing,
    /// First event after empty in timer mode.
    ArmTimer(Duration),
    /// Buffer reached its size with no timer configured.
    Flush,
}

/// What the queue should do when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Buffer not full yet: arm another period instead of sending a short batch.
    Rearm(Duration),
    Flush,
}

/// Size/interval flush policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTrigger {
    interval: Duration,
    buffer_size: usize,
}

impl FlushTrigger {
    pub fn new(interval: Duration, buffer_size: usize) -> Self {
        Self { interval, buffer_size: buffer_size.max(1) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn timer_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn is_full(&self, pending: usize) -> bool {
        pending >= self.buffer_size
    }

    /// `pending` counts the event just pushed; `was_empty` is the state before it.
    pub fn on_push(&self, pending: usize, was_empty: bool) -> PushAction {
        if self.timer_enabled() {
            if was_empty {
                PushAction::ArmTimer(self.interval)
            } else {
                PushAction::Nothing
            }
        } else if self.is_full(pending) {
            PushAction::Flush
        } else {
            PushAction::Nothing
        }
    }

    pub fn on_timer(&self, pending: usize) -> TimerAction {
        if self.is_full(pending) {
            TimerAction::Flush
        } else {
            TimerAction::Rearm(self.interval)
        }
    }
}

/// Holds at most one live timer task.
///
/// Every arm bumps the generation and aborts the previous task, so a timer that already woke up
/// and is waiting for the queue lock sees a stale generation and does nothing.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the generation for a timer about to be spawned, cancelling any pending one.
    pub fn next_generation(&mut self) -> u64 {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Record the task spawned for `generation`.
    pub fn install(&mut self, generation: u64, handle: AbortHandle) {
        if generation == self.generation {
            self.handle = Some(handle);
        } else {
            handle.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    /// Abort the pending timer, if any. Also invalidates a timer that is mid-firing.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Forget the timer that just fired without aborting the running task.
    pub fn release(&mut self, generation: u64) {
        if self.generation == generation {
            self.handle = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}
