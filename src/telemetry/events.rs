use crate::batch::BatchId;
use crate::config::EndpointRole;
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Queue events emitted while events flow through the queue.
///
/// Events describe what the queue did, never the payloads themselves, so sinks can forward them
/// to external systems without leaking user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Accumulator events
    Intake(IntakeEvent),
    /// Flush trigger events
    Flush(FlushEvent),
    /// Dispatcher events
    Delivery(DeliveryEvent),
}

/// Events emitted when events are pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeEvent {
    /// The event entered the accumulator.
    Accepted {
        /// Pending events including this one
        pending: usize,
    },
    /// The validation hook refused the event.
    Rejected,
}

/// Events emitted by the flush trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushEvent {
    /// A timer was armed for the first event after empty.
    TimerArmed { interval: Duration },
    /// The timer fired on a short buffer and was armed again.
    TimerRearmed {
        /// Pending events at the time of firing
        pending: usize,
    },
    /// The accumulator was snapshotted into a batch.
    Flushed { batch_id: BatchId, size: usize, forced: bool },
    /// No primary endpoint: the batch was handed to the reporter instead of sent.
    HandedUpward { batch_id: BatchId, size: usize },
}

/// Events emitted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// One attempt failed; `status` is absent for transport-level errors.
    AttemptFailed { batch_id: BatchId, role: EndpointRole, attempt: usize, status: Option<u16> },
    /// Primary attempts exhausted; switching to the fallback endpoint.
    FallingBack { batch_id: BatchId },
    /// The batch was accepted by an endpoint.
    Delivered { batch_id: BatchId, role: EndpointRole, attempts: usize },
    /// Every attempt on every endpoint failed.
    Exhausted { batch_id: BatchId, attempts: usize },
}

impl fmt::Display for QueueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEvent::Intake(event) => write!(f, "Intake::{}", event),
            QueueEvent::Flush(event) => write!(f, "Flush::{}", event),
            QueueEvent::Delivery(event) => write!(f, "Delivery::{}", event),
        }
    }
}

impl fmt::Display for IntakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeEvent::Accepted { pending } => write!(f, "Accepted(pending={})", pending),
            IntakeEvent::Rejected => write!(f, "Rejected"),
        }
    }
}

impl fmt::Display for FlushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushEvent::TimerArmed { interval } => write!(f, "TimerArmed({:?})", interval),
            FlushEvent::TimerRearmed { pending } => write!(f, "TimerRearmed(pending={})", pending),
            FlushEvent::Flushed { batch_id, size, forced } => {
                write!(f, "Flushed({}, size={}, forced={})", batch_id, size, forced)
            }
            FlushEvent::HandedUpward { batch_id, size } => {
                write!(f, "HandedUpward({}, size={})", batch_id, size)
            }
        }
    }
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryEvent::AttemptFailed { batch_id, role, attempt, status } => match status {
                Some(status) => {
                    write!(f, "AttemptFailed({}, {} #{}, status={})", batch_id, role, attempt, status)
                }
                None => write!(f, "AttemptFailed({}, {} #{})", batch_id, role, attempt),
            },
            DeliveryEvent::FallingBack { batch_id } => write!(f, "FallingBack({})", batch_id),
            DeliveryEvent::Delivered { batch_id, role, attempts } => {
                write!(f, "Delivered({}, {}, attempts={})", batch_id, role, attempts)
            }
            DeliveryEvent::Exhausted { batch_id, attempts } => {
                write!(f, "Exhausted({}, attempts={})", batch_id, attempts)
            }
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a QueueEvent into a JSON value for sinks.
pub fn event_to_json(event: &QueueEvent) -> serde_json::Value {
    match event {
        QueueEvent::Intake(i) => match i {
            IntakeEvent::Accepted { pending } => {
                json!({ "kind": "event_accepted", "pending": *pending })
            }
            IntakeEvent::Rejected => json!({ "kind": "event_rejected" }),
        },
        QueueEvent::Flush(fl) => match fl {
            FlushEvent::TimerArmed { interval } => json!({
                "kind": "timer_armed",
                "interval_ms": clamp_u64(interval.as_millis()),
            }),
            FlushEvent::TimerRearmed { pending } => {
                json!({ "kind": "timer_rearmed", "pending": *pending })
            }
            FlushEvent::Flushed { batch_id, size, forced } => json!({
                "kind": "flushed",
                "batch_id": batch_id.get(),
                "size": *size,
                "forced": *forced,
            }),
            FlushEvent::HandedUpward { batch_id, size } => json!({
                "kind": "handed_upward",
                "batch_id": batch_id.get(),
                "size": *size,
            }),
        },
        QueueEvent::Delivery(d) => match d {
            DeliveryEvent::AttemptFailed { batch_id, role, attempt, status } => json!({
                "kind": "attempt_failed",
                "batch_id": batch_id.get(),
                "role": role.to_string(),
                "attempt": *attempt,
                "status": status,
            }),
            DeliveryEvent::FallingBack { batch_id } => {
                json!({ "kind": "falling_back", "batch_id": batch_id.get() })
            }
            DeliveryEvent::Delivered { batch_id, role, attempts } => json!({
                "kind": "delivered",
                "batch_id": batch_id.get(),
                "role": role.to_string(),
                "attempts": *attempts,
            }),
            DeliveryEvent::Exhausted { batch_id, attempts } => json!({
                "kind": "exhausted",
                "batch_id": batch_id.get(),
                "attempts": *attempts,
            }),
        },
    }
}
