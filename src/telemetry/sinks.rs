use super::events::{DeliveryEvent, FlushEvent, IntakeEvent, QueueEvent};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Anything the queue can hand its [`QueueEvent`]s to.
///
/// Sinks are cloned per event and may be driven from any thread, so they must be cheap to
/// clone and `Sync`. Their futures are polled once inline; a sink that is not done by then
/// finishes on the queue's runtime.
pub trait TelemetrySink:
    Service<QueueEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    /// The error type for this sink. Errors are dropped and never reach delivery.
    type SinkError: std::error::Error + Send + 'static;
}

/// Drive one event through `sink`, honoring `poll_ready` and dropping any error.
pub async fn emit_best_effort<S>(sink: S, event: QueueEvent)
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Discards every event. The queue's default.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<QueueEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: QueueEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events with `tracing`.
///
/// Routine intake and flush traffic goes to `debug`; failed attempts and rejects to `warn`;
/// exhausted batches to `error`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<QueueEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QueueEvent) -> Self::Future {
        match event {
            QueueEvent::Intake(IntakeEvent::Rejected)
            | QueueEvent::Delivery(DeliveryEvent::AttemptFailed { .. })
            | QueueEvent::Delivery(DeliveryEvent::FallingBack { .. }) => {
                tracing::warn!(event = %event, "queue_event");
            }
            QueueEvent::Delivery(DeliveryEvent::Exhausted { .. }) => {
                tracing::error!(event = %event, "queue_event");
            }
            QueueEvent::Flush(FlushEvent::Flushed { .. } | FlushEvent::HandedUpward { .. })
            | QueueEvent::Delivery(DeliveryEvent::Delivered { .. }) => {
                tracing::info!(event = %event, "queue_event");
            }
            _ => tracing::debug!(event = %event, "queue_event"),
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory, evicting the oldest past `capacity`.
///
/// Clones share storage: keep one handle and give the queue another.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<QueueEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<QueueEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Retained events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&QueueEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Dispatcher events only, oldest first.
    pub fn deliveries(&self) -> Vec<DeliveryEvent> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Delivery(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to stay within `capacity`.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<QueueEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    // recorded in `call`, not in the future, so the event lands even if nobody polls it
    fn call(&mut self, event: QueueEvent) -> Self::Future {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
