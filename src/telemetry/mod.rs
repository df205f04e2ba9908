//! Telemetry for the delivery queue.
//!
//! Every stage of the queue emits structured [`QueueEvent`]s: intake (accepted / rejected),
//! the flush trigger (timer armed, re-armed, flushed, handed upward), and the dispatcher
//! (attempt failed, falling back, delivered, exhausted).
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<QueueEvent>` for composability. Emission is best-effort: a failing
//! sink never affects delivery.

pub mod events;
pub mod sinks;

pub use events::{event_to_json, DeliveryEvent, FlushEvent, IntakeEvent, QueueEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;

type EmitFn = dyn Fn(QueueEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased handle to the queue's telemetry sink.
#[derive(Clone)]
pub(crate) struct Emitter {
    emit: Arc<EmitFn>,
}

impl Emitter {
    pub(crate) fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        let emit = move |event| -> BoxFuture<'static, ()> {
            Box::pin(emit_best_effort(sink.clone(), event))
        };
        Self { emit: Arc::new(emit) }
    }

    /// Emit from async code; waits for the sink.
    pub(crate) async fn emit(&self, event: QueueEvent) {
        (self.emit)(event).await
    }

    /// Emit from synchronous code. Sinks that are ready immediately (all the built-in ones)
    /// record the event before this returns; anything else finishes on `runtime`.
    pub(crate) fn emit_now(&self, event: QueueEvent, runtime: &Handle) {
        let mut fut = (self.emit)(event);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        if let Poll::Pending = fut.as_mut().poll(&mut cx) {
            runtime.spawn(fut);
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(NullSink)
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Emitter(<sink>)")
    }
}
