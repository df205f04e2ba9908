//! The delivery queue: accumulator, flush trigger, dispatcher and ledger wired together.
//!
//! All queue mutation (push, flush, timer firing) happens under one mutex held only for the
//! synchronous critical section. Batches are dispatched on their own tasks, so sends and
//! backoff sleeps never hold the lock and pushes keep flowing while batches are in flight.
//!
//! Example
//! ```rust
//! use flightq::{DeliveryQueue, EndpointConfig, MemoryReporter, PushOutcome, QueueConfig};
//! # use flightq::{DeliveryRequest, DeliveryResponse, Transport, TransportError};
//! # #[derive(Debug)]
//! # struct Accepting;
//! # #[async_trait::async_trait]
//! # impl Transport for Accepting {
//! #     async fn send(&self, _: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
//! #         Ok(DeliveryResponse::new(200))
//! #     }
//! # }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = QueueConfig::builder()
//!     .buffer_size(2)
//!     .primary(EndpointConfig::primary("https://collector.example.com/events"))
//!     .build()
//!     .unwrap();
//! let queue = DeliveryQueue::builder(config, Accepting)
//!     .reporter(MemoryReporter::new())
//!     .build();
//!
//! assert_eq!(queue.push("page_view"), PushOutcome::Accepted);
//! assert!(matches!(queue.push("click"), PushOutcome::Flushed(_)));
//! queue.shutdown().await;
//! # });
//! ```

use crate::accumulator::Accumulator;
use crate::batch::{BatchId, Event};
use crate::config::QueueConfig;
use crate::dispatch::Dispatcher;
use crate::error::DeliveryError;
use crate::hooks::Hooks;
use crate::ledger::{FailureLedger, FailureRecord};
use crate::report::{LogReporter, Report, ReportPump, Reporter};
use crate::telemetry::{Emitter, FlushEvent, IntakeEvent, NullSink, QueueEvent, TelemetrySink};
use crate::transport::Transport;
use crate::trigger::{FlushTrigger, PushAction, TimerAction, TimerSlot};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What happened to a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued; no flush yet.
    Accepted,
    /// Queued, and the push filled the buffer: the batch was flushed.
    Flushed(BatchId),
    /// Refused by the validation hook and recorded in the ledger.
    Rejected,
    /// The queue has been shut down.
    Closed,
}

impl PushOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::Flushed(_))
    }
}

struct State<T> {
    accumulator: Accumulator<T>,
    timer: TimerSlot,
    in_flight: JoinSet<()>,
}

struct Inner<T> {
    trigger: FlushTrigger,
    hooks: Hooks<T>,
    ledger: FailureLedger<T>,
    /// Absent when no primary URL is configured: batches are handed upward instead.
    dispatcher: Option<Arc<Dispatcher<T>>>,
    reports: ReportPump<T>,
    telemetry: Emitter,
    runtime: Handle,
    closed: AtomicBool,
    /// Dispatch tasks that have not finished yet. Waiters only hold a receiver.
    active: Arc<watch::Sender<usize>>,
    state: Mutex<State<T>>,
}

/// Counts one dispatch task as active until dropped, panics included.
struct ActiveDispatch(Arc<watch::Sender<usize>>);

impl ActiveDispatch {
    fn start(active: &Arc<watch::Sender<usize>>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(active.clone())
    }
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Batches events and delivers them to the configured endpoints.
///
/// Cloning is cheap and every clone drives the same queue. Construction spawns a reporting
/// task, so it must happen inside a Tokio runtime; after that, [`push`](Self::push) and
/// [`flush`](Self::flush) may be called from any thread.
pub struct DeliveryQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> fmt::Debug for DeliveryQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("trigger", &self.inner.trigger)
            .field("hooks", &self.inner.hooks)
            .field("dispatcher", &self.inner.dispatcher)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Event> DeliveryQueue<T> {
    /// Start building a queue that sends through `transport`.
    pub fn builder<X>(config: QueueConfig, transport: X) -> DeliveryQueueBuilder<T>
    where
        X: Transport + 'static,
    {
        DeliveryQueueBuilder::new(config, Arc::new(transport))
    }

    /// Enqueue one event.
    ///
    /// Runs the validation hook first; a refused event is recorded in the ledger and never
    /// queued. Otherwise the flush trigger decides whether to arm the timer or flush now.
    pub fn push(&self, event: T) -> PushOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        if !self.inner.hooks.is_valid(&event) {
            warn!(?event, error = %DeliveryError::Validation, "event dropped");
            self.inner.ledger.append(FailureRecord::rejected_event(event));
            self.inner.emit(QueueEvent::Intake(IntakeEvent::Rejected));
            return PushOutcome::Rejected;
        }

        let mut state = self.inner.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return PushOutcome::Closed;
        }
        let was_empty = state.accumulator.is_empty();
        let pending = state.accumulator.push(event);
        self.inner.emit(QueueEvent::Intake(IntakeEvent::Accepted { pending }));

        match self.inner.trigger.on_push(pending, was_empty) {
            PushAction::Nothing => PushOutcome::Accepted,
            PushAction::ArmTimer(interval) => {
                self.inner.emit(QueueEvent::Flush(FlushEvent::TimerArmed { interval }));
                self.inner.arm_timer(&mut state, interval);
                PushOutcome::Accepted
            }
            PushAction::Flush => match self.inner.flush_locked(&mut state, false) {
                Some(batch_id) => PushOutcome::Flushed(batch_id),
                None => PushOutcome::Accepted,
            },
        }
    }

    /// Flush pending events.
    ///
    /// With `force` everything pending is flushed; without it the flush only happens when the
    /// buffer is full. Returns the id of the batch formed, if any.
    pub fn flush(&self, force: bool) -> Option<BatchId> {
        let mut state = self.inner.lock();
        if !force && !self.inner.trigger.is_full(state.accumulator.len()) {
            return None;
        }
        self.inner.flush_locked(&mut state, force)
    }

    /// Wait until every in-flight dispatch has settled and every report has been handed to the
    /// reporter. New pushes are still accepted.
    ///
    /// Dropping the returned future stops the wait only; in-flight sends keep running.
    pub async fn idle(&self) {
        let mut active = self.inner.active.subscribe();
        // the sender lives as long as `inner`, so this only returns once the count hits zero
        let _ = active.wait_for(|n| *n == 0).await;
        reap(&mut *self.inner.lock());
        self.inner.reports.drained().await;
    }

    /// Run the before-shutdown hook, force a final flush, stop the timer, and wait for every
    /// in-flight batch to settle.
    ///
    /// Later pushes return [`PushOutcome::Closed`]. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        if !self.is_closed() {
            // the hook may still push a last event
            self.inner.hooks.run_before_shutdown();
        }
        {
            let mut state = self.inner.lock();
            if !self.inner.closed.swap(true, Ordering::AcqRel) {
                if let Some(batch_id) = self.inner.flush_locked(&mut state, true) {
                    debug!(batch_id = %batch_id, "final flush on shutdown");
                }
            }
            state.timer.cancel();
        }
        self.idle().await;
        info!(
            failures = self.inner.ledger.len(),
            evicted = self.inner.ledger.evicted(),
            "delivery queue shut down"
        );
    }

    /// Run the before-shutdown hook, if any.
    pub fn run_before_shutdown(&self) {
        self.inner.hooks.run_before_shutdown();
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().accumulator.len()
    }

    /// Copy of the events waiting for the next flush.
    pub fn pending(&self) -> Vec<T> {
        self.inner.lock().accumulator.pending().to_vec()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner.lock().timer.is_armed()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Dispatch tasks still running.
    pub fn in_flight(&self) -> usize {
        *self.inner.active.borrow()
    }

    pub fn ledger(&self) -> &FailureLedger<T> {
        &self.inner.ledger
    }

    /// False when batches are handed upward instead of sent.
    pub fn delivers(&self) -> bool {
        self.inner.dispatcher.is_some()
    }
}

impl<T: Event> Inner<T> {
    fn emit(&self, event: QueueEvent) {
        self.telemetry.emit_now(event, &self.runtime);
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // every critical section leaves the state consistent, so poisoning is ignored
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State<T>, interval: Duration) {
        let generation = state.timer.next_generation();
        let queue: Weak<Self> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(queue) = queue.upgrade() {
                queue.on_timer(generation);
            }
        });
        state.timer.install(generation, task.abort_handle());
        debug!(?interval, generation, "flush timer armed");
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if !state.timer.is_current(generation) {
            debug!(generation, "stale flush timer ignored");
            return;
        }
        state.timer.release(generation);

        let pending = state.accumulator.len();
        match self.trigger.on_timer(pending) {
            TimerAction::Rearm(interval) => {
                self.emit(QueueEvent::Flush(FlushEvent::TimerRearmed { pending }));
                self.arm_timer(&mut state, interval);
            }
            TimerAction::Flush => {
                self.flush_locked(&mut state, false);
            }
        }
    }

    /// Snapshot, clear, and hand the batch on. The timer slot is cleared either way.
    fn flush_locked(self: &Arc<Self>, state: &mut State<T>, forced: bool) -> Option<BatchId> {
        state.timer.cancel();
        let batch = state.accumulator.snapshot_and_clear();
        if batch.is_empty() {
            return None;
        }

        let batch_id = batch.id();
        let size = batch.len();
        debug!(batch_id = %batch_id, size, forced, "flushing batch");
        self.emit(QueueEvent::Flush(FlushEvent::Flushed { batch_id, size, forced }));

        match &self.dispatcher {
            Some(dispatcher) => {
                reap(state);
                let dispatcher = dispatcher.clone();
                let active = ActiveDispatch::start(&self.active);
                state.in_flight.spawn_on(
                    async move {
                        let _active = active;
                        dispatcher.dispatch(batch).await;
                    },
                    &self.runtime,
                );
            }
            None => {
                self.emit(QueueEvent::Flush(FlushEvent::HandedUpward { batch_id, size }));
                self.reports.send(Report::BufferReached { batch });
            }
        }
        Some(batch_id)
    }
}

/// Join finished dispatch tasks without waiting, logging any that panicked.
fn reap<T>(state: &mut State<T>) {
    while let Some(joined) = state.in_flight.try_join_next() {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "dispatch task panicked");
            }
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        state.timer.cancel();
        // let in-flight sends finish on their own
        state.in_flight.detach_all();
    }
}

/// Builder for [`DeliveryQueue`].
pub struct DeliveryQueueBuilder<T> {
    config: QueueConfig,
    transport: Arc<dyn Transport>,
    hooks: Hooks<T>,
    reporter: Arc<dyn Reporter<T>>,
    telemetry: Emitter,
}

impl<T: Event> DeliveryQueueBuilder<T> {
    fn new(config: QueueConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            hooks: Hooks::new(),
            reporter: Arc::new(LogReporter),
            telemetry: Emitter::new(NullSink),
        }
    }

    pub fn hooks(mut self, hooks: Hooks<T>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Where upward reports go. Defaults to [`LogReporter`].
    pub fn reporter<R>(mut self, reporter: R) -> Self
    where
        R: Reporter<T> + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Attach a telemetry sink. Defaults to [`NullSink`].
    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.telemetry = Emitter::new(sink);
        self
    }

    /// Build the queue.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn build(self) -> DeliveryQueue<T> {
        let runtime = Handle::current();
        let ledger = FailureLedger::with_capacity(self.config.ledger_capacity());
        let (reports, _pump) = ReportPump::spawn(self.reporter, &runtime);

        let dispatcher = match self.config.delivery_endpoint() {
            Some(primary) => Some(Arc::new(Dispatcher::new(
                self.transport,
                primary.clone(),
                self.config.fallback_endpoint().cloned(),
                ledger.clone(),
                reports.clone(),
                self.telemetry.clone(),
            ))),
            None => {
                info!("no primary endpoint configured; full batches are reported upward");
                None
            }
        };

        let trigger = FlushTrigger::new(self.config.interval(), self.config.buffer_size());
        DeliveryQueue {
            inner: Arc::new(Inner {
                trigger,
                hooks: self.hooks,
                ledger,
                dispatcher,
                reports,
                telemetry: self.telemetry,
                runtime,
                closed: AtomicBool::new(false),
                active: Arc::new(watch::channel(0).0),
                state: Mutex::new(State {
                    accumulator: Accumulator::with_capacity(trigger.buffer_size()),
                    timer: TimerSlot::new(),
                    in_flight: JoinSet::new(),
                }),
            }),
        }
    }
}

impl<T> fmt::Debug for DeliveryQueueBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueueBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("hooks", &self.hooks)
            .finish()
    }
}
