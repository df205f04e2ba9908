//! Retry and fallback state machine for one batch.
//!
//! Semantics:
//! - An endpoint with `retry_count = R` gets `R + 1` attempts, strictly sequential, separated by
//!   its [`Backoff`](crate::Backoff) delay (none by default).
//! - Exhausting the primary moves the batch to the fallback endpoint, when one with a URL is
//!   configured, starting again at attempt 1.
//! - Exhausting the fallback (or the primary when there is no fallback) is terminal: a
//!   `RejectedPayload` record is appended to the ledger and the batch is reported upward along
//!   with the whole ledger.
//!
//! Invariants:
//! - The batch body is encoded once and reused for every attempt.
//! - Sends are never cancelled; a batch settles only as `Succeeded` or `FailedPermanent`.

use crate::batch::{Batch, BatchId, Event};
use crate::config::{EndpointConfig, EndpointRole};
use crate::error::{DeliveryError, TransportError};
use crate::ledger::{FailureLedger, FailureRecord};
use crate::report::{Report, ReportPump};
use crate::telemetry::{DeliveryEvent, Emitter, QueueEvent};
use crate::transport::{send_checked, DeliveryRequest, DeliveryResponse, Transport};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Where a batch is in its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// About to send attempt `attempt` (1-based) to `role`.
    Attempting { role: EndpointRole, attempt: usize },
    /// Delivered by the `role` endpoint.
    Succeeded { role: EndpointRole },
    /// Primary exhausted; switching to the fallback.
    FallingBack,
    /// Every configured endpoint exhausted.
    FailedPermanent,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::FailedPermanent)
    }
}

/// One send and what came of it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub role: EndpointRole,
    pub attempt: usize,
    pub result: Result<DeliveryResponse, TransportError>,
}

/// How a batch settled.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub batch_id: BatchId,
    pub final_state: DispatchState,
    pub attempts: Vec<AttemptRecord>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.final_state, DispatchState::Succeeded { .. })
    }

    /// Sends made against `role`.
    pub fn attempts_on(&self, role: EndpointRole) -> usize {
        self.attempts.iter().filter(|a| a.role == role).count()
    }
}

/// Sends batches to the primary endpoint, then the fallback.
pub(crate) struct Dispatcher<T> {
    transport: Arc<dyn Transport>,
    primary: EndpointConfig,
    /// Only present when it has a URL.
    fallback: Option<EndpointConfig>,
    ledger: FailureLedger<T>,
    reports: ReportPump<T>,
    telemetry: Emitter,
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport)
            .field("primary", &self.primary.url)
            .field("fallback", &self.fallback.as_ref().map(|f| &f.url))
            .finish()
    }
}

impl<T: Event> Dispatcher<T> {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        primary: EndpointConfig,
        fallback: Option<EndpointConfig>,
        ledger: FailureLedger<T>,
        reports: ReportPump<T>,
        telemetry: Emitter,
    ) -> Self {
        Self {
            transport,
            primary,
            fallback: fallback.filter(EndpointConfig::has_url),
            ledger,
            reports,
            telemetry,
        }
    }

    /// Drive `batch` to a terminal state.
    pub(crate) async fn dispatch(&self, batch: Batch<T>) -> DispatchOutcome {
        let batch_id = batch.id();
        let mut attempts = Vec::new();

        let body: Arc<[u8]> = match serde_json::to_vec(&batch) {
            Ok(body) => body.into(),
            Err(e) => {
                error!(batch_id = %batch_id, error = %TransportError::Encode(e.to_string()), "batch cannot be encoded");
                return self.fail_permanently(batch, attempts).await;
            }
        };

        let mut endpoint = &self.primary;
        let mut state = DispatchState::Attempting { role: endpoint.role(), attempt: 1 };
        loop {
            state = match state {
                DispatchState::Attempting { role, attempt } => {
                    let request = DeliveryRequest::new(batch_id, endpoint, attempt, body.clone());
                    let result = send_checked(self.transport.as_ref(), &request).await;
                    let next = match &result {
                        Ok(response) => {
                            debug!(batch_id = %batch_id, role = %role, attempt, status = response.status, "batch delivered");
                            DispatchState::Succeeded { role }
                        }
                        Err(source) => {
                            self.attempt_failed(batch_id, role, attempt, source).await;
                            if attempt < endpoint.max_attempts() {
                                let delay = endpoint.backoff.delay(attempt);
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                DispatchState::Attempting { role, attempt: attempt + 1 }
                            } else if role == EndpointRole::Primary && self.fallback.is_some() {
                                DispatchState::FallingBack
                            } else {
                                DispatchState::FailedPermanent
                            }
                        }
                    };
                    attempts.push(AttemptRecord { role, attempt, result });
                    next
                }
                DispatchState::FallingBack => match &self.fallback {
                    Some(fallback) => {
                        warn!(batch_id = %batch_id, url = %fallback.url, "primary exhausted; falling back");
                        self.telemetry
                            .emit(QueueEvent::Delivery(DeliveryEvent::FallingBack { batch_id }))
                            .await;
                        endpoint = fallback;
                        DispatchState::Attempting { role: fallback.role(), attempt: 1 }
                    }
                    None => DispatchState::FailedPermanent,
                },
                DispatchState::Succeeded { role } => {
                    self.telemetry
                        .emit(QueueEvent::Delivery(DeliveryEvent::Delivered {
                            batch_id,
                            role,
                            attempts: attempts.len(),
                        }))
                        .await;
                    return DispatchOutcome { batch_id, final_state: state, attempts };
                }
                DispatchState::FailedPermanent => {
                    return self.fail_permanently(batch, attempts).await;
                }
            };
        }
    }

    async fn attempt_failed(
        &self,
        batch_id: BatchId,
        role: EndpointRole,
        attempt: usize,
        source: &TransportError,
    ) {
        let status = source.status();
        let err = DeliveryError::Transient { role, attempt, source: source.clone() };
        warn!(batch_id = %batch_id, role = %role, attempt, error = %err, "delivery attempt failed");
        self.telemetry
            .emit(QueueEvent::Delivery(DeliveryEvent::AttemptFailed { batch_id, role, attempt, status }))
            .await;
    }

    async fn fail_permanently(
        &self,
        batch: Batch<T>,
        attempts: Vec<AttemptRecord>,
    ) -> DispatchOutcome {
        let batch_id = batch.id();
        let err = DeliveryError::Permanent { batch_id, attempts: attempts.len() };
        error!(batch_id = %batch_id, size = batch.len(), error = %err, "batch rejected");

        let all_failures = self.ledger.append_and_snapshot(FailureRecord::rejected_batch(batch.clone()));
        self.reports.send(Report::RejectedPayload { latest_batch: batch, all_failures });
        self.telemetry
            .emit(QueueEvent::Delivery(DeliveryEvent::Exhausted { batch_id, attempts: attempts.len() }))
            .await;

        DispatchOutcome { batch_id, final_state: DispatchState::FailedPermanent, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::ledger::FailureKind;
    use crate::report::MemoryReporter;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::runtime::Handle;

    /// Answers from a per-URL script; the last entry repeats.
    #[derive(Debug, Default)]
    struct Scripted {
        scripts: Mutex<Vec<(String, VecDeque<Result<u16, TransportError>>)>>,
        sent: Mutex<Vec<(String, usize)>>,
    }

    impl Scripted {
        fn answer(self, url: &str, script: Vec<Result<u16, TransportError>>) -> Self {
            self.scripts.lock().unwrap().push((url.to_string(), script.into()));
            self
        }

        fn sent(&self) -> Vec<(String, usize)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
            self.sent.lock().unwrap().push((request.url.clone(), request.attempt));
            let mut scripts = self.scripts.lock().unwrap();
            let (_, script) = scripts
                .iter_mut()
                .find(|(url, _)| *url == request.url)
                .expect("unscripted url");
            let next = if script.len() > 1 { script.pop_front() } else { script.front().cloned() };
            next.expect("empty script").map(DeliveryResponse::new)
        }
    }

    const PRIMARY: &str = "https://primary.example.com/ingest";
    const FALLBACK: &str = "https://fallback.example.com/ingest";

    struct Fixture<T = u32> {
        transport: Arc<Scripted>,
        ledger: FailureLedger<T>,
        reporter: MemoryReporter<T>,
        sink: MemorySink,
        dispatcher: Dispatcher<T>,
    }

    fn fixture<T: Event>(
        transport: Scripted,
        primary: EndpointConfig,
        fallback: Option<EndpointConfig>,
    ) -> Fixture<T> {
        let transport = Arc::new(transport);
        let ledger = FailureLedger::with_capacity(16);
        let reporter = MemoryReporter::new();
        let sink = MemorySink::new();
        let (pump, _) = ReportPump::spawn(Arc::new(reporter.clone()), &Handle::current());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            primary,
            fallback,
            ledger.clone(),
            pump,
            Emitter::new(sink.clone()),
        );
        Fixture { transport, ledger, reporter, sink, dispatcher }
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let f = fixture(Scripted::default().answer(PRIMARY, vec![Ok(200)]), EndpointConfig::primary(PRIMARY), None);
        let outcome = f.dispatcher.dispatch(Batch::new(vec![1, 2])).await;

        assert_eq!(outcome.final_state, DispatchState::Succeeded { role: EndpointRole::Primary });
        assert_eq!(outcome.attempts.len(), 1);
        assert!(f.ledger.is_empty());
        assert_eq!(f.transport.sent(), vec![(PRIMARY.to_string(), 1)]);
    }

    #[tokio::test]
    async fn retries_then_succeeds_on_same_endpoint() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(503), Err(TransportError::Request("reset".into())), Ok(204)]),
            EndpointConfig::primary(PRIMARY).with_retry_count(2),
            None,
        );
        let outcome = f.dispatcher.dispatch(Batch::new(vec![1])).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts_on(EndpointRole::Primary), 3);
        assert_eq!(outcome.attempts[0].result, Err(TransportError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn exhausted_primary_falls_back() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(500)]).answer(FALLBACK, vec![Ok(200)]),
            EndpointConfig::primary(PRIMARY).with_retry_count(2),
            Some(EndpointConfig::fallback(FALLBACK).with_retry_count(5)),
        );
        let outcome = f.dispatcher.dispatch(Batch::new(vec![7])).await;

        assert_eq!(outcome.final_state, DispatchState::Succeeded { role: EndpointRole::Fallback });
        assert_eq!(outcome.attempts_on(EndpointRole::Primary), 3);
        assert_eq!(outcome.attempts_on(EndpointRole::Fallback), 1);
        assert!(f.ledger.is_empty());
        assert!(f
            .sink
            .events()
            .contains(&QueueEvent::Delivery(DeliveryEvent::FallingBack { batch_id: outcome.batch_id })));
    }

    #[tokio::test]
    async fn fallback_without_url_is_ignored() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(500)]),
            EndpointConfig::primary(PRIMARY).with_retry_count(1),
            Some(EndpointConfig::fallback("")),
        );
        let outcome = f.dispatcher.dispatch(Batch::new(vec![1])).await;

        assert_eq!(outcome.final_state, DispatchState::FailedPermanent);
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn full_exhaustion_records_and_reports() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(500)]).answer(FALLBACK, vec![Ok(404)]),
            EndpointConfig::primary(PRIMARY).with_retry_count(1),
            Some(EndpointConfig::fallback(FALLBACK).with_retry_count(1)),
        );
        let batch = Batch::new(vec![1, 2, 3]);
        let outcome = f.dispatcher.dispatch(batch.clone()).await;
        f.dispatcher.reports.drained().await;

        assert_eq!(outcome.final_state, DispatchState::FailedPermanent);
        assert_eq!(f.transport.sent().len(), 4);
        assert_eq!(f.ledger.count(FailureKind::RejectedPayload), 1);
        assert_eq!(f.ledger.snapshot()[0].batch(), Some(&batch));

        let reports = f.reporter.reports();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            Report::RejectedPayload { latest_batch, all_failures } => {
                assert_eq!(latest_batch, &batch);
                assert_eq!(all_failures.len(), 1);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn unencodable_batch_fails_without_sending() {
        // serde_json only accepts string-like map keys
        type Unencodable = HashMap<Vec<u8>, u8>;
        let f: Fixture<Unencodable> = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(200)]),
            EndpointConfig::primary(PRIMARY).with_retry_count(3),
            Some(EndpointConfig::fallback(FALLBACK)),
        );
        let batch = Batch::new(vec![HashMap::from([(vec![1u8, 2], 3u8)])]);
        let outcome = f.dispatcher.dispatch(batch.clone()).await;
        f.dispatcher.reports.drained().await;

        assert_eq!(outcome.final_state, DispatchState::FailedPermanent);
        assert!(outcome.attempts.is_empty());
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.ledger.count(FailureKind::RejectedPayload), 1);
        assert_eq!(f.ledger.snapshot()[0].batch(), Some(&batch));
        assert_eq!(f.reporter.len(), 1);
        assert_eq!(f.reporter.reports()[0].kind(), "REJECTED_PAYLOAD");
        assert!(f
            .sink
            .events()
            .contains(&QueueEvent::Delivery(DeliveryEvent::Exhausted { batch_id: outcome.batch_id, attempts: 0 })));
    }

    #[tokio::test]
    async fn fallback_failure_does_not_fall_back_again() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(500)]).answer(FALLBACK, vec![Ok(500)]),
            EndpointConfig::primary(PRIMARY),
            Some(EndpointConfig::fallback(FALLBACK)),
        );
        let outcome = f.dispatcher.dispatch(Batch::new(vec![1])).await;
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[1].role, EndpointRole::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_between_attempts() {
        let f = fixture(
            Scripted::default().answer(PRIMARY, vec![Ok(500), Ok(500), Ok(200)]),
            EndpointConfig::primary(PRIMARY)
                .with_retry_count(2)
                .with_backoff(Backoff::linear(Duration::from_millis(100))),
            None,
        );
        let started = tokio::time::Instant::now();
        let outcome = f.dispatcher.dispatch(Batch::new(vec![1])).await;

        assert!(outcome.succeeded());
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn terminal_states() {
        assert!(DispatchState::FailedPermanent.is_terminal());
        assert!(DispatchState::Succeeded { role: EndpointRole::Primary }.is_terminal());
        assert!(!DispatchState::FallingBack.is_terminal());
        assert!(!DispatchState::Attempting { role: EndpointRole::Primary, attempt: 1 }.is_terminal());
    }
}
