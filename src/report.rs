//! Upward reports: what the queue tells its host.
//!
//! Two things are ever reported: a full batch handed upward because no primary endpoint is
//! configured, and a batch that failed permanently (together with the whole failure ledger).
//! Reports are delivered in the order the queue produced them by a single pump task, so a slow
//! reporter never blocks pushes or dispatches.

use crate::batch::{Batch, Event};
use crate::ledger::FailureRecord;
use async_trait::async_trait;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Message sent to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Report<T> {
    /// Buffer flushed with no primary endpoint configured.
    BufferReached { batch: Batch<T> },
    /// Terminal delivery failure.
    RejectedPayload { latest_batch: Batch<T>, all_failures: Vec<FailureRecord<T>> },
}

impl<T> Report<T> {
    /// Wire tag of this report.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BufferReached { .. } => "BUFFER_REACHED",
            Self::RejectedPayload { .. } => "REJECTED_PAYLOAD",
        }
    }

    /// The batch the report is about.
    pub fn batch(&self) -> &Batch<T> {
        match self {
            Self::BufferReached { batch } => batch,
            Self::RejectedPayload { latest_batch, .. } => latest_batch,
        }
    }
}

struct RejectedPayload<'a, T> {
    latest_batch: &'a Batch<T>,
    all_failures: &'a [FailureRecord<T>],
}

impl<T: Serialize> Serialize for RejectedPayload<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut payload = serializer.serialize_struct("RejectedPayload", 2)?;
        payload.serialize_field("latestEvents", self.latest_batch)?;
        payload.serialize_field("allEvents", self.all_failures)?;
        payload.end()
    }
}

/// Wire shape: `{"type": "BUFFER_REACHED", "payload": [..]}` or
/// `{"type": "REJECTED_PAYLOAD", "payload": {"latestEvents": [..], "allEvents": [..]}}`.
impl<T: Serialize> Serialize for Report<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut message = serializer.serialize_struct("Report", 2)?;
        message.serialize_field("type", self.kind())?;
        match self {
            Self::BufferReached { batch } => message.serialize_field("payload", batch)?,
            Self::RejectedPayload { latest_batch, all_failures } => message.serialize_field(
                "payload",
                &RejectedPayload { latest_batch, all_failures },
            )?,
        }
        message.end()
    }
}

/// Receives upward reports. Implementations handle their own errors.
#[async_trait]
pub trait Reporter<T>: Send + Sync {
    async fn report(&self, report: Report<T>);
}

#[async_trait]
impl<T, R> Reporter<T> for Arc<R>
where
    T: Send + Sync + 'static,
    R: Reporter<T> + ?Sized,
{
    async fn report(&self, report: Report<T>) {
        (**self).report(report).await
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

#[async_trait]
impl<T: Send + Sync + 'static> Reporter<T> for NullReporter {
    async fn report(&self, _report: Report<T>) {}
}

/// Logs reports with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl<T: Send + Sync + 'static> Reporter<T> for LogReporter {
    async fn report(&self, report: Report<T>) {
        match &report {
            Report::BufferReached { batch } => {
                info!(batch_id = %batch.id(), size = batch.len(), "buffer reached");
            }
            Report::RejectedPayload { latest_batch, all_failures } => {
                error!(
                    batch_id = %latest_batch.id(),
                    size = latest_batch.len(),
                    failures = all_failures.len(),
                    "payload rejected"
                );
            }
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug)]
pub struct MemoryReporter<T> {
    reports: Arc<Mutex<Vec<Report<T>>>>,
}

impl<T> Clone for MemoryReporter<T> {
    fn clone(&self) -> Self {
        Self { reports: self.reports.clone() }
    }
}

impl<T: Clone> MemoryReporter<T> {
    pub fn new() -> Self {
        Self { reports: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn reports(&self) -> Vec<Report<T>> {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for MemoryReporter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Reporter<T> for MemoryReporter<T> {
    async fn report(&self, report: Report<T>) {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).push(report);
    }
}

/// Forwards reports to the host over a tokio channel.
#[derive(Debug)]
pub struct ChannelReporter<T> {
    tx: mpsc::Sender<Report<T>>,
}

impl<T> Clone for ChannelReporter<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> ChannelReporter<T> {
    /// Create a reporter and the receiving end the host reads from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Report<T>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<Report<T>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Reporter<T> for ChannelReporter<T> {
    async fn report(&self, report: Report<T>) {
        let kind = report.kind();
        if self.tx.send(report).await.is_err() {
            warn!(kind, "host channel closed; report dropped");
        }
    }
}

enum PumpMessage<T> {
    Report(Report<T>),
    /// Answered once every report queued before it has been handed to the reporter.
    Drained(oneshot::Sender<()>),
}

/// Single consumer that hands reports to the reporter in production order.
pub(crate) struct ReportPump<T> {
    tx: mpsc::UnboundedSender<PumpMessage<T>>,
}

impl<T> Clone for ReportPump<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> fmt::Debug for ReportPump<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportPump").field("closed", &self.tx.is_closed()).finish()
    }
}

impl<T: Event> ReportPump<T> {
    /// Spawn the pump on `runtime`. The task ends once every clone of the pump is dropped and
    /// the backlog is drained.
    pub(crate) fn spawn(reporter: Arc<dyn Reporter<T>>, runtime: &Handle) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PumpMessage<T>>();
        let handle = runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    PumpMessage::Report(report) => {
                        debug!(kind = report.kind(), batch_id = %report.batch().id(), "reporting upward");
                        reporter.report(report).await;
                    }
                    PumpMessage::Drained(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    pub(crate) fn send(&self, report: Report<T>) {
        if let Err(mpsc::error::SendError(PumpMessage::Report(report))) =
            self.tx.send(PumpMessage::Report(report))
        {
            warn!(kind = report.kind(), batch_id = %report.batch().id(), "report pump stopped; report dropped");
        }
    }

    /// Wait until every report sent so far has reached the reporter.
    pub(crate) async fn drained(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PumpMessage::Drained(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
