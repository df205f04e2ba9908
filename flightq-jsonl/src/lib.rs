//! JSONL sinks for `flightq`. One JSON object per line, appended.
//! Always writes; bring your own path.
//!
//! - [`JsonlReporter`] records upward reports in their wire shape.
//! - [`JsonlSink`] records telemetry events.

use async_trait::async_trait;
use flightq::report::{Report, Reporter};
use flightq::telemetry::{event_to_json, QueueEvent, TelemetrySink};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append `line` plus its newline in one write. Callers serialize through their own lock.
async fn append_line(path: &Path, line: String) -> io::Result<()> {
    let line = line + "\n";
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Appends each report as one line.
#[derive(Clone, Debug)]
pub struct JsonlReporter {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    failed: Arc<AtomicU64>,
}

impl JsonlReporter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), lock: Arc::new(Mutex::new(())), failed: Arc::new(AtomicU64::new(0)) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reports that could not be written.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Write one report, surfacing the error.
    pub async fn write<T: Serialize>(&self, report: &Report<T>) -> io::Result<()> {
        let line = serde_json::to_string(report)?;
        let _guard = self.lock.lock().await;
        append_line(&self.path, line).await
    }
}

#[async_trait]
impl<T> Reporter<T> for JsonlReporter
where
    T: Serialize + Send + Sync + 'static,
{
    async fn report(&self, report: Report<T>) {
        if let Err(e) = self.write(&report).await {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %self.path.display(), kind = report.kind(), error = %e, "failed to write report");
        }
    }
}

/// Telemetry sink writing [`event_to_json`] lines.
///
/// Clones share one lock, so lines land whole and in the order the events were emitted.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), lock: Arc::new(Mutex::new(())) }
    }
}

impl tower::Service<QueueEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QueueEvent) -> Self::Future {
        let path = self.path.clone();
        let lock = self.lock.clone();
        let line = event_to_json(&event).to_string();
        Box::pin(async move {
            let _guard = lock.lock().await;
            append_line(&path, line).await
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
