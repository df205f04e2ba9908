#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flightq
//!
//! Event batching and delivery: events are accumulated into batches and flushed to a remote
//! endpoint when the buffer fills or a timer elapses, with per-endpoint retries and a fallback
//! endpoint for batches the primary will not take.
//!
//! ## Features
//!
//! - **Size and interval triggers** with a single, generation-checked flush timer
//! - **Retry and fallback** per batch, each batch on its own task
//! - **Failure ledger** of rejected events and permanently failed batches, capped by default
//! - **Typed hooks** for validation and before-shutdown work
//! - **Upward reports** through a pluggable [`Reporter`]
//! - **Telemetry** as a `tower::Service` sink
//! - **HTTP transport** on `reqwest` (feature `http`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flightq::{DeliveryQueue, EndpointConfig, HttpTransport, LogReporter, QueueConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QueueConfig::builder()
//!         .interval(Duration::from_secs(5))
//!         .buffer_size(20)
//!         .primary(EndpointConfig::primary("https://collector.example.com/events").with_retry_count(2))
//!         .fallback(EndpointConfig::fallback("https://backup.example.com/events"))
//!         .build()?;
//!
//!     let queue = DeliveryQueue::builder(config, HttpTransport::new()?)
//!         .reporter(LogReporter)
//!         .build();
//!
//!     queue.push(serde_json::json!({"event": "page_view"}));
//!     queue.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod backoff;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod ledger;
pub mod prelude;
pub mod queue;
pub mod report;
pub mod telemetry;
pub mod transport;
pub mod trigger;
pub mod worker;

// Re-exports
pub use accumulator::Accumulator;
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use batch::{Batch, BatchId, Event};
pub use config::{
    EndpointConfig, EndpointRole, HttpMethod, QueueConfig, QueueConfigBuilder,
    DEFAULT_BUFFER_SIZE, DEFAULT_LEDGER_CAPACITY,
};
pub use dispatch::{AttemptRecord, DispatchOutcome, DispatchState};
pub use error::{ConfigError, DeliveryError, TransportError, WorkerError};
pub use hooks::{BeforeShutdownHook, Hooks, ValidationHook};
pub use ledger::{FailureKind, FailureLedger, FailurePayload, FailureRecord};
pub use queue::{DeliveryQueue, DeliveryQueueBuilder, PushOutcome};
pub use report::{ChannelReporter, LogReporter, MemoryReporter, NullReporter, Report, Reporter};
pub use telemetry::{LogSink, MemorySink, NullSink, QueueEvent, TelemetrySink};
#[cfg(feature = "http")]
pub use transport::{HttpTransport, DEFAULT_REQUEST_TIMEOUT};
pub use transport::{DeliveryRequest, DeliveryResponse, Transport};
pub use trigger::{FlushTrigger, PushAction, TimerAction};
pub use worker::{InboundMessage, OutboundMessage, Worker};
