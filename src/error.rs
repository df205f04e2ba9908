//! Error types for the delivery queue
//!
//! Only two kinds of failure ever leave the queue: validation rejects and permanent delivery
//! failures. Everything a single send attempt can produce is a [`TransportError`] and stays
//! inside the dispatcher, which retries it or escalates it.
use crate::batch::BatchId;
use crate::config::EndpointRole;
use thiserror::Error;

/// Invalid queue or endpoint configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `buffer_size` must be > 0.
    #[error("buffer_size must be > 0 (got {0})")]
    InvalidBufferSize(usize),
    /// The flush interval must be a finite, non-negative number of seconds.
    #[error("interval must be a finite number of seconds >= 0 (got {0})")]
    InvalidInterval(f64),
    /// Endpoint URL does not look like an http(s) URL.
    #[error("{role} endpoint url must start with http:// or https:// (got {url:?})")]
    InvalidUrl { role: EndpointRole, url: String },
    /// HTTP method not supported by the transport.
    #[error("unsupported http method {0:?}")]
    UnsupportedMethod(String),
    /// Ledger capacity must be > 0.
    #[error("ledger_capacity must be > 0")]
    InvalidLedgerCapacity,
}

/// A single failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint answered with a status outside 200..=399.
    #[error("endpoint responded with status {status}")]
    Status { status: u16 },
    /// The request never produced a response (connect, timeout, TLS, ...).
    #[error("request failed: {0}")]
    Request(String),
    /// The batch could not be encoded into a request body.
    #[error("failed to encode batch: {0}")]
    Encode(String),
}

impl TransportError {
    /// Status code carried by the error, if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Delivery failures as seen from outside the dispatcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    /// The event was refused by the validation hook and never queued.
    #[error("event rejected by validation hook")]
    Validation,
    /// One attempt against one endpoint failed; it will be retried.
    #[error("attempt {attempt} against {role} endpoint failed: {source}")]
    Transient {
        role: EndpointRole,
        attempt: usize,
        #[source]
        source: TransportError,
    },
    /// Every attempt on every configured endpoint failed.
    #[error("batch {batch_id} permanently failed after {attempts} attempts")]
    Permanent { batch_id: BatchId, attempts: usize },
}

/// Failures handling an inbound worker message.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The frame was not valid JSON or did not match the message shape.
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
    /// An event or unload message arrived before `INIT_SERVICE`.
    #[error("queue has not been initialised; send INIT_SERVICE first")]
    NotInitialized,
    /// `INIT_SERVICE` carried an invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
