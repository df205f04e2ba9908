//! Convenient re-exports for common flightq types.
pub use crate::{
    backoff::Backoff,
    config::{EndpointConfig, EndpointRole, HttpMethod, QueueConfig},
    error::{ConfigError, DeliveryError, TransportError, WorkerError},
    hooks::Hooks,
    ledger::{FailureKind, FailureLedger, FailureRecord},
    queue::{DeliveryQueue, PushOutcome},
    report::{LogReporter, Report, Reporter},
    transport::{DeliveryRequest, DeliveryResponse, Transport},
    worker::Worker,
};
