//! Message-driven host for one queue.
//!
//! The host talks to the worker in JSON frames shaped `{"type": ..., "payload": ...}`:
//!
//! - `INIT_SERVICE` carries a [`QueueConfig`] and (re)creates the queue;
//! - `ON_BEFORE_UNLOAD` runs the before-shutdown hook and forces a flush;
//! - any other type is an event and its `payload` is pushed.
//!
//! Outbound messages are [`Report`]s over `serde_json::Value` events, which serialize to the
//! `BUFFER_REACHED` / `REJECTED_PAYLOAD` frames. Hooks are typed values handed to
//! [`Worker::new`]; nothing in a message is ever executed.

use crate::config::{QueueConfig, RawQueueConfig};
use crate::error::WorkerError;
use crate::hooks::Hooks;
use crate::queue::{DeliveryQueue, PushOutcome};
use crate::report::{Report, Reporter};
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Frame sent to the host.
pub type OutboundMessage = Report<Value>;

pub const INIT_SERVICE: &str = "INIT_SERVICE";
pub const ON_BEFORE_UNLOAD: &str = "ON_BEFORE_UNLOAD";

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    InitService(QueueConfig),
    BeforeUnload,
    /// Any other `type`; carries the frame's `payload`.
    Event(Value),
}

#[derive(Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl InboundMessage {
    /// Decode one JSON frame.
    pub fn from_json(raw: &str) -> Result<Self, WorkerError> {
        let frame: Frame = serde_json::from_str(raw)?;
        match frame.kind.as_str() {
            INIT_SERVICE => {
                let raw: RawQueueConfig = serde_json::from_value(frame.payload)?;
                Ok(Self::InitService(QueueConfig::try_from(raw)?))
            }
            ON_BEFORE_UNLOAD => Ok(Self::BeforeUnload),
            _ => Ok(Self::Event(frame.payload)),
        }
    }
}

/// Owns at most one queue and applies inbound messages to it.
pub struct Worker {
    transport: Arc<dyn Transport>,
    hooks: Hooks<Value>,
    reporter: Arc<dyn Reporter<Value>>,
    queue: Option<DeliveryQueue<Value>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("transport", &self.transport)
            .field("hooks", &self.hooks)
            .field("queue", &self.queue)
            .finish()
    }
}

impl Worker {
    pub fn new<X, R>(transport: X, hooks: Hooks<Value>, reporter: R) -> Self
    where
        X: Transport + 'static,
        R: Reporter<Value> + 'static,
    {
        Self { transport: Arc::new(transport), hooks, reporter: Arc::new(reporter), queue: None }
    }

    /// The live queue, once `INIT_SERVICE` has been handled.
    pub fn queue(&self) -> Option<&DeliveryQueue<Value>> {
        self.queue.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.queue.is_some()
    }

    /// Decode and apply one frame.
    pub async fn handle_raw(&mut self, raw: &str) -> Result<(), WorkerError> {
        let message = InboundMessage::from_json(raw)?;
        self.handle(message).await
    }

    /// Apply one decoded message.
    ///
    /// Must be called from within a Tokio runtime: `INIT_SERVICE` builds the queue.
    pub async fn handle(&mut self, message: InboundMessage) -> Result<(), WorkerError> {
        match message {
            InboundMessage::InitService(config) => {
                if let Some(previous) = self.queue.take() {
                    if let Some(batch_id) = previous.flush(true) {
                        debug!(batch_id = %batch_id, "flushed previous queue before re-init");
                    }
                }
                info!(
                    interval = ?config.interval(),
                    buffer_size = config.buffer_size(),
                    delivers = config.delivery_endpoint().is_some(),
                    "queue initialised"
                );
                let queue = DeliveryQueue::builder(config, self.transport.clone())
                    .hooks(self.hooks.clone())
                    .reporter(self.reporter.clone())
                    .build();
                self.queue = Some(queue);
                Ok(())
            }
            InboundMessage::BeforeUnload => {
                let queue = self.queue.as_ref().ok_or(WorkerError::NotInitialized)?;
                queue.run_before_shutdown();
                if let Some(batch_id) = queue.flush(true) {
                    debug!(batch_id = %batch_id, "flushed on unload");
                }
                Ok(())
            }
            InboundMessage::Event(payload) => {
                let queue = self.queue.as_ref().ok_or(WorkerError::NotInitialized)?;
                match queue.push(payload) {
                    PushOutcome::Closed => warn!("event dropped: queue closed"),
                    outcome => debug!(?outcome, "event handled"),
                }
                Ok(())
            }
        }
    }

    /// Shut the current queue down, waiting for in-flight batches.
    pub async fn shutdown(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.shutdown().await;
        }
    }

    /// Drive the worker from a channel of raw frames until the sender side closes, then shut
    /// down. Message errors are logged and never stop the loop.
    pub fn spawn(mut self, mut inbound: mpsc::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                if let Err(e) = self.handle_raw(&raw).await {
                    warn!(error = %e, "inbound message dropped");
                }
            }
            self.shutdown().await;
        })
    }
}
