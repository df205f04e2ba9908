use async_trait::async_trait;
use flightq::{DeliveryRequest, DeliveryResponse, EndpointRole, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PRIMARY: &str = "https://primary.example.com/ingest";
pub const FALLBACK: &str = "https://fallback.example.com/ingest";

/// One request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Sent {
    pub url: String,
    pub role: EndpointRole,
    pub attempt: usize,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
struct Step {
    answer: Result<u16, TransportError>,
    delay: Duration,
}

/// In-memory transport answering from a per-URL script. The last step of a script repeats.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<String, Vec<Step>>>>,
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to `url` with `status`.
    pub fn always(self, url: &str, status: u16) -> Self {
        self.script(url, vec![Ok(status)])
    }

    pub fn script(self, url: &str, answers: Vec<Result<u16, TransportError>>) -> Self {
        let steps = answers.into_iter().map(|answer| Step { answer, delay: Duration::ZERO }).collect();
        self.scripts.lock().unwrap().insert(url.to_string(), steps);
        self
    }

    /// Answer with `status` after `delay`.
    pub fn slow(self, url: &str, status: u16, delay: Duration) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), vec![Step { answer: Ok(status), delay }]);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, url: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|s| s.url == url).count()
    }

    /// Batches (request bodies) in send order.
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().iter().map(|s| s.body.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            url: request.url.clone(),
            role: request.role,
            attempt: request.attempt,
            body: serde_json::from_slice(&request.body).expect("json body"),
        });
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let steps = scripts.get_mut(&request.url).expect("unscripted url");
            if steps.len() > 1 {
                steps.remove(0)
            } else {
                steps[0].clone()
            }
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.answer.map(DeliveryResponse::new)
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
