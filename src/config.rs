//! Queue and endpoint configuration.
//!
//! Configuration comes from two places: code, through [`QueueConfig::builder`], and the JSON
//! payload of an `INIT_SERVICE` message, through `serde`. Both paths end in the same
//! validation, so a `QueueConfig` value is always usable.
//!
//! JSON shape (camelCase; the original field names are accepted as aliases):
//!
//! ```json
//! {
//!   "interval": 5,
//!   "eventsBuffer": 20,
//!   "onSuccess": { "url": "https://collect.example.com/v1/batch", "retryCount": 2 },
//!   "onError":   { "url": "https://backup.example.com/v1/batch", "method": "PUT" }
//! }
//! ```

use crate::backoff::Backoff;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default number of events that fills the buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 15;

/// Default number of failure records the ledger retains.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Which configured slot an endpoint occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Receives every flushed batch.
    Primary,
    /// Receives a batch only after the primary's attempts are exhausted.
    Fallback,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// HTTP method used for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
    Get,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Get => "GET",
            Self::Delete => "DELETE",
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "GET" => Ok(Self::Get),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ConfigError::UnsupportedMethod(value)),
        }
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery target.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    role: EndpointRole,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Retries after the first attempt; total attempts = `retry_count + 1`.
    pub retry_count: usize,
    pub backoff: Backoff,
}

impl EndpointConfig {
    fn new(role: EndpointRole, url: impl Into<String>) -> Self {
        Self {
            role,
            url: url.into(),
            method: HttpMethod::default(),
            headers: BTreeMap::new(),
            retry_count: 0,
            backoff: Backoff::None,
        }
    }

    pub fn primary(url: impl Into<String>) -> Self {
        Self::new(EndpointRole::Primary, url)
    }

    pub fn fallback(url: impl Into<String>) -> Self {
        Self::new(EndpointRole::Fallback, url)
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// An endpoint without a URL is configured but disabled.
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Total attempts one dispatch makes against this endpoint.
    pub fn max_attempts(&self) -> usize {
        self.retry_count.saturating_add(1)
    }

    fn with_role(mut self, role: EndpointRole) -> Self {
        self.role = role;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.has_url() {
            return Ok(());
        }
        let url = self.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidUrl { role: self.role, url: self.url.clone() })
        }
    }
}

/// Validated queue configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawQueueConfig")]
pub struct QueueConfig {
    interval: Duration,
    buffer_size: usize,
    primary: Option<EndpointConfig>,
    fallback: Option<EndpointConfig>,
    ledger_capacity: usize,
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Timer period; zero disables the timer.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn primary(&self) -> Option<&EndpointConfig> {
        self.primary.as_ref()
    }

    pub fn fallback(&self) -> Option<&EndpointConfig> {
        self.fallback.as_ref()
    }

    pub fn ledger_capacity(&self) -> usize {
        self.ledger_capacity
    }

    /// Primary endpoint, if one with a URL is configured. Without it, flushed batches are
    /// handed upward instead of sent.
    pub fn delivery_endpoint(&self) -> Option<&EndpointConfig> {
        self.primary.as_ref().filter(|e| e.has_url())
    }

    /// Fallback endpoint, if one with a URL is configured.
    pub fn fallback_endpoint(&self) -> Option<&EndpointConfig> {
        self.fallback.as_ref().filter(|e| e.has_url())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            buffer_size: DEFAULT_BUFFER_SIZE,
            primary: None,
            fallback: None,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct QueueConfigBuilder {
    interval: Duration,
    buffer_size: usize,
    primary: Option<EndpointConfig>,
    fallback: Option<EndpointConfig>,
    ledger_capacity: usize,
}

impl QueueConfigBuilder {
    pub fn new() -> Self {
        let defaults = QueueConfig::default();
        Self {
            interval: defaults.interval,
            buffer_size: defaults.buffer_size,
            primary: None,
            fallback: None,
            ledger_capacity: defaults.ledger_capacity,
        }
    }

    /// Flush timer period. `Duration::ZERO` (the default) flushes on buffer-full instead.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the primary endpoint. The slot decides the role, whatever the endpoint was built as.
    pub fn primary(mut self, endpoint: EndpointConfig) -> Self {
        self.primary = Some(endpoint.with_role(EndpointRole::Primary));
        self
    }

    pub fn fallback(mut self, endpoint: EndpointConfig) -> Self {
        self.fallback = Some(endpoint.with_role(EndpointRole::Fallback));
        self
    }

    pub fn ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }

    /// Keep every failure record for the life of the queue.
    pub fn unbounded_ledger(mut self) -> Self {
        self.ledger_capacity = usize::MAX;
        self
    }

    pub fn build(self) -> Result<QueueConfig, ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(0));
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::InvalidLedgerCapacity);
        }
        for endpoint in self.primary.iter().chain(self.fallback.iter()) {
            endpoint.validate()?;
        }
        Ok(QueueConfig {
            interval: self.interval,
            buffer_size: self.buffer_size,
            primary: self.primary,
            fallback: self.fallback,
            ledger_capacity: self.ledger_capacity,
        })
    }
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEndpoint {
    #[serde(default)]
    url: String,
    #[serde(default)]
    method: Option<HttpMethod>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    retry_count: usize,
    #[serde(default)]
    backoff_ms: Option<u64>,
}

impl RawEndpoint {
    fn into_endpoint(self, role: EndpointRole) -> EndpointConfig {
        let mut endpoint = EndpointConfig::new(role, self.url).with_retry_count(self.retry_count);
        endpoint.method = self.method.unwrap_or_default();
        endpoint.headers = self.headers;
        if let Some(ms) = self.backoff_ms.filter(|ms| *ms > 0) {
            endpoint.backoff = Backoff::constant(Duration::from_millis(ms));
        }
        endpoint
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawQueueConfig {
    #[serde(default, alias = "intervalSeconds")]
    interval: f64,
    #[serde(default = "default_buffer_size", alias = "eventsBuffer")]
    buffer_size: usize,
    #[serde(default, alias = "onSuccess")]
    primary: Option<RawEndpoint>,
    #[serde(default, alias = "onError")]
    fallback: Option<RawEndpoint>,
    #[serde(default = "default_ledger_capacity")]
    ledger_capacity: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

impl TryFrom<RawQueueConfig> for QueueConfig {
    type Error = ConfigError;

    fn try_from(raw: RawQueueConfig) -> Result<Self, Self::Error> {
        let interval = Duration::try_from_secs_f64(raw.interval)
            .map_err(|_| ConfigError::InvalidInterval(raw.interval))?;
        let mut builder = QueueConfig::builder()
            .interval(interval)
            .buffer_size(raw.buffer_size)
            .ledger_capacity(raw.ledger_capacity);
        if let Some(primary) = raw.primary {
            builder = builder.primary(primary.into_endpoint(EndpointRole::Primary));
        }
        if let Some(fallback) = raw.fallback {
            builder = builder.fallback(fallback.into_endpoint(EndpointRole::Fallback));
        }
        builder.build()
    }
}
