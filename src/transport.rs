//! Delivery transport seam.
//!
//! The dispatcher never talks HTTP itself: it builds a [`DeliveryRequest`] per attempt and hands
//! it to a [`Transport`]. A response counts as delivered when its status is in `200..=399`;
//! every other status, and every transport-level error, is a failed attempt.
//!
//! [`HttpTransport`] (feature `http`, on by default) is the `reqwest` implementation.

use crate::batch::BatchId;
use crate::config::{EndpointConfig, EndpointRole, HttpMethod};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One send attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub batch_id: BatchId,
    pub role: EndpointRole,
    pub attempt: usize,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// JSON-encoded batch, shared across attempts.
    pub body: Arc<[u8]>,
}

impl DeliveryRequest {
    pub(crate) fn new(
        batch_id: BatchId,
        endpoint: &EndpointConfig,
        attempt: usize,
        body: Arc<[u8]>,
    ) -> Self {
        Self {
            batch_id,
            role: endpoint.role(),
            attempt,
            url: endpoint.url.clone(),
            method: endpoint.method,
            headers: endpoint.headers.clone(),
            body,
        }
    }
}

/// What the endpoint answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
}

impl DeliveryResponse {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

/// 2xx and 3xx count as delivered.
pub fn is_success_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Sends one request. Implementations own timeouts; the dispatcher only counts attempts.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        (**self).send(request).await
    }
}

/// Send and classify: non-success statuses become [`TransportError::Status`].
pub(crate) async fn send_checked(
    transport: &dyn Transport,
    request: &DeliveryRequest,
) -> Result<DeliveryResponse, TransportError> {
    let response = transport.send(request).await?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status { status: response.status })
    }
}

#[cfg(feature = "http")]
pub use http::{HttpTransport, DEFAULT_REQUEST_TIMEOUT};

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
    use reqwest::{Client, Method};
    use std::time::Duration;
    use tracing::debug;

    /// Per-request timeout applied when none is given.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// `reqwest`-backed transport sending the batch as a JSON body.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
    }

    impl HttpTransport {
        pub fn new() -> Result<Self, TransportError> {
            Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::Request(e.to_string()))?;
            Ok(Self { client })
        }

        /// Use an already configured client.
        pub fn from_client(client: Client) -> Self {
            Self { client }
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Get => Method::GET,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn headers(raw: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(raw.len() + 1);
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in raw {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Request(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Request(format!("header {name}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn send(
            &self,
            request: &DeliveryRequest,
        ) -> Result<DeliveryResponse, TransportError> {
            debug!(
                url = %request.url,
                batch_id = %request.batch_id,
                role = %request.role,
                attempt = request.attempt,
                "sending batch"
            );
            let response = self
                .client
                .request(method(request.method), &request.url)
                .headers(headers(&request.headers)?)
                .body(request.body.to_vec())
                .send()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            Ok(DeliveryResponse::new(response.status().as_u16()))
        }
    }

}
