use async_trait::async_trait;
use std::time::Duration;

use crate::error::BoxError;

/// One outgoing POST: a serialized batch and where and how to send it.
#[derive(Debug, Clone)]
pub struct Delivery<'a> {
    pub endpoint: &'a str,
    pub api_key: &'a str,
    /// JSON array of records.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Moves a serialized batch to the ingestion endpoint.
///
/// Implementations perform exactly one attempt per call and report what the
/// remote answered; classifying the status is the caller's job. The sink
/// shares a single transport between all flushes, so implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one batch.
    ///
    /// **Returns**
    /// - `Ok(response)` whenever the remote answered, whatever the status.
    /// - `Err(..)` on connection failures and timeouts.
    async fn post(&self, delivery: Delivery<'_>) -> Result<TransportResponse, BoxError>;
}

/// `reqwest` transport with a per-request timeout.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an externally configured client. Its own timeout applies.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, delivery: Delivery<'_>) -> Result<TransportResponse, BoxError> {
        let resp = self
            .client
            .post(delivery.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(delivery.api_key)
            .body(delivery.body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        Ok(TransportResponse { status, body })
    }
}

/// A transport that accepts everything without doing any I/O.
///
/// Useful for measuring the overhead of the sink itself.
#[derive(Clone, Debug, Default)]
pub struct NoopTransport {
    latency: Duration,
}

impl NoopTransport {
    /// Pretend every request takes `latency` to complete.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Transport for NoopTransport {
    async fn post(&self, _delivery: Delivery<'_>) -> Result<TransportResponse, BoxError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(TransportResponse {
            status: 202,
            body: String::new(),
        })
    }
}
