//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use crate::encoder::RecordEncoder;
use crate::error::BoxError;
use crate::record::LogEvent;
use crate::transport::{Delivery, Transport, TransportResponse};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub endpoint: String,
    pub api_key: String,
    pub records: Vec<Value>,
}

impl CapturedRequest {
    pub fn messages(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Records every request and answers with a configurable status.
///
/// With a latency set, a request is recorded only once that latency has
/// elapsed, the way a slow endpoint only acknowledges at the end.
pub struct RecordingTransport {
    status: AtomicU16,
    error: Option<String>,
    latency: Option<Duration>,
    requests: Mutex<Vec<CapturedRequest>>,
}

impl RecordingTransport {
    pub fn new(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            error: None,
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request fails at the transport level (still recorded).
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(0)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn all_messages(&self) -> Vec<String> {
        self.requests().iter().flat_map(|r| r.messages()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, delivery: Delivery<'_>) -> Result<TransportResponse, BoxError> {
        let records: Vec<Value> = serde_json::from_slice(&delivery.body)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.requests.lock().push(CapturedRequest {
            endpoint: delivery.endpoint.to_string(),
            api_key: delivery.api_key.to_string(),
            records,
        });
        if let Some(message) = &self.error {
            return Err(message.clone().into());
        }
        Ok(TransportResponse {
            status: self.status.load(Ordering::SeqCst),
            body: String::new(),
        })
    }
}

/// Encoder that always fails.
pub struct BrokenEncoder;

impl RecordEncoder for BrokenEncoder {
    fn encode(&self, _event: &LogEvent) -> Result<Vec<u8>, BoxError> {
        Err("unsupported field type".into())
    }

    fn add_field(&mut self, _key: String, _value: Value) {}

    fn clone_encoder(&self) -> Box<dyn RecordEncoder> {
        Box::new(BrokenEncoder)
    }
}
