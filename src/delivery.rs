use std::sync::Arc;
use tracing::debug;

use crate::error::SinkError;
use crate::record::Record;
use crate::transport::{Delivery, Transport};

/// Serializes drained batches and makes one delivery attempt per batch.
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    api_key: String,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, endpoint: String, api_key: String) -> Self {
        Self {
            transport,
            endpoint,
            api_key,
        }
    }

    /// Send `batch` as a JSON array. Only 200 and 202 count as accepted.
    ///
    /// The batch is consumed either way: on failure it is gone.
    pub async fn deliver(&self, batch: Vec<Record>) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&batch).map_err(SinkError::Serialization)?;
        debug!(records = batch.len(), bytes = body.len(), "delivering log batch");

        let resp = self
            .transport
            .post(Delivery {
                endpoint: &self.endpoint,
                api_key: &self.api_key,
                body,
            })
            .await
            .map_err(SinkError::Transport)?;

        match resp.status {
            200 | 202 => Ok(()),
            status => Err(SinkError::RemoteRejected {
                status,
                body: resp.body,
            }),
        }
    }
}
