use std::error::Error;

use crate::config::ConfigError;

/// Boxed error returned by the encoder and transport seams.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Everything that can go wrong while writing, flushing or building a sink.
///
/// Delivery failures (`Serialization`, `Transport`, `RemoteRejected`) mean the
/// drained batch is gone; nothing is re-queued.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to encode log record: {0}")]
    Encoding(#[source] BoxError),

    #[error("failed to marshal logs: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("failed to send logs: {0}")]
    Transport(#[source] BoxError),

    #[error("logtail returned status {status}")]
    RemoteRejected { status: u16, body: String },

    #[error("sink is closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sink shutdown task failed: {0}")]
    Shutdown(#[source] tokio::task::JoinError),

    #[error("no Tokio runtime to run the flush worker on: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[cfg(feature = "http")]
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl SinkError {
    /// `true` when a batch was drained but could not be delivered.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            SinkError::Serialization(_) | SinkError::Transport(_) | SinkError::RemoteRejected { .. }
        )
    }
}
