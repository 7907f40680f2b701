use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::Level;

use crate::error::SinkError;

/// Field holding the shipping timestamp of every buffered record.
pub const TIMESTAMP_FIELD: &str = "dt";

/// One encoded log event as it sits in the batch and goes over the wire.
pub type Record = Map<String, Value>;

/// A structured log event before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: BTreeMap<String, Value>,
    pub message: Option<String>,
}

impl LogEvent {
    /// Event stamped with the current time and an empty target.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            target: String::new(),
            module_path: None,
            file: None,
            line: None,
            fields: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Parse encoder output into a record. Anything but a JSON object is an
/// encoding failure.
pub fn decode(bytes: &[u8]) -> Result<Record, SinkError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SinkError::Encoding(
            format!("encoder produced a non-object JSON value: {}", other).into(),
        )),
        Err(e) => Err(SinkError::Encoding(Box::new(e))),
    }
}

/// RFC 3339 with a fixed nine-digit fraction, so lexical order matches time order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn stamp(record: &mut Record, at: &DateTime<Utc>) {
    record.insert(TIMESTAMP_FIELD.to_string(), Value::String(format_timestamp(at)));
}
