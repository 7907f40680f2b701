use chrono::SecondsFormat;
use serde_json::{Map, Value};

use crate::error::BoxError;
use crate::record::LogEvent;

/// Turns a [`LogEvent`] into the bytes of a self-contained JSON object.
///
/// The sink decodes the output back into a [`Record`](crate::record::Record)
/// and adds its own `dt` field, so encoders need not care about shipping
/// timestamps. Context fields added through [`add_field`](Self::add_field)
/// are included in every subsequent record.
pub trait RecordEncoder: Send + Sync {
    fn encode(&self, event: &LogEvent) -> Result<Vec<u8>, BoxError>;

    /// Attach a field to every record encoded from now on.
    fn add_field(&mut self, key: String, value: Value);

    /// Independent copy carrying the same context fields.
    fn clone_encoder(&self) -> Box<dyn RecordEncoder>;
}

/// Key names used by [`JsonEncoder`]. `None` omits the key.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderConfig {
    pub message_key: String,
    pub level_key: String,
    pub target_key: String,
    pub time_key: Option<String>,
    pub caller_key: Option<String>,
    pub module_key: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            message_key: "message".to_string(),
            level_key: "level".to_string(),
            target_key: "target".to_string(),
            time_key: Some("timestamp".to_string()),
            caller_key: Some("caller".to_string()),
            module_key: Some("module".to_string()),
        }
    }
}

/// Flat JSON object encoder.
///
/// Precedence on key collisions: reserved keys (level, time, target, message,
/// caller, module) over event fields over context fields.
#[derive(Clone, Debug, Default)]
pub struct JsonEncoder {
    config: EncoderConfig,
    context: Map<String, Value>,
}

impl JsonEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            context: Map::new(),
        }
    }
}

impl RecordEncoder for JsonEncoder {
    fn encode(&self, event: &LogEvent) -> Result<Vec<u8>, BoxError> {
        let mut obj = self.context.clone();
        for (key, value) in &event.fields {
            obj.insert(key.clone(), value.clone());
        }

        obj.insert(self.config.level_key.clone(), Value::String(event.level.to_string()));
        if let Some(key) = &self.config.time_key {
            obj.insert(
                key.clone(),
                Value::String(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        if !event.target.is_empty() {
            obj.insert(self.config.target_key.clone(), Value::String(event.target.clone()));
        }
        if let Some(message) = &event.message {
            obj.insert(self.config.message_key.clone(), Value::String(message.clone()));
        }
        if let (Some(key), Some(file), Some(line)) = (&self.config.caller_key, &event.file, event.line) {
            obj.insert(key.clone(), Value::String(format!("{}:{}", file, line)));
        }
        if let (Some(key), Some(module)) = (&self.config.module_key, &event.module_path) {
            obj.insert(key.clone(), Value::String(module.clone()));
        }

        Ok(serde_json::to_vec(&obj)?)
    }

    fn add_field(&mut self, key: String, value: Value) {
        self.context.insert(key, value);
    }

    fn clone_encoder(&self) -> Box<dyn RecordEncoder> {
        Box::new(self.clone())
    }
}
