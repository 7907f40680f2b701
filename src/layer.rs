use crate::record::LogEvent;
use crate::sink::LogtailSink;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never shipped, so flush failures logged by the
/// sink cannot feed back into it.
const SELF_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// buffers them in a [`LogtailSink`].
///
/// The sink's level gate decides which events are kept. Buffering happens on
/// the emitting thread; when a write fills the batch, the flush is spawned on
/// the sink's runtime so the application thread never waits for the network.
/// Flush failures on that path are logged and the batch is dropped.
///
/// Remember to [`close`](LogtailSink::close) the sink (not the layer) before
/// exiting.
pub struct LogtailLayer {
    sink: LogtailSink,
    /// Total events seen by the layer (before the level gate).
    pub total_events: Arc<AtomicU64>,
    /// Successfully buffered.
    pub enqueued_events: Arc<AtomicU64>,
    /// Rejected by the encoder or arriving after the sink was closed.
    pub dropped_events: Arc<AtomicU64>,
}

impl LogtailLayer {
    pub fn new(sink: LogtailSink) -> Self {
        Self {
            sink,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sink(&self) -> &LogtailSink {
        &self.sink
    }
}

impl<S> Layer<S> for LogtailLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(SELF_TARGET) {
            return;
        }
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if !self.sink.enabled(meta.level()) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        let log_event = LogEvent {
            timestamp: Utc::now(),
            level: *meta.level(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
            message,
        };

        match self.sink.enqueue(&log_event) {
            Ok(full) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
                if full {
                    self.sink.spawn_flush();
                }
            }
            Err(e) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping log event");
            }
        }
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    // `info!("...")` hands the message over as `fmt::Arguments` through here.
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
