use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Level};

use crate::buffer::BatchBuffer;
use crate::config::LogtailConfig;
use crate::delivery::DeliveryClient;
use crate::encoder::RecordEncoder;
use crate::error::SinkError;
use crate::level::LevelGate;
use crate::record::{self, LogEvent};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Closing,
    Closed,
}

/// Batching sink that ships encoded log records to Logtail.
///
/// Records are buffered in memory and flushed when the batch reaches
/// `batch_size`, when the background worker ticks every `flush_interval`,
/// on [`sync`](Self::sync), and once more on [`close`](Self::close).
///
/// Each flush makes exactly one delivery attempt. A batch that fails to
/// deliver is dropped: the error goes back to the caller that triggered the
/// flush, or is logged when the background worker triggered it.
///
/// Sinks derived with [`with_fields`](Self::with_fields) (and clones) share
/// the buffer, the worker and the lifecycle of the sink they came from; only
/// the encoder differs. Closing any of them closes all of them.
///
/// Dropping the sink does not flush. Call [`close`](Self::close) before the
/// process exits.
pub struct LogtailSink {
    shared: Arc<Shared>,
    encoder: Box<dyn RecordEncoder>,
}

struct Shared {
    config: LogtailConfig,
    gate: Box<dyn LevelGate>,
    buffer: BatchBuffer,
    delivery: DeliveryClient,
    state: watch::Sender<LifecycleState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Threshold flushes started by [`LogtailSink::spawn_flush`].
    flushes: TaskTracker,
    stop: CancellationToken,
    runtime: Handle,
}

impl LogtailSink {
    /// Create a sink delivering over HTTPS with a client bounded by
    /// `config.timeout`, and start its flush worker.
    ///
    /// Must be called from within a Tokio runtime.
    #[cfg(feature = "http")]
    pub fn new(
        encoder: impl RecordEncoder + 'static,
        gate: impl LevelGate + 'static,
        config: LogtailConfig,
    ) -> Result<Self, SinkError> {
        let config = config.validated()?;
        let transport =
            crate::transport::HttpTransport::new(config.timeout).map_err(SinkError::HttpClient)?;
        Self::with_transport(encoder, gate, config, Arc::new(transport))
    }

    /// Like [`new`](Self::new) but delivering through `transport`.
    ///
    /// `config.timeout` is not applied here; bounding requests is up to the
    /// transport.
    pub fn with_transport(
        encoder: impl RecordEncoder + 'static,
        gate: impl LevelGate + 'static,
        config: LogtailConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SinkError> {
        let config = config.validated()?;
        let runtime = Handle::try_current()?;
        let stop = CancellationToken::new();
        let (state, _) = watch::channel(LifecycleState::Running);

        let shared = Arc::new(Shared {
            gate: Box::new(gate),
            buffer: BatchBuffer::new(config.batch_size),
            delivery: DeliveryClient::new(transport, config.endpoint.clone(), config.api_key.clone()),
            state,
            worker: Mutex::new(None),
            flushes: TaskTracker::new(),
            stop: stop.clone(),
            runtime: runtime.clone(),
            config,
        });

        let worker = runtime.spawn(flush_worker(
            Arc::downgrade(&shared),
            shared.config.flush_interval,
            stop,
        ));
        *shared.worker.lock() = Some(worker);

        debug!(
            endpoint = %shared.config.endpoint,
            batch_size = shared.config.batch_size,
            flush_interval = ?shared.config.flush_interval,
            "logtail sink started"
        );

        Ok(Self {
            shared,
            encoder: Box::new(encoder),
        })
    }

    /// Whether events of `level` should reach this sink.
    pub fn enabled(&self, level: &Level) -> bool {
        self.shared.gate.enabled(level)
    }

    /// Derived sink whose records carry `fields` on top of this sink's own
    /// context. Buffer and lifecycle stay shared.
    pub fn with_fields<I, K>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut encoder = self.encoder.clone_encoder();
        for (key, value) in fields {
            encoder.add_field(key.into(), value);
        }
        Self {
            shared: Arc::clone(&self.shared),
            encoder,
        }
    }

    /// Encode `event` and append it to the batch without flushing.
    ///
    /// **Returns**
    /// - `Ok(true)` if the batch reached its size threshold and should be
    ///   flushed by the caller.
    /// - `Err(SinkError::Encoding)` if the event could not be encoded; the
    ///   batch is untouched.
    /// - `Err(SinkError::Closed)` once the final flush has drained the batch.
    pub fn enqueue(&self, event: &LogEvent) -> Result<bool, SinkError> {
        let bytes = self.encoder.encode(event).map_err(SinkError::Encoding)?;
        let mut record = record::decode(&bytes)?;
        record::stamp(&mut record, &event.timestamp);
        self.shared.buffer.enqueue(record)
    }

    /// Enqueue `event`; if that fills the batch, flush it before returning.
    ///
    /// The write that fills the batch pays for the delivery and receives its
    /// error, if any.
    pub async fn write(&self, event: &LogEvent) -> Result<(), SinkError> {
        if self.enqueue(event)? {
            self.shared.flush().await
        } else {
            Ok(())
        }
    }

    /// Flush whatever is buffered right now.
    pub async fn sync(&self) -> Result<(), SinkError> {
        self.shared.flush().await
    }

    /// Flush on the sink's runtime without waiting; failures are logged.
    ///
    /// This is the threshold path for callers that cannot await, such as
    /// [`LogtailLayer`](crate::layer::LogtailLayer). [`close`](Self::close)
    /// waits for these flushes before it returns.
    pub fn spawn_flush(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.flushes.spawn_on(
            async move {
                if let Err(e) = shared.flush().await {
                    warn!(error = %e, "log batch flush failed, batch dropped");
                }
            },
            &self.shared.runtime,
        )
    }

    /// Stop the flush worker, wait for it and for any spawned flush still in
    /// flight, then deliver everything still buffered.
    ///
    /// The first call runs the shutdown and returns the final flush's
    /// result. Calls made while that shutdown is running wait for it and
    /// return `Ok(())`, as do calls after the sink is closed.
    ///
    /// Cancel-safe: the shutdown runs as its own task on the sink's runtime,
    /// so dropping this future does not stop the final flush.
    pub async fn close(&self) -> Result<(), SinkError> {
        let first = self.shared.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Closing;
                true
            } else {
                false
            }
        });

        if !first {
            debug!(state = ?self.state(), "logtail sink already closing");
            let mut state = self.shared.state.subscribe();
            let _ = state.wait_for(|s| *s == LifecycleState::Closed).await;
            return Ok(());
        }

        let shutdown = self.shared.runtime.spawn(Arc::clone(&self.shared).shutdown());
        shutdown.await.map_err(SinkError::Shutdown)?
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state.borrow()
    }

    /// Number of records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn config(&self) -> &LogtailConfig {
        &self.shared.config
    }
}

impl Clone for LogtailSink {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            encoder: self.encoder.clone_encoder(),
        }
    }
}

impl Shared {
    async fn flush(&self) -> Result<(), SinkError> {
        let batch = self.buffer.drain();
        self.delivery.deliver(batch).await
    }

    async fn shutdown(self: Arc<Self>) -> Result<(), SinkError> {
        self.stop.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "flush worker terminated abnormally");
            }
        }

        // sealed first: a flush spawned from here on finds nothing to send
        let batch = self.buffer.drain_and_seal();
        debug!(records = batch.len(), "final flush");
        let result = self.delivery.deliver(batch).await;

        self.flushes.close();
        self.flushes.wait().await;

        self.state.send_replace(LifecycleState::Closed);
        result
    }
}

/// Flush every `interval` until `stop` fires or every sink handle is gone.
///
/// Never flushes on the way out; the final flush belongs to `close`.
async fn flush_worker(shared: Weak<Shared>, interval: Duration, stop: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                if let Err(e) = shared.flush().await {
                    warn!(error = %e, "periodic log flush failed, batch dropped");
                }
            }
        }
    }

    debug!("flush worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::JsonEncoder;
    use crate::testing::{BrokenEncoder, RecordingTransport};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn config(batch_size: usize, flush_interval: Duration) -> LogtailConfig {
        LogtailConfig::new("token")
            .with_batch_size(batch_size)
            .with_flush_interval(flush_interval)
    }

    fn sink(transport: &Arc<RecordingTransport>, batch_size: usize, flush_interval: Duration) -> LogtailSink {
        LogtailSink::with_transport(
            JsonEncoder::default(),
            Level::INFO,
            config(batch_size, flush_interval),
            transport.clone(),
        )
        .unwrap()
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Level::INFO, message)
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_flush_then_final_flush_on_close() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 3, Duration::from_secs(3600));

        sink.write(&event("A")).await.unwrap();
        sink.write(&event("B")).await.unwrap();
        assert_eq!(transport.request_count(), 0);

        sink.write(&event("C")).await.unwrap();
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.requests()[0].messages(), vec!["A", "B", "C"]);
        assert_eq!(sink.buffered(), 0);

        sink.write(&event("D")).await.unwrap();
        assert_eq!(transport.request_count(), 1);

        sink.close().await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages(), vec!["D"]);
        assert_eq!(sink.state(), LifecycleState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch() {
        let transport = Arc::new(RecordingTransport::new(200));
        let sink = sink(&transport, 100, Duration::from_millis(50));

        sink.write(&event("lonely")).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages(), vec!["lonely"]);
        assert_eq!(sink.buffered(), 0);

        sink.close().await.unwrap();
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_request_below_threshold_before_interval() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 10, Duration::from_secs(1));

        for n in 0..9 {
            sink.write(&event(&format!("m{}", n))).await.unwrap();
        }
        time::sleep(Duration::from_millis(900)).await;
        assert_eq!(transport.request_count(), 0);
        assert_eq!(sink.buffered(), 9);

        sink.sync().await.unwrap();
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.requests()[0].records.len(), 9);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn sync_on_empty_buffer_makes_no_request() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 10, Duration::from_secs(3600));
        sink.sync().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn threshold_failure_is_returned_and_batch_dropped() {
        let transport = Arc::new(RecordingTransport::new(503));
        let sink = sink(&transport, 2, Duration::from_secs(3600));

        sink.write(&event("first")).await.unwrap();
        let err = sink.write(&event("second")).await.unwrap_err();
        assert!(matches!(err, SinkError::RemoteRejected { status: 503, .. }));
        assert!(err.is_delivery_failure());
        assert_eq!(sink.buffered(), 0);

        // no retry on close
        sink.close().await.unwrap();
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_failure_is_swallowed() {
        let transport = Arc::new(RecordingTransport::new(500));
        let sink = sink(&transport, 100, Duration::from_millis(50));

        sink.write(&event("lost")).await.unwrap();
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.request_count(), 1);
        assert_eq!(sink.buffered(), 0);

        sink.write(&event("kept")).await.unwrap();
        assert_eq!(sink.buffered(), 1);

        transport.set_status(202);
        sink.close().await.unwrap();
        assert_eq!(transport.all_messages(), vec!["lost", "kept"]);
        assert_eq!(transport.requests().last().unwrap().messages(), vec!["kept"]);
    }

    #[tokio::test]
    async fn encoding_failure_leaves_buffer_untouched() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = LogtailSink::with_transport(
            BrokenEncoder,
            Level::INFO,
            config(1, Duration::from_secs(3600)),
            transport.clone(),
        )
        .unwrap();

        let err = sink.write(&event("x")).await.unwrap_err();
        assert!(matches!(err, SinkError::Encoding(_)));
        assert_eq!(sink.buffered(), 0);
        sink.close().await.unwrap();
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn records_carry_dt_from_event_timestamp() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 1, Duration::from_secs(3600));
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123456789Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        sink.write(&event("stamped").with_timestamp(at)).await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests[0].records[0]["dt"], "2024-05-06T07:08:09.123456789Z");
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_writes() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 10, Duration::from_secs(3600));

        sink.write(&event("last")).await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(transport.request_count(), 1);

        let err = sink.write(&event("too late")).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
        assert_eq!(sink.state(), LifecycleState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_timer_flush_and_delivers_writes_made_while_closing() {
        let transport = Arc::new(RecordingTransport::new(202).with_latency(Duration::from_millis(200)));
        let sink = sink(&transport, 100, Duration::from_millis(50));

        sink.write(&event("before tick")).await.unwrap();
        time::sleep(Duration::from_millis(60)).await;
        // the timer drained the batch and its POST is still in flight
        assert_eq!(transport.request_count(), 0);
        assert_eq!(sink.buffered(), 0);

        let closing = tokio::spawn({
            let sink = sink.clone();
            async move { sink.close().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(sink.state(), LifecycleState::Closing);

        sink.write(&event("while closing")).await.unwrap();
        assert_eq!(sink.state(), LifecycleState::Closing);

        closing.await.unwrap().unwrap();
        assert_eq!(sink.state(), LifecycleState::Closed);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages(), vec!["before tick"]);
        assert_eq!(requests[1].messages(), vec!["while closing"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_close_waits_for_final_flush() {
        let transport = Arc::new(RecordingTransport::new(202).with_latency(Duration::from_millis(50)));
        let parent = sink(&transport, 10, Duration::from_secs(3600));
        let child = parent.with_fields([("service", json!("billing"))]);

        parent.write(&event("pending")).await.unwrap();
        let first = tokio::spawn({
            let parent = parent.clone();
            async move { parent.close().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(child.state(), LifecycleState::Closing);

        child.close().await.unwrap();
        assert_eq!(child.state(), LifecycleState::Closed);
        assert_eq!(transport.all_messages(), vec!["pending"]);

        first.await.unwrap().unwrap();
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_close_still_flushes() {
        let transport = Arc::new(RecordingTransport::new(202).with_latency(Duration::from_millis(50)));
        let sink = sink(&transport, 10, Duration::from_secs(3600));

        sink.write(&event("pending")).await.unwrap();
        let abandoned = time::timeout(Duration::from_millis(10), sink.close()).await;
        assert!(abandoned.is_err());
        assert_eq!(sink.state(), LifecycleState::Closing);

        sink.close().await.unwrap();
        assert_eq!(sink.state(), LifecycleState::Closed);
        assert_eq!(transport.all_messages(), vec!["pending"]);
        assert!(matches!(sink.write(&event("too late")).await, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn derived_sink_shares_buffer_and_lifecycle() {
        let transport = Arc::new(RecordingTransport::new(202));
        let parent = sink(&transport, 10, Duration::from_secs(3600));
        let child = parent.with_fields([("service", json!("api-gateway"))]);

        parent.write(&event("from parent")).await.unwrap();
        child.write(&event("from child")).await.unwrap();
        assert_eq!(parent.buffered(), 2);
        assert_eq!(child.buffered(), 2);

        child.close().await.unwrap();
        assert_eq!(parent.state(), LifecycleState::Closed);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let records = &requests[0].records;
        assert!(records[0].get("service").is_none());
        assert_eq!(records[1]["service"], "api-gateway");
    }

    #[tokio::test]
    async fn gate_is_exposed() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 10, Duration::from_secs(3600));
        assert!(sink.enabled(&Level::WARN));
        assert!(!sink.enabled(&Level::DEBUG));
        sink.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_lose_nothing() {
        let transport = Arc::new(RecordingTransport::new(202));
        let sink = sink(&transport, 7, Duration::from_millis(5));

        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    for n in 0..50 {
                        sink.write(&event(&format!("{}-{}", t, n))).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        sink.close().await.unwrap();

        let delivered = transport.all_messages();
        assert_eq!(delivered.len(), 400);
        let unique: BTreeSet<_> = delivered.iter().cloned().collect();
        assert_eq!(unique.len(), 400);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let transport = Arc::new(RecordingTransport::new(202));
        let result = LogtailSink::with_transport(
            JsonEncoder::default(),
            Level::INFO,
            LogtailConfig::default(),
            transport,
        );
        assert!(matches!(result, Err(SinkError::Config(_))));
    }

    #[test]
    fn construction_outside_runtime_fails() {
        let transport = Arc::new(RecordingTransport::new(202));
        let result = LogtailSink::with_transport(
            JsonEncoder::default(),
            Level::INFO,
            LogtailConfig::new("token"),
            transport,
        );
        assert!(matches!(result, Err(SinkError::Runtime(_))));
    }
}
