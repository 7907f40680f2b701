use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, Level};

use tracing_logtail_sink::init::{init_tracing_with_config, InitConfig};
use tracing_logtail_sink::transport::NoopTransport;
use tracing_logtail_sink::{JsonEncoder, LogtailConfig, LogtailSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LogtailConfig::new("load-test")
        .with_batch_size(1_000)
        .with_flush_interval(Duration::from_millis(200));
    let transport = Arc::new(NoopTransport::with_latency(Duration::from_millis(5)));
    let sink = LogtailSink::with_transport(JsonEncoder::default(), Level::ERROR, config, transport)?;

    init_tracing_with_config(
        sink.clone(),
        InitConfig {
            enable_stdout: false,
            ..InitConfig::default()
        },
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "buffered {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    sink.close().await?;
    Ok(())
}
