use std::time::Duration;
use tracing::{debug, error, info, warn, Level};

use tracing_logtail_sink::encoder::{EncoderConfig, JsonEncoder};
use tracing_logtail_sink::env::{LOGTAIL_API_KEY_ENV, LOGTAIL_API_URL_ENV};
use tracing_logtail_sink::init::{init_tracing_with_config, InitConfig};
use tracing_logtail_sink::{LogtailConfig, LogtailSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var(LOGTAIL_API_KEY_ENV).unwrap_or_default();
    if api_key.is_empty() {
        eprintln!("Please set {} environment variable", LOGTAIL_API_KEY_ENV);
        std::process::exit(1);
    }
    let api_url = std::env::var(LOGTAIL_API_URL_ENV).unwrap_or_default();
    if api_url.is_empty() {
        eprintln!("Please set {} environment variable", LOGTAIL_API_URL_ENV);
        std::process::exit(1);
    }

    let config = LogtailConfig::new(api_key)
        .with_endpoint(api_url)
        .with_batch_size(10)
        .with_flush_interval(Duration::from_secs(3));

    // Console shows DEBUG, Logtail only gets INFO and above.
    let sink = LogtailSink::new(JsonEncoder::new(EncoderConfig::default()), Level::INFO, config)?;
    init_tracing_with_config(sink.clone(), InitConfig::default())?;

    info!(environment = "production", version = "1.0.0", "Application started");
    debug!("This is a debug message (only goes to console)");
    info!(user_id = 12345, username = "john_doe", ip_address = "192.168.1.100", "User logged in");
    warn!(memory_usage_percent = 85.5, service = "api-gateway", "High memory usage detected");
    error!(error = "connection timeout", database = "users_db", retry_count = 3, "Database connection failed");

    for i in 0..5 {
        info!(batch_number = i + 1, records = (i + 1) * 100, "Processing batch");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    info!("Application shutting down gracefully");

    println!("\nWaiting for logs to flush...");
    sink.close().await?;
    Ok(())
}
