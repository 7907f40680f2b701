//! Environment variable names used by [`LogtailConfig::from_env`].
//!
//! These are purely helpers; the sink itself never reads the environment.
//!
//! [`LogtailConfig::from_env`]: crate::config::LogtailConfig::from_env

/// Logtail source token, sent as a bearer credential.
pub const LOGTAIL_API_KEY_ENV: &str = "LOGTAIL_API_KEY";

/// Ingestion endpoint, e.g. `https://in.logtail.com`.
pub const LOGTAIL_API_URL_ENV: &str = "LOGTAIL_API_URL";

/// Number of buffered records that triggers a flush.
pub const LOGTAIL_BATCH_SIZE_ENV: &str = "LOGTAIL_BATCH_SIZE";

/// Period of the background flush, in milliseconds.
pub const LOGTAIL_FLUSH_INTERVAL_MS_ENV: &str = "LOGTAIL_FLUSH_INTERVAL_MS";

/// Per-request HTTP timeout, in milliseconds.
pub const LOGTAIL_TIMEOUT_MS_ENV: &str = "LOGTAIL_TIMEOUT_MS";

/// Common prefix of every variable above.
pub const LOGTAIL_ENV_PREFIX: &str = "LOGTAIL_";
