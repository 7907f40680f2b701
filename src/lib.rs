pub mod buffer;
pub mod config;
pub mod delivery;
pub mod encoder;
pub mod env;
pub mod error;
pub mod level;
pub mod record;
pub mod sink;
pub mod transport;

pub mod init;
pub mod layer;

#[cfg(test)]
mod testing;

pub use config::LogtailConfig;
pub use encoder::{JsonEncoder, RecordEncoder};
pub use error::SinkError;
pub use record::LogEvent;
pub use sink::{LifecycleState, LogtailSink};
