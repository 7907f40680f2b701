use crate::layer::LogtailLayer;
use crate::sink::LogtailSink;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// Console side of the subscriber installed next to the Logtail layer.
///
/// **Fields**
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer prints
///   events to the console alongside the Logtail layer.
/// - `stdout_level`: most verbose level printed to the console. Independent
///   of the sink's own level gate, so the console can show DEBUG while only
///   INFO and above is shipped.
#[derive(Clone, Debug)]
pub struct InitConfig {
    pub enable_stdout: bool,
    pub stdout_level: LevelFilter,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            stdout_level: LevelFilter::DEBUG,
        }
    }
}

/// Install a global subscriber: a [`Registry`] with a [`LogtailLayer`] over
/// `sink` plus, optionally, a console `fmt` layer.
///
/// `sink` keeps working after this call; keep a clone around to
/// [`close`](LogtailSink::close) it on shutdown.
pub fn init_tracing_with_config(sink: LogtailSink, config: InitConfig) -> Result<(), SetGlobalDefaultError> {
    let logtail_layer = LogtailLayer::new(sink);
    let fmt_layer = config
        .enable_stdout
        .then(|| tracing_subscriber::fmt::layer().with_filter(config.stdout_level));

    let subscriber = Registry::default().with(logtail_layer).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
}

/// [`init_tracing_with_config`] with [`InitConfig::default`].
pub fn init_tracing(sink: LogtailSink) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(sink, InitConfig::default())
}
