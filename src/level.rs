use tracing::level_filters::LevelFilter;
use tracing::Level;

/// Decides whether an event of a given level reaches the sink at all.
pub trait LevelGate: Send + Sync {
    fn enabled(&self, level: &Level) -> bool;
}

/// A bare level acts as a minimum: `Level::INFO` lets INFO, WARN and ERROR through.
impl LevelGate for Level {
    fn enabled(&self, level: &Level) -> bool {
        *level <= *self
    }
}

impl LevelGate for LevelFilter {
    fn enabled(&self, level: &Level) -> bool {
        *level <= *self
    }
}
