//! The loaded configuration.

use std::path::PathBuf;
use tw_protocol::config_models::TrackerConfig;

/// Tracker settings plus where they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub tracker: TrackerConfig,

    /// The `config.toml` that was read, or `None` when defaults were used.
    pub source: Option<PathBuf>,
}
