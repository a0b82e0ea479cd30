//! Configuration loading.
//!
//! Settings live in `.taskwatch/config.toml` under a root directory and can
//! be overridden by `TASKWATCH_*` environment variables.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::AppConfig;
