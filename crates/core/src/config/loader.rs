//! Configuration file loader for the `.taskwatch/` directory.
//!
//! Precedence, lowest first: built-in defaults, `.taskwatch/config.toml`,
//! then the `TASKWATCH_ENGINE_URL`, `TASKWATCH_TRANSPORT` and
//! `TASKWATCH_POLL_INTERVAL_MS` environment variables.

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::models::AppConfig;
use std::path::Path;
use tw_protocol::config_models::{TrackerConfig, TransportKind};

pub const CONFIG_DIR: &str = ".taskwatch";
pub const ENGINE_URL_ENV: &str = "TASKWATCH_ENGINE_URL";
pub const TRANSPORT_ENV: &str = "TASKWATCH_TRANSPORT";
pub const POLL_INTERVAL_ENV: &str = "TASKWATCH_POLL_INTERVAL_MS";

/// Loads configuration from `<root>/.taskwatch/config.toml`.
///
/// A missing directory or file is not an error; defaults are used. The
/// result is validated after environment overrides are applied.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use tw_core::config::loader::load_config;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Engine at {}", config.tracker.engine_url);
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let mut config = load_file(root).await?;
    apply_overrides(&mut config.tracker, |key| std::env::var(key).ok())?;
    validate(&config.tracker, &origin(&config))?;
    Ok(config)
}

async fn load_file(root: &Path) -> ConfigResult<AppConfig> {
    let config_path = root.join(CONFIG_DIR).join("config.toml");
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let tracker: TrackerConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    tracing::debug!(path = %config_path.display(), "Loaded tracker configuration");
    Ok(AppConfig {
        tracker,
        source: Some(config_path),
    })
}

/// Apply environment overrides, reading variables through `lookup`.
pub fn apply_overrides<F>(config: &mut TrackerConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENGINE_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.engine_url = url.trim().to_string();
    }

    if let Some(raw) = lookup(TRANSPORT_ENV).filter(|v| !v.trim().is_empty()) {
        config.transport = raw
            .parse::<TransportKind>()
            .map_err(|reason| ConfigError::InvalidConfig {
                origin: TRANSPORT_ENV.to_string(),
                reason,
            })?;
    }

    if let Some(raw) = lookup(POLL_INTERVAL_ENV).filter(|v| !v.trim().is_empty()) {
        config.poll_interval_ms =
            raw.trim()
                .parse()
                .map_err(|e| ConfigError::InvalidConfig {
                    origin: POLL_INTERVAL_ENV.to_string(),
                    reason: format!("{raw:?} is not a number of milliseconds: {e}"),
                })?;
    }

    Ok(())
}

/// Reject values the tracker cannot run with.
pub fn validate(config: &TrackerConfig, origin: &str) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::InvalidConfig {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };

    if config.engine_url.trim().is_empty() {
        return Err(invalid("engine_url must not be empty"));
    }
    if config.poll_interval_ms == 0 {
        return Err(invalid("poll_interval_ms must be greater than zero"));
    }
    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        return Err(invalid("retry.initial_backoff_ms exceeds retry.max_backoff_ms"));
    }
    if config.stream_idle_timeout_secs == 0 {
        return Err(invalid("stream_idle_timeout_secs must be greater than zero"));
    }
    if config.task_timeout_secs == Some(0) {
        return Err(invalid("task_timeout_secs must be greater than zero when set"));
    }
    Ok(())
}

fn origin(config: &AppConfig) -> String {
    config
        .source
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |p| p.display().to_string())
}
