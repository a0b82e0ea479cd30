//! Tracker configuration models for `.taskwatch/config.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.
//!
//! # Example
//!
//! ```toml
//! # .taskwatch/config.toml
//! engine_url = "https://engine.example.com/api"
//! transport = "stream"
//! poll_interval_ms = 2000
//!
//! [retry]
//! max_attempts = 10
//! initial_backoff_ms = 500
//! max_backoff_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use ts_rs::TS;

/// Mechanism delivering progress for one task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Server-push event stream.
    #[default]
    Stream,
    /// Periodic snapshot fetches.
    Poll,
    /// Database change notifications.
    ChangeFeed,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
            Self::ChangeFeed => "change_feed",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "sse" => Ok(Self::Stream),
            "poll" | "polling" => Ok(Self::Poll),
            "change_feed" | "change-feed" | "realtime" => Ok(Self::ChangeFeed),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// How failed poll fetches are retried.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before polling gives up.
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next fetch after `failures` consecutive failures.
    ///
    /// Doubles from `initial_backoff_ms` and saturates at `max_backoff_ms`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Table names watched by the change-feed transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(default)]
pub struct ChangeFeedConfig {
    /// Append-only log table; one row per progress event.
    pub log_table: String,

    /// Table holding one summary row per task.
    pub task_table: String,
}

impl Default for ChangeFeedConfig {
    fn default() -> Self {
        Self {
            log_table: "agent_logs".to_string(),
            task_table: "agent_tasks".to_string(),
        }
    }
}

/// Settings for observing remote agent tasks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the remote execution engine's HTTP API.
    pub engine_url: String,

    /// Transport tried first when attaching to a task.
    pub transport: TransportKind,

    pub poll_interval_ms: u64,

    /// Timeout for ordinary (non-streaming) engine requests.
    pub request_timeout_secs: u64,

    /// An event stream that delivers nothing (not even a keep-alive) for
    /// this long is treated as dead.
    pub stream_idle_timeout_secs: u64,

    /// Give up watching a task after this long. No limit when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,

    pub retry: RetryPolicy,

    pub change_feed: ChangeFeedConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://127.0.0.1:8080/api".to_string(),
            transport: TransportKind::Stream,
            poll_interval_ms: 2000,
            request_timeout_secs: 30,
            stream_idle_timeout_secs: 60,
            task_timeout_secs: None,
            retry: RetryPolicy::default(),
            change_feed: ChangeFeedConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}
