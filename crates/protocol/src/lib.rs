//! # tw-protocol
//!
//! Data model for taskwatch, the client-side tracker for remote agent tasks.
//!
//! This crate defines every shared structure used for:
//! - Describing a task, its tool-call steps and its produced outputs
//! - The transport-independent progress event ([`EventEnvelope`])
//! - The caller-facing execution state and lifecycle notifications
//! - Tracker configuration from `.taskwatch/config.toml`
//!
//! ## Modules
//!
//! - [`task_models`]: Tasks, steps, outputs, statuses and phases
//! - [`log_models`]: Thought entries and terminal lines
//! - [`envelope`]: Progress events as consumed by the reducer
//! - [`state_models`]: The reduced execution state
//! - [`ipc`]: Caller notifications and engine submission messages
//! - [`config_models`]: Tracker settings
//!
//! ## Design Principles
//!
//! - Minimal dependencies: only serde, chrono and ts-rs
//! - TypeScript generation: all types derive `TS` for UI clients
//! - Independent compilation: no dependencies on other taskwatch crates

pub mod config_models;
pub mod envelope;
pub mod ipc;
pub mod log_models;
pub mod state_models;
pub mod task_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use envelope::*;
pub use ipc::*;
pub use log_models::*;
pub use state_models::*;
pub use task_models::*;
