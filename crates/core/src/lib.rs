//! # tw-core
//!
//! Execution tracking for tasks run by a remote agent engine.
//!
//! This crate provides:
//! - Configuration loading from the `.taskwatch/` directory
//! - An HTTP client for the remote execution engine, with SSE decoding
//! - A change-feed abstraction over database row notifications
//! - Three interchangeable transports (event stream, change feed, polling)
//! - A pure reducer and the controller that drives it
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`engine`]: Remote execution engine trait and clients
//! - [`feed`]: Change-feed providers
//! - [`transport`]: Progress delivery and payload decoding
//! - [`state`]: Reducer and execution controller

pub mod config;
pub mod engine;
pub mod feed;
pub mod state;
pub mod transport;

pub use state::{ControllerBuilder, ControllerError, ExecutionController};
