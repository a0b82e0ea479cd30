//! Remote execution engine client.
//!
//! This module provides:
//! - The [`ExecutionEngine`](base::ExecutionEngine) trait the rest of the crate talks to
//! - An HTTP implementation with Server-Sent-Events decoding
//! - Bearer credential providers
//! - A scripted engine for tests and demos

pub mod base;
pub mod credentials;
pub mod http;
pub mod scripted;
pub mod sse;

pub use base::{EngineError, ExecutionEngine, FrameStream, StreamFrame};
pub use credentials::{CredentialProvider, EnvCredentials, StaticCredentials};
pub use http::HttpEngine;
pub use scripted::{EngineCall, ScriptedEngine, StreamScript};
