//! Common test utilities for controller integration tests.
//!
//! This module provides shared functionality across the tests including:
//! - Fixtures (scripted engine harness, snapshots, fast tracker config)
//! - Waiting helpers for asynchronous state changes
//! - Assertions over notification sequences

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
pub use fixtures::*;
