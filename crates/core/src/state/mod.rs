//! Execution state management.
//!
//! This module provides:
//! - The pure reducer folding progress events and snapshots into state
//! - [`ExecutionController`](controller::ExecutionController), which owns the
//!   observed task, its single connection and the caller notifications

pub mod controller;
pub mod error;
pub mod reducer;

pub use controller::{ControllerBuilder, ExecutionController};
pub use error::ControllerError;
pub use reducer::{apply_snapshot, reduce};
