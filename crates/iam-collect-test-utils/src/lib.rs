//! Shared test utilities for iam-collect
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique bucket/prefix names
//! - [`db`]: In-memory SQLite pools
//! - [`logging`]: One-time tracing subscriber for test output

pub mod aws;
pub mod db;
pub mod logging;

// Re-export commonly used items
pub use aws::{get_test_region, test_bucket_name, test_prefix, test_run_id};
pub use db::open_test_db;
pub use logging::init_test_tracing;
