//! Integration test infrastructure for Cascade CI.
//!
//! This crate provides testcontainers-based infrastructure for running
//! the scheduler against a real PostgreSQL database.
//!
//! # Usage
//!
//! ```ignore
//! use cascade_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     let jobs = ctx.jobs();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,cascade_scheduler=debug,cascade_db=debug"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
