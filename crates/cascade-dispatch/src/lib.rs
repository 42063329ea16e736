//! Workflow dispatchers for Cascade CI.
//!
//! Implementations of [`cascade_core::ports::WorkflowDispatcher`] that start
//! jobs on a remote executor.

pub mod dry_run;
pub mod github;

pub use dry_run::DryRunDispatcher;
pub use github::{DispatchError, GithubConfig, GithubDispatcher};
