//! Cascade CI Core
//!
//! Domain types, port traits and error handling shared by the scheduler,
//! the database layer and the dispatchers. This crate has minimal
//! dependencies and defines the vocabulary used across all other crates.

pub mod error;
pub mod ids;
pub mod job;
pub mod memory;
pub mod ports;
pub mod project;

pub use error::{Error, Result};
pub use ids::*;
