//! Error types for Cascade CI.

use crate::job::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Job errors
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    // Project configuration errors
    #[error("Invalid project configuration: {0}")]
    InvalidProject(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Dispatch errors
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
