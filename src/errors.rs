//! Error types for spawn operations

use std::io;
use thiserror::Error;

/// Result type for spawn operations
pub type Result<T> = std::result::Result<T, SpawnError>;

/// Errors surfaced to the caller of the runner.
///
/// Launch and child-setup failures are not errors at this level: they are
/// reported inside [`crate::SpawnResult`]. These variants cover requests that
/// cannot be turned into an exec plan and failures of the supervising parent.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("{message}")]
    CommandFailed {
        command: String,
        status: i32,
        message: String,
    },
}
