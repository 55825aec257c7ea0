//! Error taxonomy for process management

use thiserror::Error;

/// Errors surfaced by the process manager.
///
/// Every variant is scoped to a single process; none of them leave the
/// manager's table in an inconsistent state.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process {0} not found")]
    NotFound(String),

    #[error("Failed to start process {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill process {id}: {source}")]
    Kill {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {0} was released while waiting for it")]
    Released(String),

    #[error("Invalid process request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
