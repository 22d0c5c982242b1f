//! Error types for the shutdown boundary.

use thiserror::Error;

/// Failure of a single external invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{description} timed out after {secs}s")]
    TimedOut { description: String, secs: u64 },

    #[error("{description} failed: {source}")]
    Io {
        description: String,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid predefined remote action in configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("unknown predefined action: {0}")]
    UnknownAction(String),

    #[error("predefined action {0} requires a path")]
    MissingPath(&'static str),
}
