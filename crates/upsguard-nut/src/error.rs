//! Error types for the NUT client boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NutError {
    #[error("upsc exited with {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("upsc timed out after {0}s")]
    TimedOut(u64),

    #[error("upsc returned no output")]
    EmptyOutput,

    #[error("upsc io error: {0}")]
    Io(#[from] std::io::Error),
}
