use thiserror::Error;

use crate::JobStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors surfaced by `JobStore` implementations.
pub enum JobStoreError {
    #[error("job '{job_id}' not found")]
    NotFound { job_id: String },
    #[error("invalid job store endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("job store transport error: {0}")]
    Transport(String),
    #[error("job store returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("failed to decode job record: {0}")]
    Decode(String),
    #[error("job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid patch for job '{job_id}': {reason}")]
    InvalidPatch { job_id: String, reason: String },
    #[error("job store temporarily unavailable: {0}")]
    Unavailable(String),
}

impl JobStoreError {
    /// Returns true when a later attempt may succeed without any caller change.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Unavailable(_) => true,
            Self::HttpStatus { status, .. } => {
                *status == 408 || *status == 425 || *status == 429 || *status >= 500
            }
            Self::NotFound { .. }
            | Self::InvalidEndpoint(_)
            | Self::Decode(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidPatch { .. } => false,
        }
    }
}
