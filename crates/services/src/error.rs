//! Shared error types for the services crate.

use std::sync::Arc;

use thiserror::Error;

use quiz_core::model::{AnswerError, SubmissionError};
use storage::repository::StorageError;

/// Errors emitted by quiz sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("attempt already submitted")]
    AlreadySubmitted,
    #[error("draft save failed: {0}")]
    Save(Arc<StorageError>),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading engine configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a positive number of milliseconds, got {value:?}")]
    InvalidMillis { var: &'static str, value: String },
}
