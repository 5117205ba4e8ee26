//! Storage error taxonomy and AWS error classification
//!
//! Absence and optimistic-lock conflicts are not errors: reads return
//! `Option`, listings return empty vectors and conditional writes return
//! `false`. Everything here is either a caller mistake (`Validation`), a
//! transport failure propagated unchanged, or an exhausted index retry budget.

use iam_collect_common::ArnError;
use thiserror::Error;

/// Errors surfaced by every storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller omitted or malformed a required identifier (fatal, never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed ARN supplied by the caller
    #[error("Invalid ARN: {0}")]
    InvalidArn(#[from] ArnError),

    /// Local filesystem failure
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// S3 request failure other than absence or a precondition conflict
    #[error("S3 error for key '{key}': {message}")]
    S3 {
        key: String,
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },

    /// SQLite driver failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Stored document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An index kept changing underneath every update attempt
    #[error("Index '{index}' was modified concurrently on all {attempts} attempts")]
    IndexConflict { index: String, attempts: usize },
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a caller error that must not be retried
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_) | StoreError::InvalidArn(_))
    }

    /// Whether this is an optimistic-lock conflict on an index
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::IndexConflict { .. })
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// How an S3 error response should be treated by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ErrorKind {
    /// Key or bucket does not exist
    NotFound,
    /// Conditional write lost a race (`If-Match` / `If-None-Match`)
    PreconditionFailed,
    /// Anything else; propagated as a transport error
    Other,
}

/// Known S3 error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NotFound"];

/// Known S3 error codes for conditional write conflicts
const PRECONDITION_CODES: &[&str] = &["PreconditionFailed", "ConditionalRequestConflict"];

/// Classify an S3 error from its error code and HTTP status.
pub fn classify_s3_error(code: Option<&str>, status: Option<u16>) -> S3ErrorKind {
    match (code, status) {
        (Some(c), _) if NOT_FOUND_CODES.contains(&c) => S3ErrorKind::NotFound,
        (Some(c), _) if PRECONDITION_CODES.contains(&c) => S3ErrorKind::PreconditionFailed,
        (_, Some(404)) => S3ErrorKind::NotFound,
        (_, Some(412)) => S3ErrorKind::PreconditionFailed,
        // 409 is returned when a conditional write races another in flight
        (_, Some(409)) if code.is_none() => S3ErrorKind::PreconditionFailed,
        _ => S3ErrorKind::Other,
    }
}
