//! Errors raised by the pure record types.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejections that depend only on the input: nothing here ever touches a store
/// or a broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input a caller can fix, e.g. an empty token value.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A path or body identifier that is not a `RecordId`.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
