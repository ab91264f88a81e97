//! Error types for hermes-postings

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A build, merge or decode invariant was broken by the caller or by
    /// upstream data. Never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Missing term statistic: {0} must be set before serialization")]
    MissingStatistic(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Postings corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for building an [`Error::InvariantViolation`].
pub(crate) fn invariant(msg: impl Into<String>) -> Error {
    Error::InvariantViolation(msg.into())
}
