//! Core error types

use thiserror::Error;

/// Errors raised by the session-scoped primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A widget value was read by an id with no registered metadata.
    /// Recoverable by the caller - it typically means "use the default".
    #[error("no such widget: {0}")]
    NoSuchWidget(String),

    /// An outgoing message exceeded the configured size limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
