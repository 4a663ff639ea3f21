//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID does not start with any accepted prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The numeric portion is missing, not decimal, or has leading zeros.
    #[error("invalid ID number: '{0}'")]
    InvalidNumber(String),

    /// The number is below the minimum for this ID type.
    #[error("ID number {value} is below the minimum of {min}")]
    OutOfRange { value: u64, min: u64 },
}

impl IdError {
    /// Returns true if this error indicates a prefix mismatch.
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
