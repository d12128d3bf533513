//! Error types for the MT-32 DSP core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum MtError {
    #[error("{operation}: expected {expected} samples, got {actual}")]
    LengthMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Block of {len} frames exceeds the configured maximum of {max}")]
    BlockTooLarge { len: usize, max: usize },

    #[error("Expected {expected} filter coefficients, got {actual}")]
    CoefficientCount { expected: usize, actual: usize },

    #[error("Invalid filter parameter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MtError {
    fn from(err: serde_json::Error) -> Self {
        MtError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type MtResult<T> = Result<T, MtError>;

/// Fail with [`MtError::LengthMismatch`] unless `actual == expected`.
#[inline]
pub fn ensure_len(operation: &'static str, expected: usize, actual: usize) -> MtResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(MtError::LengthMismatch {
            operation,
            expected,
            actual,
        })
    }
}
