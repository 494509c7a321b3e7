//! Error type for the statistics engine.
//!
//! Degenerate statistics (a single pixel, a zero variance, identical
//! channels) are never errors; they produce well-defined values. Errors are
//! reserved for requests that cannot be served.

use thiserror::Error;

use crate::ids::FieldId;

/// A pixel source failed to deliver a line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read image line {line}: {reason}")]
pub struct PixelReadError {
    /// Line that could not be read
    pub line: u32,
    /// Description supplied by the source
    pub reason: String,
}

impl PixelReadError {
    /// Create a read error for `line`.
    #[must_use]
    pub fn new(line: u32, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors returned by project statistics operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    /// The class number is not in the project.
    #[error("class number {0} is out of range")]
    InvalidClass(u32),

    /// The field does not exist.
    #[error("field {0} does not exist")]
    InvalidField(FieldId),

    /// A request is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Statistics storage could not be sized.
    #[error("statistics storage of {requested} bytes exceeds the limit of {limit} bytes")]
    ResourceExhausted {
        /// Bytes the request needs
        requested: u64,
        /// Bytes allowed by the configuration or the allocator
        limit: u64,
    },

    /// The pixel source failed.
    #[error(transparent)]
    PixelRead(#[from] PixelReadError),

    /// The class has no training pixels loaded.
    #[error("class {0} has no training statistics loaded")]
    NoStatistics(u32),

    /// Leave-one-out statistics need a mixing parameter that was never computed.
    #[error("leave-one-out mixing parameter has not been computed for class {0}")]
    MixingParameterUnavailable(u32),

    /// A matrix operation rejected its operands.
    #[error(transparent)]
    Matrix(#[from] tally::Error),

    /// The operation was canceled.
    #[error("operation canceled")]
    Canceled,
}

impl StatsError {
    /// True if the operation stopped because it was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, StatsError>;
