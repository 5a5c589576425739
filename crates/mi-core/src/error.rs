//! Error types for the pooling engine.

use thiserror::Error;

/// Pooling error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input: mismatched collaborators, non-nested models, bad options.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure while computing a pooled statistic.
    #[error("Computation error: {0}")]
    Computation(String),

    /// No usable imputations remain.
    #[error("Exhausted: {0}")]
    Exhausted(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
