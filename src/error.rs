//! Error taxonomy for the filter core.
//!
//! Per the error-handling design, only [`ShapeMismatch`](SlamError::ShapeMismatch)
//! and [`OrderViolation`](SlamError::OrderViolation) are fatal. Numerical
//! failures are regularized and, failing that, surfaced here so the caller
//! (always internal to this crate) can log and skip the update rather than
//! propagate. Association ambiguity and weight degeneracy are policy
//! decisions, not errors, and never appear in this enum.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlamError {
    #[error("innovation covariance is not invertible even after regularization")]
    NumericalFailure,

    #[error("observation dimension {got} does not match landmark kind (expected {expected})")]
    ShapeMismatch { expected: usize, got: usize },

    #[error(
        "sensor event timestamp {timestamp_ns} precedes the previously processed event at {previous_ns}"
    )]
    OrderViolation { timestamp_ns: u64, previous_ns: u64 },
}
