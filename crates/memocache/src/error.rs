//! Error types for memocache

use std::fmt;

/// Result type alias for fallible cache lookups
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for plain cache operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Key not present in the cache
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "Key not found"),
        }
    }
}

impl std::error::Error for Error {}

/// Error from a memoizing lookup.
///
/// A failed computation is never cached: after any of these errors the key
/// remains absent and a later call computes it again from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeError<E> {
    /// The compute function invoked by this caller failed
    Compute(E),

    /// Another caller's in-flight computation for this key failed, so no
    /// value was produced. The underlying error went to the caller that ran
    /// the computation.
    FlightFailed,
}

impl<E: fmt::Display> fmt::Display for ComputeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::Compute(e) => write!(f, "Compute function failed: {}", e),
            ComputeError::FlightFailed => {
                write!(f, "In-flight computation by another caller failed")
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ComputeError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComputeError::Compute(e) => Some(e),
            ComputeError::FlightFailed => None,
        }
    }
}
