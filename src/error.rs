//! Error types for the expiring cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the expiring cache.
///
/// Key absence is never an error: lookups return `Ok(None)` for missing or
/// lazily-expired entries. The variants below cover argument validation and
/// lifecycle violations only.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A parameter violated a constraint (empty name, timeout/precision bounds)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted on a stopped strategy or an invalidated folder
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

// == Result Type Alias ==
/// Convenience Result type for the expiring cache.
pub type Result<T> = std::result::Result<T, CacheError>;
