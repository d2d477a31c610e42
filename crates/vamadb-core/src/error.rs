//! Error types for `VamaDB`.
//!
//! The core exposes a single error enum so that wrapping RPC/HTTP layers can
//! map each kind to their own status codes. Error codes follow the pattern
//! `VAMA-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for `VamaDB` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `VamaDB` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Property missing from the schema, value not assignable to the declared
    /// type, or index parameters violated (VAMA-001).
    #[error("[VAMA-001] Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Operation not permitted, such as writes to reserved node ids or an
    /// unknown operator for a property type (VAMA-002).
    #[error("[VAMA-002] Invalid operation: {0}")]
    InvalidOperation(String),

    /// Bucket read/write failure or corrupt serialised state (VAMA-003).
    #[error("[VAMA-003] Storage error: {0}")]
    Storage(String),

    /// Operation cancelled by the caller or by a sibling failure (VAMA-004).
    #[error("[VAMA-004] Cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation. Please report if encountered (VAMA-005).
    #[error("[VAMA-005] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "VAMA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SchemaMismatch(_) => "VAMA-001",
            Self::InvalidOperation(_) => "VAMA-002",
            Self::Storage(_) => "VAMA-003",
            Self::Cancelled(_) => "VAMA-004",
            Self::Internal(_) => "VAMA-005",
        }
    }

    /// Returns true if this error is recoverable by retrying the operation.
    ///
    /// Internal errors indicate invariant violations and are not recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("io: {err}"))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Self::Storage(format!("sled: {err}"))
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Self::Storage(format!("bincode: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SchemaMismatch(String::new()).code(), "VAMA-001");
        assert_eq!(Error::Internal(String::new()).code(), "VAMA-005");
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::Storage("disk full".into()).is_recoverable());
        assert!(!Error::Internal("bad invariant".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_code() {
        let err = Error::InvalidOperation("cannot modify start node".into());
        assert!(err.to_string().contains("VAMA-002"));
    }
}
