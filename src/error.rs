//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type. Errors are plain
//! values; nothing in the library panics on a failure path.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// Error type returned by producer callbacks, propagated verbatim.
pub type ProducerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which lockfile operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    Open,
    Lock,
    Unlock,
}

impl std::fmt::Display for LockOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Configuration errors
    #[error("invalid cache configuration: {reason}")]
    BadConfig { reason: String },

    // Lockfile errors
    #[error("failed to {op} lockfile {}", path.display())]
    Lock {
        op: LockOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors on data files and directories
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // A present but unparsable item record; never triggers deletion
    #[error("cache corruption in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    // Error from the user-supplied producer, verbatim
    #[error("producer failed")]
    Producer(#[source] ProducerError),

    // Invariant violation; the current operation is aborted without
    // destructive action
    #[error("internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a lockfile error
    pub fn lock(op: LockOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lock {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn bad_config(reason: impl Into<String>) -> Self {
        Self::BadConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the producer callback
    pub fn is_producer_error(&self) -> bool {
        matches!(self, Self::Producer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KilnError::bad_config("maxAge minimum is 10s");
        assert!(err.to_string().contains("maxAge minimum is 10s"));
    }

    #[test]
    fn lock_error_names_operation() {
        let err = KilnError::lock(
            LockOp::Unlock,
            "/tmp/x.lock",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(err.to_string().contains("unlock"));
        assert!(err.to_string().contains("/tmp/x.lock"));
    }

    #[test]
    fn producer_error_detected() {
        let err = KilnError::Producer("compile failed".into());
        assert!(err.is_producer_error());
        assert!(!KilnError::Internal("x".into()).is_producer_error());
    }
}
