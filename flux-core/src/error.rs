use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Commit failed after {applied} applied operation(s): {source}")]
    CommitFailed {
        applied: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by callers for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::TransactionState(_) => "TRANSACTION_STATE",
            Error::CommitFailed { .. } => "COMMIT_FAILED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Disk faults are transient; argument and state errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::CommitFailed { source, .. } => source.is_retryable(),

            Error::Serialization(_) => false,
            Error::InvalidArgument(_) => false,
            Error::TransactionState(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Adds context to an error by wrapping it in an Internal error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flux_core::Error;
    ///
    /// fn write_frames() -> Result<(), Error> {
    ///     Err(Error::Io(std::io::Error::new(
    ///         std::io::ErrorKind::NotFound,
    ///         "file not found"
    ///     )))
    /// }
    ///
    /// fn save_collection() -> Result<(), Error> {
    ///     write_frames().map_err(|e| e.with_context("failed to save collection"))
    /// }
    /// ```
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = Error::TransactionState("no active transaction".into());
        assert_eq!(err.code(), "TRANSACTION_STATE");
        assert!(!err.is_retryable());

        let io = Error::Io(io::Error::new(io::ErrorKind::Other, "disk"));
        assert_eq!(io.code(), "IO_ERROR");
        assert!(io.is_retryable());
    }

    #[test]
    fn test_commit_failed_inherits_retryability() {
        let err = Error::CommitFailed {
            applied: 2,
            source: Box::new(Error::Io(io::Error::new(io::ErrorKind::Other, "disk"))),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("2 applied"));
    }

    #[test]
    fn test_with_context() {
        let err = Error::InvalidArgument("empty name".into()).with_context("create");
        assert!(matches!(err, Error::Internal(ref m) if m.starts_with("create: ")));
    }
}
