//! Error types for log operations.

use std::io;

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the log.
///
/// All errors propagate to the caller; none are handled internally.
/// `Corrupt` is sticky once raised by a truncation: every subsequent
/// operation on the same instance fails with it until the log is
/// reopened and recovery reconciles the directory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// On-disk state is inconsistent, or an invariant was violated
    /// mid-truncation.
    #[error("log corrupt")]
    Corrupt,

    /// The log has been closed.
    #[error("log closed")]
    Closed,

    /// Read index is zero or outside `[first_index, last_index]`.
    #[error("entry not found")]
    NotFound,

    /// Batch indices are not strictly sequential with `last_index + 1`.
    #[error("entries out of order")]
    OutOfOrder,

    /// Truncation index is zero or outside `[first_index, last_index]`.
    #[error("index out of range")]
    OutOfRange,

    /// Bad configuration or reserved path.
    #[error("invalid usage: {0}")]
    Invalid(String),

    /// An underlying filesystem call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check if this error indicates corruption.
    ///
    /// Used by callers to decide whether a reopen (which runs recovery)
    /// is warranted.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt)
    }

    /// Check if this error indicates the log was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Corrupt.to_string(), "log corrupt");
        assert_eq!(Error::Closed.to_string(), "log closed");
        assert_eq!(Error::NotFound.to_string(), "entry not found");
        assert_eq!(Error::OutOfOrder.to_string(), "entries out of order");
        assert_eq!(Error::OutOfRange.to_string(), "index out of range");
    }

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::Corrupt.is_corrupt());
        assert!(!Error::Closed.is_corrupt());
        assert!(Error::Closed.is_closed());
        assert!(!Error::NotFound.is_closed());
    }

    #[test]
    fn test_io_error_conversion() {
        fn fails() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
