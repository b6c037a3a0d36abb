//! Error types for Burrow operations
//!
//! Every fallible operation returns [`BurrowResult`]. Write-path failures are
//! wrapped in [`BurrowError::WriteFailed`] so callers can tell a lost write
//! apart from a read or validation fault.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Write operations whose failures are reported through [`BurrowError::WriteFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Store,
    StoreBulk,
    Update,
    Remove,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteOp::Store => "store",
            WriteOp::StoreBulk => "store_bulk",
            WriteOp::Update => "update",
            WriteOp::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Burrow error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum BurrowError {
    /// Malformed input, rejected before any I/O
    #[error("invalid {field}: {message}")]
    Validation {
        /// Name of the offending field
        field: &'static str,
        /// Human-readable description
        message: String,
    },

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A write reached the driver and failed there
    #[error("{operation} failed in database '{database}': {source}")]
    WriteFailed {
        /// Logical database the write targeted
        database: String,
        /// Which write operation failed
        operation: WriteOp,
        /// Underlying driver error
        #[source]
        source: Box<BurrowError>,
    },

    /// The store handle was destroyed by `drop_instance`
    #[error("store '{name}' has been dropped")]
    StoreDropped {
        /// Name of the dropped store
        name: String,
    },

    /// A driver refused to open a store
    #[error("driver '{driver}' unavailable: {reason}")]
    DriverUnavailable {
        /// Driver name
        driver: &'static str,
        /// Why the driver could not serve the request
        reason: String,
    },

    /// Fault injected by a test driver
    #[error("simulated fault during {operation}")]
    SimulatedFault {
        /// Operation the fault was injected into
        operation: &'static str,
    },

    /// Document could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", location(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Log segment is corrupted and cannot be recovered
    #[error("log corrupted in {} at offset {offset}: {reason}", .path.display())]
    LogCorrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Checksum verification failed
    #[error(
        "checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}",
        .path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Partial entry at the end of a log segment
    #[error(
        "torn write in {} at offset {offset}: need {expected_size} bytes, have {available_bytes}",
        .path.display()
    )]
    TornWrite {
        path: PathBuf,
        expected_size: u32,
        available_bytes: u64,
        offset: u64,
    },

    /// Magic bytes not found at expected location
    #[error(
        "magic bytes not found in {} at offset {offset}: found {:02x}{:02x}{:02x}{:02x}",
        .path.display(),
        .found_bytes[0],
        .found_bytes[1],
        .found_bytes[2],
        .found_bytes[3]
    )]
    NoMagicFound {
        path: PathBuf,
        offset: u64,
        found_bytes: [u8; 4],
    },

    /// Entry size exceeds maximum allowed
    #[error("entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        entry_size: u64,
        max_size: u64,
        /// Whether it's the key or value that's oversized
        component: &'static str,
    },

    /// Unexpected internal failure (e.g. a blocking task panicked)
    #[error("internal error: {0}")]
    Internal(String),
}

impl BurrowError {
    /// Create a validation error for `field`.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    /// Wrap a driver error raised by a write operation.
    #[must_use]
    pub fn write_failed(
        database: impl Into<String>,
        operation: WriteOp,
        source: BurrowError,
    ) -> Self {
        Self::WriteFailed {
            database: database.into(),
            operation,
            source: Box::new(source),
        }
    }

    /// True when this error reports a write that did not reach the store.
    #[must_use]
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::WriteFailed { .. })
    }

    pub(crate) fn io_at(path: &std::path::Path, err: &std::io::Error, what: &str) -> Self {
        Self::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }
}

fn location(path: &Option<PathBuf>) -> String {
    path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default()
}

impl From<std::io::Error> for BurrowError {
    fn from(err: std::io::Error) -> Self {
        BurrowError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BurrowError {
    fn from(err: serde_json::Error) -> Self {
        BurrowError::Codec(err.to_string())
    }
}

/// Result type alias for Burrow operations
pub type BurrowResult<T> = Result<T, BurrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BurrowError::ChecksumMismatch {
            path: PathBuf::from("/tmp/test.log"),
            expected: 0x12345678,
            actual: 0x87654321,
            offset: 1024,
        };

        let display = err.to_string();
        assert!(display.contains("checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_validation_names_field() {
        let err = BurrowError::validation("key", "must not be empty");
        assert_eq!(err.to_string(), "invalid key: must not be empty");
    }

    #[test]
    fn test_write_failed_keeps_source() {
        let err = BurrowError::write_failed(
            "blocks",
            WriteOp::Store,
            BurrowError::SimulatedFault { operation: "set" },
        );
        assert!(err.is_write_failure());
        assert!(err.to_string().contains("store failed in database 'blocks'"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BurrowError = io_err.into();

        match err {
            BurrowError::Io { kind, path, .. } => {
                assert_eq!(kind, std::io::ErrorKind::NotFound);
                assert!(path.is_none());
            }
            _ => panic!("Expected Io error"),
        }
    }
}
