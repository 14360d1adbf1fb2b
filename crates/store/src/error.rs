//! Error types for the cellar storage engine.

use std::io;

use snafu::Snafu;

/// Unique cell identifier, assigned monotonically within one store.
pub type CellId = u64;

/// Result type alias for cellar operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying files.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// An empty key was passed to an operation.
    #[snafu(display("invalid key: keys must be non-empty"))]
    InvalidKey,

    /// No live blob is stored under the requested key.
    #[snafu(display("key not found"))]
    KeyNotFound,

    /// `put` was called with a key that is already live.
    #[snafu(display("duplicate key"))]
    DuplicateKey,

    /// The value does not fit within one stream page.
    #[snafu(display("blob too big: {size} bytes (page size limit {max})"))]
    BlobTooBig {
        /// Size of the rejected value in bytes.
        size: i64,
        /// Configured page size limit in bytes.
        max: i64,
    },

    /// A destructive operation was called on an immutable store.
    #[snafu(display("store is immutable"))]
    Immutable,

    /// Blob payload failed CRC-32 verification on read.
    #[snafu(display("blob checksum failed: stored {stored:#010x}, computed {computed:#010x}"))]
    ChecksumFailed {
        /// Checksum recorded in the cell.
        stored: u32,
        /// Checksum computed over the bytes read back.
        computed: u32,
    },

    /// The header file does not start with the expected magic bytes.
    #[snafu(display("invalid header magic"))]
    InvalidMagic,

    /// The store directory path has no usable final segment.
    #[snafu(display("invalid store path: '{path}'"))]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// An operation was attempted on a store that has been closed.
    #[snafu(display("store is closed"))]
    Closed,

    /// On-disk state is corrupted or malformed.
    #[snafu(display("corrupted store: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// A mutation forwarded to the mirror store failed.
    #[snafu(display("mirror error: {source}"))]
    Mirror {
        /// The error reported by the mirror.
        source: Box<Error>,
    },

    /// The intents journal failed.
    #[snafu(display("intents error: {source}"))]
    Intents {
        /// The error reported by the journal store.
        source: Box<Error>,
    },

    /// One or more subsystems failed during close.
    #[snafu(display("close failed: {detail}"))]
    CloseFailed {
        /// Per-subsystem failure summary.
        detail: String,
    },
}

// Automatic conversion from io::Error for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl Error {
    /// Wraps an error reported by the mirror store.
    pub(crate) fn mirror(source: Error) -> Self {
        Error::Mirror { source: Box::new(source) }
    }

    /// Wraps an error reported by the intents journal store.
    pub(crate) fn intents(source: Error) -> Self {
        Error::Intents { source: Box::new(source) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        let display = format!("{err}");
        assert!(display.starts_with("I/O error:"), "got: {display}");
    }

    #[test]
    fn test_error_display_invalid_key() {
        assert_eq!(format!("{}", Error::InvalidKey), "invalid key: keys must be non-empty");
    }

    #[test]
    fn test_error_display_key_not_found() {
        assert_eq!(format!("{}", Error::KeyNotFound), "key not found");
    }

    #[test]
    fn test_error_display_duplicate_key() {
        assert_eq!(format!("{}", Error::DuplicateKey), "duplicate key");
    }

    #[test]
    fn test_error_display_blob_too_big() {
        let err = Error::BlobTooBig { size: 2048, max: 1024 };
        assert_eq!(format!("{err}"), "blob too big: 2048 bytes (page size limit 1024)");
    }

    #[test]
    fn test_error_display_checksum_failed() {
        let err = Error::ChecksumFailed { stored: 0xDEADBEEF, computed: 0x12345678 };
        let display = format!("{err}");
        assert!(display.contains("0xdeadbeef"), "got: {display}");
        assert!(display.contains("0x12345678"), "got: {display}");
    }

    #[test]
    fn test_error_display_mirror_wraps_source() {
        let err = Error::mirror(Error::KeyNotFound);
        assert_eq!(format!("{err}"), "mirror error: key not found");
    }

    #[test]
    fn test_error_display_intents_wraps_source() {
        let err = Error::intents(Error::DuplicateKey);
        assert_eq!(format!("{err}"), "intents error: duplicate key");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io { source } => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::mirror(Error::InvalidMagic);
        assert!(err.source().is_some(), "Error::Mirror should have a source");
    }
}
