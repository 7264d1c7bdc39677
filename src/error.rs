//! Error types for quiver.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors carry a
//! status category plus a human-readable message and bubble up unchanged
//! across subsystem boundaries; nothing in the crate attempts to heal a CRC
//! mismatch or a partial write on behalf of the caller.

use thiserror::Error;

/// Result type alias for quiver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quiver operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument is outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named collection, vector, or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The requested operation is not supported by this build.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A vector's length does not match the collection dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared at collection creation.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of file reached where more data was required.
    #[error("unexpected end of file")]
    Eof,

    /// On-disk state is structurally damaged or inconsistent.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A stored CRC-32 does not match the recomputed value.
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// A log record carries an impossible field value.
    #[error("bad record: {0}")]
    BadRecord(String),

    /// A file header is missing, short, or carries a bad magic number.
    #[error("bad header: {0}")]
    BadHeader(String),

    /// A persisted format version this build cannot read.
    #[error("format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this build writes and reads.
        expected: u16,
        /// Version found on disk.
        actual: u16,
    },

    /// An internal invariant was violated. Please report if encountered.
    #[error("internal error: {0}")]
    Internal(String),
}
