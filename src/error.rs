//! Error types for the streamlog storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout streamlog.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for streamlog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The payload bytes of an entry do not match the stored CRC32.
    #[error("Checksum mismatch at position {position}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Position of the frame inside its segment.
        position: u64,
        /// The checksum stored in the frame.
        expected: u32,
        /// The checksum computed over the payload.
        actual: u32,
    },

    /// The log cannot be opened in a consistent state.
    #[error("Corrupted log: {0}")]
    CorruptedLog(String),

    /// A structure on disk is malformed.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An address, segment index or page position is out of range.
    #[error("Invalid address: {0}")]
    Addressing(String),

    /// A write was attempted on a read-only segment.
    #[error("Segment is read-only: {0}")]
    ReadOnly(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The component is in an invalid state for the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The component has been closed.
    #[error("Closed: {0}")]
    Closed(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new corrupted log error.
    pub fn corrupted_log(msg: impl Into<String>) -> Self {
        Error::CorruptedLog(msg.into())
    }

    /// Creates a new addressing error.
    pub fn addressing(msg: impl Into<String>) -> Self {
        Error::Addressing(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for errors that mean the bytes on disk cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::Corruption(_) | Error::CorruptedLog(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
