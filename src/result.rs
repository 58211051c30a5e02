//! Error types that can be emitted from this library

use std::io;

use thiserror::Error;

/// Generic result type with ZipError as its error variant
pub type ZipResult<T> = Result<T, ZipError>;

/// Error type for Zip
#[derive(Debug, Error)]
pub enum ZipError {
    /// The archive footer could not be located, or a header failed to parse
    #[error("unreadable archive: {0}")]
    UnreadableArchive(&'static str),

    /// The archive target cannot be written, or already exists on create
    #[error("unwritable archive: {0}")]
    UnwritableArchive(&'static str),

    /// The checksum computed over an extracted entry did not match the catalog
    #[error("invalid CRC-32: expected {expected:#010x}, got {actual:#010x}")]
    InvalidCrc32 {
        /// Checksum recorded in the central directory
        expected: u32,
        /// Checksum computed over the extracted bytes
        actual: u32,
    },

    /// The path supplied for a new entry cannot be stored
    #[error("invalid entry path: {0}")]
    InvalidEntryPath(&'static str),

    /// A cancellation token was observed mid-stream
    #[error("operation cancelled")]
    Cancelled,

    /// The requested entry is not present in the catalog
    #[error("specified entry not found in archive")]
    EntryNotFound,

    /// A backing-level read failure outside the footer scan
    #[error("unreadable file: {0}")]
    UnreadableFile(#[source] io::Error),

    /// A backing-level write failure
    #[error("unwritable file: {0}")]
    UnwritableFile(#[source] io::Error),
}

impl ZipError {
    pub(crate) fn unreadable(err: io::Error) -> ZipError {
        ZipError::UnreadableFile(err)
    }

    pub(crate) fn unwritable(err: io::Error) -> ZipError {
        ZipError::UnwritableFile(err)
    }
}
