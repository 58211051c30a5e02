//! A library for reading, writing and editing ZIP archives in place.
//!
//! The central type is [`Archive`], which owns a seekable backing (a file on
//! disk or an in-memory buffer) and mirrors its central directory as an
//! ordered catalog. Archives opened for update can add, overwrite and remove
//! entries incrementally; every mutation rewrites the central directory
//! before returning, so the on-disk index stays authoritative.
//!
//! Both the original 32-bit format and the ZIP64 extension are supported,
//! with only the `Stored` and `Deflated` compression methods.
//!
//! ```
//! use zipkit::{Archive, CompressionMethod, EntryOptions};
//!
//! fn roundtrip() -> zipkit::ZipResult<()> {
//!     let mut archive = Archive::create_in_memory()?;
//!     let options = EntryOptions::default().compression_method(CompressionMethod::Stored);
//!     archive.add_entry("a.txt", &options, &b"hello"[..])?;
//!
//!     let mut content = Vec::new();
//!     archive.extract("a.txt", &mut content)?;
//!     assert_eq!(content, b"hello");
//!     Ok(())
//! }
//! # roundtrip().unwrap();
//! ```

#![warn(missing_docs)]

pub use crate::archive::{AccessMode, Archive, ExtractOptions, DEFAULT_BUFFER_SIZE};
pub use crate::cancel::CancelToken;
pub use crate::compression::CompressionMethod;
pub use crate::result::{ZipError, ZipResult};
pub use crate::storage::{Backing, OpenFlags};
pub use crate::types::{DateTime, Entry, EntryKind, System};
pub use crate::write::EntryOptions;

mod archive;
mod cancel;
mod compression;
mod crc32;
pub mod result;
mod spec;
mod storage;
mod types;
mod write;
