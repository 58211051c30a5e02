//! Backing storage for archives.
//!
//! An [`Archive`](crate::archive::Archive) owns exactly one [`Backing`] for
//! its lifetime: either a regular file or a growable in-memory buffer. Both
//! variants answer to the same operation table, so the catalog and streaming
//! code never care which one they sit on.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

/// Capability set used when acquiring a backing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Reads are permitted
    pub read: bool,
    /// Writes are permitted
    pub write: bool,
    /// Create the target; fails if it already exists
    pub create: bool,
    /// Discard existing content on open
    pub truncate: bool,
    /// Seek to end before every write
    pub append: bool,
}

impl OpenFlags {
    /// Flags for a read-only backing.
    pub fn read_only() -> OpenFlags {
        OpenFlags {
            read: true,
            ..OpenFlags::default()
        }
    }

    /// Flags for updating an existing target in place.
    pub fn read_write() -> OpenFlags {
        OpenFlags {
            read: true,
            write: true,
            ..OpenFlags::default()
        }
    }

    /// Flags for creating a fresh target; open fails if it already exists.
    pub fn create_new() -> OpenFlags {
        OpenFlags {
            read: true,
            write: true,
            create: true,
            ..OpenFlags::default()
        }
    }
}

#[derive(Debug)]
enum Inner {
    File(fs::File),
    Memory { buf: Vec<u8>, pos: u64 },
}

/// A uniform seekable byte stream over a file or an in-memory buffer.
#[derive(Debug)]
pub struct Backing {
    inner: Inner,
    flags: OpenFlags,
}

impl Backing {
    /// Open a file backing with the given capability set.
    pub fn open_file<P: AsRef<Path>>(path: P, flags: OpenFlags) -> io::Result<Backing> {
        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create_new(flags.create)
            .truncate(flags.truncate)
            .open(path)?;
        Ok(Backing {
            inner: Inner::File(file),
            flags,
        })
    }

    /// Wrap an owned byte buffer. The cursor starts at offset zero.
    pub fn from_vec(buf: Vec<u8>, flags: OpenFlags) -> Backing {
        Backing {
            inner: Inner::Memory { buf, pos: 0 },
            flags,
        }
    }

    /// The capability set this backing was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current length of the underlying stream in bytes.
    pub fn len(&mut self) -> io::Result<u64> {
        match &mut self.inner {
            Inner::File(file) => Ok(file.metadata()?.len()),
            Inner::Memory { buf, .. } => Ok(buf.len() as u64),
        }
    }

    /// Whether the underlying stream is empty.
    pub fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cut the stream at `size` bytes. Shrinking discards the tail; growing
    /// zero-fills. The memory cursor is clamped to the new length.
    pub fn truncate(&mut self, size: u64) -> io::Result<()> {
        if !self.flags.write {
            return Err(writes_not_permitted());
        }
        match &mut self.inner {
            Inner::File(file) => file.set_len(size),
            Inner::Memory { buf, pos } => {
                buf.resize(size as usize, 0);
                *pos = (*pos).min(size);
                Ok(())
            }
        }
    }

    /// Flush buffered state to durable storage. A no-op for memory backings.
    pub fn sync(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::File(file) => file.sync_all(),
            Inner::Memory { .. } => Ok(()),
        }
    }

    /// Seek to the end of the stream, returning the new offset.
    pub fn seek_to_end(&mut self) -> io::Result<u64> {
        self.seek(io::SeekFrom::End(0))
    }

    /// Recover the owned buffer of a memory backing; `None` for files.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self.inner {
            Inner::File(_) => None,
            Inner::Memory { buf, .. } => Some(buf),
        }
    }
}

fn writes_not_permitted() -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        "backing was opened without the write capability",
    )
}

impl Read for Backing {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::File(file) => file.read(buf),
            Inner::Memory { buf: data, pos } => {
                let start = (*pos).min(data.len() as u64) as usize;
                let end = (start + buf.len()).min(data.len());
                let count = end - start;
                buf[..count].copy_from_slice(&data[start..end]);
                *pos += count as u64;
                Ok(count)
            }
        }
    }
}

impl Write for Backing {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.flags.write {
            return Err(writes_not_permitted());
        }
        if self.flags.append {
            self.seek(io::SeekFrom::End(0))?;
        }
        match &mut self.inner {
            Inner::File(file) => file.write(buf),
            Inner::Memory { buf: data, pos } => {
                let start = *pos as usize;
                let end = start + buf.len();
                if end > data.len() {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                *pos = end as u64;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::File(file) => file.flush(),
            Inner::Memory { .. } => Ok(()),
        }
    }
}

impl Seek for Backing {
    fn seek(&mut self, target: io::SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            Inner::File(file) => file.seek(target),
            Inner::Memory { buf, pos } => {
                let len = buf.len() as i64;
                let requested = match target {
                    io::SeekFrom::Start(offset) => offset.min(i64::MAX as u64) as i64,
                    io::SeekFrom::End(offset) => len + offset,
                    io::SeekFrom::Current(offset) => *pos as i64 + offset,
                };
                // Out-of-range positions clamp to the buffer bounds rather
                // than failing or leaving a sparse gap.
                *pos = requested.clamp(0, len) as u64;
                Ok(*pos)
            }
        }
    }
}
