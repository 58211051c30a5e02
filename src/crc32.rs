//! Helper module to compute a CRC32 checksum

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Reader that accumulates the CRC32 of every byte passing through it.
///
/// The caller compares [`Crc32Reader::finalize`] against the catalogued
/// checksum once the stream is exhausted; the reader itself never fails.
pub(crate) struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R> Crc32Reader<R> {
    pub(crate) fn new(inner: R) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// The checksum over everything read so far.
    pub(crate) fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[0..count]);
        Ok(count)
    }
}
