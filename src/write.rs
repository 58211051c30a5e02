//! Adding and removing entries, and the central directory rewrite they share.

use std::io;
use std::io::prelude::*;

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::archive::{Archive, DEFAULT_BUFFER_SIZE};
use crate::cancel::CancelToken;
use crate::compression::CompressionMethod;
use crate::result::{ZipError, ZipResult};
use crate::spec;
use crate::spec::{
    CentralDirectoryEnd, Zip64CentralDirectoryEnd, Zip64CentralDirectoryEndLocator, Zip64Limits,
};
use crate::storage::Backing;
use crate::types::{ffi, DateTime, Entry, DEFAULT_VERSION};

/// Metadata for an entry to be written
///
/// ```
/// use zipkit::{Archive, CompressionMethod, EntryOptions};
///
/// # fn doit() -> zipkit::ZipResult<()> {
/// let mut archive = Archive::create_in_memory()?;
/// let options = EntryOptions::default()
///     .compression_method(CompressionMethod::Stored)
///     .unix_permissions(0o755);
/// archive.add_entry("hello_world.txt", &options, &b"Hello, World!"[..])?;
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct EntryOptions {
    pub(crate) compression_method: CompressionMethod,
    pub(crate) compression_level: Option<u32>,
    pub(crate) last_modified_time: DateTime,
    pub(crate) permissions: Option<u32>,
    pub(crate) large_file: bool,
    pub(crate) buffer_size: usize,
    pub(crate) cancel: CancelToken,
}

impl Default for EntryOptions {
    /// Construct a new EntryOptions object
    fn default() -> EntryOptions {
        EntryOptions {
            compression_method: CompressionMethod::Deflated,
            compression_level: None,
            #[cfg(feature = "time")]
            last_modified_time: DateTime::from_time(time::OffsetDateTime::now_utc()),
            #[cfg(not(feature = "time"))]
            last_modified_time: DateTime::default(),
            permissions: None,
            large_file: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cancel: CancelToken::default(),
        }
    }
}

impl EntryOptions {
    /// Set the compression method for the new entry
    ///
    /// The default is `CompressionMethod::Deflated`.
    #[must_use]
    pub fn compression_method(mut self, method: CompressionMethod) -> EntryOptions {
        self.compression_method = method;
        self
    }

    /// Set the compression level for the new entry
    ///
    /// `None` value specifies default compression level.
    /// `Deflated` accepts 0 - 9; `Stored` only allows `None`.
    #[must_use]
    pub fn compression_level(mut self, level: Option<u32>) -> EntryOptions {
        self.compression_level = level;
        self
    }

    /// Set the last modified time
    ///
    /// The default is the current timestamp if the 'time' feature is enabled, and 1980-01-01
    /// otherwise
    #[must_use]
    pub fn last_modified_time(mut self, mod_time: DateTime) -> EntryOptions {
        self.last_modified_time = mod_time;
        self
    }

    /// Set the permissions for the new entry.
    ///
    /// The format is represented with unix-style permissions.
    /// The default is `0o644`, which represents `rw-r--r--` for files,
    /// and `0o755`, which represents `rwxr-xr-x` for directories.
    ///
    /// This method only preserves the `&0o777` bits; the file type bits are
    /// chosen by the add operation used.
    #[must_use]
    pub fn unix_permissions(mut self, mode: u32) -> EntryOptions {
        self.permissions = Some(mode & 0o777);
        self
    }

    /// Set whether the new entry may grow past 4 GiB.
    ///
    /// If set to `false` and the entry exceeds the limit, the add fails. If
    /// set to `true`, readers will require ZIP64 support and 20 bytes are
    /// wasted when the entry stays small. The default is `false`.
    #[must_use]
    pub fn large_file(mut self, large: bool) -> EntryOptions {
        self.large_file = large;
        self
    }

    /// Set the chunk size used while streaming the content
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> EntryOptions {
        self.buffer_size = buffer_size;
        self
    }

    /// Poll the given token between chunks and abort when it fires
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> EntryOptions {
        self.cancel = cancel;
        self
    }
}

impl Archive {
    /// Add a file entry, pulling its content from `provider`.
    ///
    /// The payload is written over the outgoing central directory, which is
    /// rewritten behind it afterwards, so the archive is consistent again
    /// when this returns. If `path` already names an entry, the old entry is
    /// removed first and the add behaves as an overwrite.
    ///
    /// The local header is emitted up front with zero checksum and sizes and
    /// patched once the stream is finished; the streaming flag is never set.
    pub fn add_entry<R: Read>(
        &mut self,
        path: &str,
        options: &EntryOptions,
        provider: R,
    ) -> ZipResult<()> {
        let mut options = options.clone();
        if options.permissions.is_none() {
            options.permissions = Some(0o644);
        }
        *options.permissions.as_mut().unwrap() |= ffi::S_IFREG;
        self.add_entry_inner(path.to_string(), &options, provider)
    }

    /// Add a directory entry.
    ///
    /// Directories carry no content; a trailing `/` is appended to the path
    /// when missing.
    pub fn add_directory(&mut self, path: &str, options: &EntryOptions) -> ZipResult<()> {
        let mut options = options.clone();
        if options.permissions.is_none() {
            options.permissions = Some(0o755);
        }
        *options.permissions.as_mut().unwrap() |= ffi::S_IFDIR;
        options.compression_method = CompressionMethod::Stored;
        options.compression_level = None;

        let path = match path.chars().last() {
            Some('/') | Some('\\') => path.to_string(),
            _ => format!("{path}/"),
        };
        self.add_entry_inner(path, &options, io::empty())
    }

    /// Add a symlink entry pointing at `target`.
    ///
    /// The target is stored as the entry content. Compressing a path rarely
    /// pays for itself, so symlinks are always stored.
    pub fn add_symlink(
        &mut self,
        path: &str,
        target: &str,
        options: &EntryOptions,
    ) -> ZipResult<()> {
        let mut options = options.clone();
        if options.permissions.is_none() {
            options.permissions = Some(0o777);
        }
        *options.permissions.as_mut().unwrap() |= ffi::S_IFLNK;
        options.compression_method = CompressionMethod::Stored;
        options.compression_level = None;

        self.add_entry_inner(path.to_string(), &options, target.as_bytes())
    }

    fn add_entry_inner<R: Read>(
        &mut self,
        path: String,
        options: &EntryOptions,
        mut provider: R,
    ) -> ZipResult<()> {
        self.ensure_writable()?;
        if path.is_empty() {
            return Err(ZipError::InvalidEntryPath("entry path is empty"));
        }
        if path.len() > u16::MAX as usize {
            return Err(ZipError::InvalidEntryPath("entry path exceeds 65535 bytes"));
        }
        let compression = effective_compression(options)?;

        if self.names_map.contains_key(&path) {
            self.remove_entry_with(&path, options.buffer_size, &options.cancel)?;
        }

        let mut last_modified_time = options.last_modified_time;
        if !last_modified_time.is_valid() {
            last_modified_time = EntryOptions::default().last_modified_time;
        }

        let permissions = options.permissions.unwrap_or(0o100644);
        let header_start = self.cd_start;
        let mut entry = Entry {
            host_system: crate::types::System::Unix as u8,
            version_made_by: DEFAULT_VERSION,
            encrypted: false,
            is_utf8: !path.is_ascii(),
            using_data_descriptor: false,
            compression_method: options.compression_method,
            last_modified_time,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name_raw: path.as_bytes().to_vec(),
            file_name: path,
            extra_field: Vec::new(),
            file_comment: Vec::new(),
            external_attributes: permissions << 16,
            header_start,
            data_start: 0,
            descriptor_size: 0,
            large_file: options.large_file,
        };

        // The payload goes where the outgoing central directory begins; the
        // directory is rewritten behind the new entry once it is complete.
        self.backing
            .seek(io::SeekFrom::Start(header_start))
            .map_err(ZipError::unwritable)?;
        write_local_file_header(&mut self.backing, &entry)?;
        entry.data_start = self
            .backing
            .stream_position()
            .map_err(ZipError::unwritable)?;

        let mut hasher = Hasher::new();
        let mut uncompressed: u64 = 0;
        {
            let mut sink = EntryWriter::new(&mut self.backing, compression);
            let mut buf = vec![0u8; options.buffer_size.max(1)];
            loop {
                if options.cancel.is_cancelled() {
                    return Err(ZipError::Cancelled);
                }
                let count = provider.read(&mut buf).map_err(ZipError::unreadable)?;
                if count == 0 {
                    break;
                }
                hasher.update(&buf[..count]);
                uncompressed += count as u64;
                if uncompressed > self.limits.max_field_bytes && !entry.large_file {
                    return Err(ZipError::UnwritableArchive(
                        "entry exceeds the 32-bit size fields and was not marked large",
                    ));
                }
                sink.write_all(&buf[..count]).map_err(ZipError::unwritable)?;
            }
            sink.finish().map_err(ZipError::unwritable)?;
        }

        let payload_end = self
            .backing
            .stream_position()
            .map_err(ZipError::unwritable)?;
        entry.crc32 = hasher.finalize();
        entry.uncompressed_size = uncompressed;
        entry.compressed_size = payload_end - entry.data_start;

        update_local_file_header(&mut self.backing, &entry, &self.limits)?;

        self.cd_start = payload_end;
        self.names_map
            .insert(entry.file_name.clone(), self.entries.len());
        self.entries.push(entry);
        self.rewrite_central_directory()?;
        self.backing.sync().map_err(ZipError::unwritable)?;
        Ok(())
    }

    /// Remove an entry, compacting its bytes out of the backing.
    pub fn remove_entry(&mut self, path: &str) -> ZipResult<()> {
        self.remove_entry_with(path, DEFAULT_BUFFER_SIZE, &CancelToken::default())
    }

    /// Remove an entry with explicit buffering and cancellation behavior.
    ///
    /// Everything between the removed entry and the central directory slides
    /// leftward in `buffer_size` chunks, successor offsets are adjusted, and
    /// the directory is rewritten at its new position before truncating the
    /// now shorter backing.
    pub fn remove_entry_with(
        &mut self,
        path: &str,
        buffer_size: usize,
        cancel: &CancelToken,
    ) -> ZipResult<()> {
        self.ensure_writable()?;
        let index = *self.names_map.get(path).ok_or(ZipError::EntryNotFound)?;
        let removed = self.entries[index].clone();
        let gap = removed.local_size();
        let hole_start = removed.header_start;

        let mut read_pos = hole_start + gap;
        let mut write_pos = hole_start;
        let mut buf = vec![0u8; buffer_size.max(1)];
        while read_pos < self.cd_start {
            if cancel.is_cancelled() {
                return Err(ZipError::Cancelled);
            }
            let count = ((self.cd_start - read_pos) as usize).min(buf.len());
            self.backing
                .seek(io::SeekFrom::Start(read_pos))
                .map_err(ZipError::unreadable)?;
            self.backing
                .read_exact(&mut buf[..count])
                .map_err(ZipError::unreadable)?;
            self.backing
                .seek(io::SeekFrom::Start(write_pos))
                .map_err(ZipError::unwritable)?;
            self.backing
                .write_all(&buf[..count])
                .map_err(ZipError::unwritable)?;
            read_pos += count as u64;
            write_pos += count as u64;
        }
        log::debug!(
            "compacted {gap} bytes out of the backing for removed entry {:?}",
            removed.file_name
        );

        self.entries.remove(index);
        for entry in &mut self.entries {
            if entry.header_start > hole_start {
                entry.header_start -= gap;
                entry.data_start -= gap;
            }
        }
        self.names_map.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.names_map.insert(entry.file_name.clone(), i);
        }

        self.cd_start -= gap;
        self.rewrite_central_directory()?;
        self.backing.sync().map_err(ZipError::unwritable)?;
        Ok(())
    }

    /// Set the archive comment and rewrite the footer.
    pub fn set_comment<S: Into<Vec<u8>>>(&mut self, comment: S) -> ZipResult<()> {
        self.ensure_writable()?;
        let comment = comment.into();
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::UnwritableArchive("comment exceeds 65535 bytes"));
        }
        self.footer.zip_file_comment = comment;
        self.rewrite_central_directory()?;
        self.backing.sync().map_err(ZipError::unwritable)?;
        Ok(())
    }

    /// Serialize the catalog into a fresh central directory at `cd_start`,
    /// followed by the ZIP64 records when any archive total overflows, the
    /// footer, and a truncate to the new end.
    fn rewrite_central_directory(&mut self) -> ZipResult<()> {
        let central_start = self.cd_start;
        self.backing
            .seek(io::SeekFrom::Start(central_start))
            .map_err(ZipError::unwritable)?;
        for entry in &self.entries {
            write_central_directory_header(
                &mut self.backing,
                entry,
                self.archive_offset,
                &self.limits,
            )?;
        }
        let directory_end = self
            .backing
            .stream_position()
            .map_err(ZipError::unwritable)?;
        let central_size = directory_end - central_start;
        let relative_cd_start = central_start - self.archive_offset;
        let count = self.entries.len() as u64;

        let requires_zip64 = count > self.limits.max_entries
            || central_size > self.limits.max_field_bytes
            || relative_cd_start > self.limits.max_field_bytes;
        if requires_zip64 {
            log::debug!("archive totals exceed the narrow footer fields; writing zip64 records");
            let footer64 = Zip64CentralDirectoryEnd {
                version_made_by: DEFAULT_VERSION as u16,
                version_needed_to_extract: 45,
                disk_number: 0,
                disk_with_central_directory: 0,
                number_of_files_on_this_disk: count,
                number_of_files: count,
                central_directory_size: central_size,
                central_directory_offset: relative_cd_start,
            };
            footer64.write(&mut self.backing)?;

            let locator = Zip64CentralDirectoryEndLocator {
                disk_with_central_directory: 0,
                end_of_central_directory_offset: relative_cd_start + central_size,
                number_of_disks: 1,
            };
            locator.write(&mut self.backing)?;
        }

        let footer = CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: sentinel_u16(count, self.limits.max_entries),
            number_of_files: sentinel_u16(count, self.limits.max_entries),
            central_directory_size: sentinel_u32(central_size, self.limits.max_field_bytes),
            central_directory_offset: sentinel_u32(relative_cd_start, self.limits.max_field_bytes),
            zip_file_comment: self.footer.zip_file_comment.clone(),
        };
        footer.write(&mut self.backing)?;

        let end = self
            .backing
            .stream_position()
            .map_err(ZipError::unwritable)?;
        self.backing.truncate(end).map_err(ZipError::unwritable)?;
        self.footer = footer;
        Ok(())
    }

    /// Lower the ZIP64 promotion thresholds so the boundary machinery can be
    /// exercised without multi-gigabyte fixtures.
    #[cfg(test)]
    pub(crate) fn set_zip64_limits(&mut self, max_field_bytes: u64, max_entries: u64) {
        self.limits = Zip64Limits {
            max_field_bytes,
            max_entries,
        };
    }
}

fn sentinel_u16(value: u64, limit: u64) -> u16 {
    if value > limit {
        u16::MAX
    } else {
        value as u16
    }
}

fn sentinel_u32(value: u64, limit: u64) -> u32 {
    if value > limit {
        u32::MAX
    } else {
        value as u32
    }
}

fn effective_compression(options: &EntryOptions) -> ZipResult<Option<Compression>> {
    match options.compression_method {
        CompressionMethod::Stored => {
            if options.compression_level.is_some() {
                Err(ZipError::UnwritableArchive(
                    "stored entries take no compression level",
                ))
            } else {
                Ok(None)
            }
        }
        CompressionMethod::Deflated => {
            let level = clamp_opt(
                options
                    .compression_level
                    .unwrap_or_else(|| Compression::default().level()),
                deflate_compression_level_range(),
            )
            .ok_or(ZipError::UnwritableArchive("unsupported compression level"))?;
            Ok(Some(Compression::new(level)))
        }
        CompressionMethod::Unsupported(_) => Err(ZipError::UnwritableArchive(
            "unsupported compression method",
        )),
    }
}

fn deflate_compression_level_range() -> std::ops::RangeInclusive<u32> {
    Compression::none().level()..=Compression::best().level()
}

fn clamp_opt<T: Ord + Copy>(value: T, range: std::ops::RangeInclusive<T>) -> Option<T> {
    if range.contains(&value) {
        Some(value)
    } else {
        None
    }
}

enum EntryWriter<'a> {
    Storer(&'a mut Backing),
    Deflater(DeflateEncoder<&'a mut Backing>),
}

impl<'a> EntryWriter<'a> {
    fn new(backing: &'a mut Backing, compression: Option<Compression>) -> EntryWriter<'a> {
        match compression {
            None => EntryWriter::Storer(backing),
            Some(level) => EntryWriter::Deflater(DeflateEncoder::new(backing, level)),
        }
    }

    /// Emit the final block and hand the backing back.
    fn finish(self) -> io::Result<()> {
        match self {
            EntryWriter::Storer(_) => Ok(()),
            EntryWriter::Deflater(encoder) => {
                encoder.finish()?;
                Ok(())
            }
        }
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EntryWriter::Storer(w) => w.write(buf),
            EntryWriter::Deflater(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EntryWriter::Storer(w) => w.flush(),
            EntryWriter::Deflater(w) => w.flush(),
        }
    }
}

fn version_needed(entry: &Entry) -> u16 {
    if entry.large_file {
        45
    } else {
        match entry.compression_method {
            CompressionMethod::Deflated => 20,
            _ => 10,
        }
    }
}

fn write_local_file_header(writer: &mut Backing, entry: &Entry) -> ZipResult<()> {
    let write = |writer: &mut Backing| -> io::Result<()> {
        writer.write_u32::<LittleEndian>(spec::LOCAL_FILE_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(version_needed(entry))?;
        let flag = if entry.is_utf8 { 1u16 << 11 } else { 0 };
        writer.write_u16::<LittleEndian>(flag)?;
        writer.write_u16::<LittleEndian>(entry.compression_method.to_u16())?;
        writer.write_u16::<LittleEndian>(entry.last_modified_time.timepart())?;
        writer.write_u16::<LittleEndian>(entry.last_modified_time.datepart())?;
        writer.write_u32::<LittleEndian>(entry.crc32)?;
        if entry.large_file {
            writer.write_u32::<LittleEndian>(spec::ZIP64_BYTES_THR as u32)?;
            writer.write_u32::<LittleEndian>(spec::ZIP64_BYTES_THR as u32)?;
        } else {
            writer.write_u32::<LittleEndian>(entry.compressed_size.min(spec::ZIP64_BYTES_THR) as u32)?;
            writer
                .write_u32::<LittleEndian>(entry.uncompressed_size.min(spec::ZIP64_BYTES_THR) as u32)?;
        }
        writer.write_u16::<LittleEndian>(entry.file_name_raw.len() as u16)?;
        let extra_len = if entry.large_file { 20 } else { 0 } + entry.extra_field.len() as u16;
        writer.write_u16::<LittleEndian>(extra_len)?;
        writer.write_all(&entry.file_name_raw)?;
        if entry.large_file {
            // Both sizes are mandatory in the local zip64 field, original
            // size first.
            writer.write_u16::<LittleEndian>(0x0001)?;
            writer.write_u16::<LittleEndian>(16)?;
            writer.write_u64::<LittleEndian>(entry.uncompressed_size)?;
            writer.write_u64::<LittleEndian>(entry.compressed_size)?;
        }
        writer.write_all(&entry.extra_field)?;
        Ok(())
    };
    write(writer).map_err(ZipError::unwritable)
}

/// Patch the placeholder checksum and sizes once the payload is streamed.
fn update_local_file_header(
    writer: &mut Backing,
    entry: &Entry,
    limits: &Zip64Limits,
) -> ZipResult<()> {
    const CRC32_OFFSET: u64 = 14;
    // Deflate can expand incompressible input, so the compressed size gets
    // its own overflow check here.
    if !entry.large_file && entry.compressed_size > limits.max_field_bytes {
        return Err(ZipError::UnwritableArchive(
            "entry exceeds the 32-bit size fields and was not marked large",
        ));
    }

    let write = |writer: &mut Backing| -> io::Result<()> {
        writer.seek(io::SeekFrom::Start(entry.header_start + CRC32_OFFSET))?;
        writer.write_u32::<LittleEndian>(entry.crc32)?;
        if entry.large_file {
            let zip64_extra = entry.header_start + 30 + entry.file_name_raw.len() as u64;
            writer.seek(io::SeekFrom::Start(zip64_extra + 4))?;
            writer.write_u64::<LittleEndian>(entry.uncompressed_size)?;
            writer.write_u64::<LittleEndian>(entry.compressed_size)?;
        } else {
            writer.write_u32::<LittleEndian>(entry.compressed_size as u32)?;
            writer.write_u32::<LittleEndian>(entry.uncompressed_size as u32)?;
        }
        Ok(())
    };
    write(writer).map_err(ZipError::unwritable)
}

fn write_central_directory_header(
    writer: &mut Backing,
    entry: &Entry,
    archive_offset: u64,
    limits: &Zip64Limits,
) -> ZipResult<()> {
    // Buffer the zip64 extra field to learn its variable length first.
    let relative_offset = entry.header_start - archive_offset;
    let mut zip64_extra_field = [0u8; 28];
    let zip64_extra_field_length = write_central_zip64_extra_field(
        &mut zip64_extra_field.as_mut_slice(),
        entry,
        relative_offset,
        limits,
    )
    .map_err(ZipError::unwritable)?;

    let write = |writer: &mut Backing| -> io::Result<()> {
        writer.write_u32::<LittleEndian>(spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE)?;
        let version_made_by = (entry.host_system as u16) << 8 | entry.version_made_by as u16;
        writer.write_u16::<LittleEndian>(version_made_by)?;
        writer.write_u16::<LittleEndian>(version_needed(entry))?;
        let mut flag = if entry.is_utf8 { 1u16 << 11 } else { 0 };
        if entry.using_data_descriptor {
            flag |= 1 << 3;
        }
        if entry.encrypted {
            flag |= 1;
        }
        writer.write_u16::<LittleEndian>(flag)?;
        writer.write_u16::<LittleEndian>(entry.compression_method.to_u16())?;
        writer.write_u16::<LittleEndian>(entry.last_modified_time.timepart())?;
        writer.write_u16::<LittleEndian>(entry.last_modified_time.datepart())?;
        writer.write_u32::<LittleEndian>(entry.crc32)?;
        writer.write_u32::<LittleEndian>(sentinel_u32(
            entry.compressed_size,
            limits.max_field_bytes,
        ))?;
        writer.write_u32::<LittleEndian>(sentinel_u32(
            entry.uncompressed_size,
            limits.max_field_bytes,
        ))?;
        writer.write_u16::<LittleEndian>(entry.file_name_raw.len() as u16)?;
        writer.write_u16::<LittleEndian>(
            zip64_extra_field_length + entry.extra_field.len() as u16,
        )?;
        writer.write_u16::<LittleEndian>(entry.file_comment.len() as u16)?;
        // disk number start
        writer.write_u16::<LittleEndian>(0)?;
        // internal file attributes
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(entry.external_attributes)?;
        writer.write_u32::<LittleEndian>(sentinel_u32(relative_offset, limits.max_field_bytes))?;
        writer.write_all(&entry.file_name_raw)?;
        writer.write_all(&zip64_extra_field[..zip64_extra_field_length as usize])?;
        writer.write_all(&entry.extra_field)?;
        writer.write_all(&entry.file_comment)?;
        Ok(())
    };
    write(writer).map_err(ZipError::unwritable)
}

/// Emit the zip64 block for whichever central directory fields overflow, in
/// the fixed order the format prescribes. Returns its length in bytes.
fn write_central_zip64_extra_field<T: Write>(
    writer: &mut T,
    entry: &Entry,
    relative_offset: u64,
    limits: &Zip64Limits,
) -> io::Result<u16> {
    let mut size = 0u16;
    let uncompressed_size = entry.uncompressed_size > limits.max_field_bytes;
    let compressed_size = entry.compressed_size > limits.max_field_bytes;
    let header_start = relative_offset > limits.max_field_bytes;
    if uncompressed_size {
        size += 8;
    }
    if compressed_size {
        size += 8;
    }
    if header_start {
        size += 8;
    }
    if size > 0 {
        writer.write_u16::<LittleEndian>(0x0001)?;
        writer.write_u16::<LittleEndian>(size)?;
        size += 4;

        if uncompressed_size {
            writer.write_u64::<LittleEndian>(entry.uncompressed_size)?;
        }
        if compressed_size {
            writer.write_u64::<LittleEndian>(entry.compressed_size)?;
        }
        if header_start {
            writer.write_u64::<LittleEndian>(relative_offset)?;
        }
    }
    Ok(size)
}

#[cfg(test)]
mod test {
    use super::EntryOptions;
    use crate::archive::{AccessMode, Archive};
    use crate::compression::CompressionMethod;
    use crate::result::ZipError;
    use crate::types::DateTime;
    use std::io;

    fn stored() -> EntryOptions {
        EntryOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::from_date_and_time(2018, 8, 15, 20, 45, 6).unwrap())
    }

    #[test]
    fn write_empty_archive_with_comment() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.set_comment("ZIP").unwrap();
        let result = archive.finish().unwrap().into_bytes().unwrap();
        assert_eq!(result.len(), 25);
        assert_eq!(
            result,
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 90, 73, 80]
        );
    }

    #[test]
    fn add_to_read_only_archive_fails() {
        let empty = Archive::create_in_memory()
            .unwrap()
            .finish()
            .unwrap()
            .into_bytes()
            .unwrap();
        let mut archive = Archive::open_memory(empty, AccessMode::Read).unwrap();
        let err = archive
            .add_entry("a", &stored(), &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, ZipError::UnwritableArchive(_)));
        let err = archive.remove_entry("a").unwrap_err();
        assert!(matches!(err, ZipError::UnwritableArchive(_)));
    }

    #[test]
    fn empty_entry_path_is_rejected() {
        let mut archive = Archive::create_in_memory().unwrap();
        let err = archive.add_entry("", &stored(), io::empty()).unwrap_err();
        assert!(matches!(err, ZipError::InvalidEntryPath(_)));
    }

    #[test]
    fn stored_rejects_compression_level() {
        let mut archive = Archive::create_in_memory().unwrap();
        let options = stored().compression_level(Some(6));
        let err = archive
            .add_entry("a", &options, io::empty())
            .unwrap_err();
        assert!(matches!(err, ZipError::UnwritableArchive(_)));
        assert!(archive.is_empty());
    }

    #[test]
    fn directory_gets_trailing_slash() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.add_directory("test", &stored()).unwrap();
        let entry = archive.by_name("test/").unwrap();
        assert!(entry.is_dir());
        assert_eq!(entry.permissions(), 0o755);
        assert_eq!(entry.size(), 0);
    }

    #[test]
    fn symlink_stores_target_as_content() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.add_symlink("name", "target", &stored()).unwrap();
        assert!(archive.by_name("name").unwrap().is_symlink());

        let mut content = Vec::new();
        archive.extract("name", &mut content).unwrap();
        assert_eq!(content, b"target");
    }

    #[test]
    fn overwrite_replaces_entry() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive
            .add_entry("file", &stored(), &b"first"[..])
            .unwrap();
        archive
            .add_entry("file", &stored(), &b"second!"[..])
            .unwrap();
        assert_eq!(archive.len(), 1);

        let mut content = Vec::new();
        archive.extract("file", &mut content).unwrap();
        assert_eq!(content, b"second!");
    }

    #[test]
    fn duplicate_names_cannot_coexist() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.add_entry("same", &stored(), &b"a"[..]).unwrap();
        archive.add_entry("same", &stored(), &b"bb"[..]).unwrap();
        archive.add_entry("same", &stored(), &b"ccc"[..]).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.by_name("same").unwrap().size(), 3);
    }

    #[test]
    fn mocked_limits_promote_archive_totals() {
        // 65 entries of 100 bytes against thresholds of 4096 bytes / 64
        // entries: the footer must carry sentinels and the true totals must
        // move into the zip64 records.
        let mut archive = Archive::create_in_memory().unwrap();
        archive.set_zip64_limits(4096, 64);
        let content = [0x5au8; 100];
        for i in 0..65 {
            archive
                .add_entry(&format!("entry{i:03}"), &stored(), &content[..])
                .unwrap();
        }
        assert_eq!(archive.footer.number_of_files, u16::MAX);
        assert_eq!(archive.footer.number_of_files_on_this_disk, u16::MAX);

        let bytes = archive.finish().unwrap().into_bytes().unwrap();
        // The zip64 footer records must be present.
        let locator_sig = [0x50, 0x4b, 0x06, 0x07];
        let record_sig = [0x50, 0x4b, 0x06, 0x06];
        assert!(bytes.windows(4).any(|w| w == locator_sig));
        assert!(bytes.windows(4).any(|w| w == record_sig));

        // A reader resolves the true counts through the locator.
        let mut reopened = Archive::open_memory(bytes, AccessMode::Read).unwrap();
        assert_eq!(reopened.len(), 65);
        let mut content_back = Vec::new();
        reopened.extract("entry064", &mut content_back).unwrap();
        assert_eq!(content_back, content);
        reopened.check_integrity().unwrap();
    }

    #[test]
    fn mocked_limits_promote_entry_sizes() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.set_zip64_limits(4096, 64);
        let options = stored().large_file(true);
        let content = vec![0x21u8; 5000];
        archive.add_entry("big", &options, &content[..]).unwrap();

        let bytes = archive.finish().unwrap().into_bytes().unwrap();
        // The narrow size fields of the central header hold the sentinel.
        let reopened = Archive::open_memory(bytes, AccessMode::Read).unwrap();
        let entry = reopened.by_name("big").unwrap();
        assert_eq!(entry.size(), 5000);
        assert_eq!(entry.compressed_size(), 5000);

        let mut content_back = Vec::new();
        let mut reopened = reopened;
        reopened.extract("big", &mut content_back).unwrap();
        assert_eq!(content_back, content);
    }

    #[test]
    fn oversize_entry_without_large_flag_fails() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.set_zip64_limits(4096, 64);
        let content = vec![0x21u8; 5000];
        let err = archive
            .add_entry("big", &stored(), &content[..])
            .unwrap_err();
        assert!(matches!(err, ZipError::UnwritableArchive(_)));
    }

    #[test]
    fn cancellation_interrupts_add() {
        let mut archive = Archive::create_in_memory().unwrap();
        let token = crate::cancel::CancelToken::new();
        token.cancel();
        let options = stored().cancel_token(token);
        let err = archive
            .add_entry("a", &options, &b"data"[..])
            .unwrap_err();
        assert!(matches!(err, ZipError::Cancelled));
    }
}
