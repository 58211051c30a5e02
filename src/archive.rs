//! Opening archives and reading their catalog.

use std::collections::HashMap;
use std::io;
use std::io::prelude::*;
use std::mem;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;

use crate::cancel::CancelToken;
use crate::compression::CompressionMethod;
use crate::crc32::Crc32Reader;
use crate::result::{ZipError, ZipResult};
use crate::spec;
use crate::spec::{
    CentralDirectoryEnd, Zip64CentralDirectoryEnd, Zip64CentralDirectoryEndLocator, Zip64Limits,
};
use crate::storage::{Backing, OpenFlags};
use crate::types::{DateTime, Entry};

/// Default chunk size for the streaming paths.
///
/// No operation allocates buffers proportional to entry size; everything is
/// pumped through chunks of this size unless the caller picks another one.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// How an archive backing is acquired and what operations it permits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Iterate, look up and extract entries; never writes
    Read,
    /// All read operations plus add and remove, on an existing archive
    Update,
    /// Like [`AccessMode::Update`], starting from a fresh empty archive.
    /// Fails if the target file already exists.
    Create,
}

impl AccessMode {
    fn open_flags(self) -> OpenFlags {
        match self {
            AccessMode::Read => OpenFlags::read_only(),
            AccessMode::Update => OpenFlags::read_write(),
            AccessMode::Create => OpenFlags::create_new(),
        }
    }
}

/// Options for [`Archive::extract_with`].
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub(crate) buffer_size: usize,
    pub(crate) skip_crc32: bool,
    pub(crate) cancel: CancelToken,
}

impl Default for ExtractOptions {
    fn default() -> ExtractOptions {
        ExtractOptions {
            buffer_size: DEFAULT_BUFFER_SIZE,
            skip_crc32: false,
            cancel: CancelToken::default(),
        }
    }
}

impl ExtractOptions {
    /// Set the chunk size used while streaming
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> ExtractOptions {
        self.buffer_size = buffer_size;
        self
    }

    /// Skip the checksum comparison after streaming
    #[must_use]
    pub fn skip_crc32(mut self, skip: bool) -> ExtractOptions {
        self.skip_crc32 = skip;
        self
    }

    /// Poll the given token between chunks and abort when it fires
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> ExtractOptions {
        self.cancel = cancel;
        self
    }
}

/// A ZIP archive over a file or memory backing.
///
/// The archive owns its backing exclusively and keeps an ordered catalog of
/// entries mirroring the on-disk central directory. Opening scans the footer
/// region and cross-checks every entry's local header; mutation rewrites the
/// central directory before returning, so the on-disk index is authoritative
/// again after every successful operation.
///
/// ```no_run
/// use zipkit::{AccessMode, Archive};
///
/// fn list(path: &str) -> zipkit::ZipResult<()> {
///     let archive = Archive::open_file(path, AccessMode::Read)?;
///     for entry in archive.entries() {
///         println!("{} ({} bytes)", entry.name(), entry.size());
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Archive {
    pub(crate) backing: Backing,
    pub(crate) mode: AccessMode,
    pub(crate) entries: Vec<Entry>,
    pub(crate) names_map: HashMap<String, usize>,
    pub(crate) footer: CentralDirectoryEnd,
    /// Absolute offset of the first central directory header.
    pub(crate) cd_start: u64,
    /// Bytes of foreign data prepended before the first local header.
    pub(crate) archive_offset: u64,
    pub(crate) limits: Zip64Limits,
}

impl Archive {
    /// Open an archive file in the given mode.
    ///
    /// `Create` writes an empty footer into a newly created file and fails if
    /// the file exists; `Update` requires an existing, writable archive.
    pub fn open_file<P: AsRef<Path>>(path: P, mode: AccessMode) -> ZipResult<Archive> {
        let backing = match Backing::open_file(path, mode.open_flags()) {
            Ok(backing) => backing,
            Err(err) => {
                return Err(match mode {
                    AccessMode::Read => ZipError::unreadable(err),
                    AccessMode::Create if err.kind() == io::ErrorKind::AlreadyExists => {
                        ZipError::UnwritableArchive("target file already exists")
                    }
                    AccessMode::Update | AccessMode::Create => ZipError::unwritable(err),
                })
            }
        };
        Archive::from_backing(backing, mode)
    }

    /// Open an archive held in memory.
    ///
    /// In `Create` mode the buffer must be empty; the backing grows as
    /// entries are added and can be recovered with [`Archive::finish`].
    pub fn open_memory(data: Vec<u8>, mode: AccessMode) -> ZipResult<Archive> {
        if mode == AccessMode::Create && !data.is_empty() {
            return Err(ZipError::UnwritableArchive(
                "memory buffer already holds data",
            ));
        }
        Archive::from_backing(Backing::from_vec(data, mode.open_flags()), mode)
    }

    /// Create a fresh, empty archive in memory.
    pub fn create_in_memory() -> ZipResult<Archive> {
        Archive::open_memory(Vec::new(), AccessMode::Create)
    }

    fn from_backing(mut backing: Backing, mode: AccessMode) -> ZipResult<Archive> {
        if mode == AccessMode::Create {
            CentralDirectoryEnd::empty().write(&mut backing)?;
            backing.sync().map_err(ZipError::unwritable)?;
        }

        let (footer, cde_start_pos) = CentralDirectoryEnd::find_and_parse(&mut backing)?;
        if !footer.requires_zip64()
            && footer.disk_number != footer.disk_with_central_directory
        {
            return Err(ZipError::UnreadableArchive(
                "multi-volume archives are not supported",
            ));
        }

        let (archive_offset, directory_start, number_of_files) =
            Archive::directory_counts(&mut backing, &footer, cde_start_pos)?;

        // If the claimed number of entries cannot fit in front of the footer,
        // the count is hostile; do not pre-allocate for it.
        let capacity = if number_of_files as u64 > cde_start_pos {
            0
        } else {
            number_of_files
        };
        let mut entries = Vec::with_capacity(capacity);
        let mut names_map = HashMap::with_capacity(capacity);

        backing
            .seek(io::SeekFrom::Start(directory_start))
            .map_err(|_| {
                ZipError::UnreadableArchive("could not seek to start of central directory")
            })?;
        for _ in 0..number_of_files {
            let entry = central_header_to_entry(&mut backing, archive_offset)?;
            entries.push(entry);
        }

        // Second pass: visit every local header, derive the payload offsets
        // and make sure local and central records agree on the name.
        for entry in &mut entries {
            read_local_header(&mut backing, entry)?;
        }

        for (index, entry) in entries.iter().enumerate() {
            names_map.insert(entry.file_name.clone(), index);
        }

        Ok(Archive {
            backing,
            mode,
            entries,
            names_map,
            footer,
            cd_start: directory_start,
            archive_offset,
            limits: Zip64Limits::default(),
        })
    }

    /// Resolve the authoritative directory offset and entry count, following
    /// the ZIP64 locator when the footer carries sentinel values.
    fn directory_counts(
        backing: &mut Backing,
        footer: &CentralDirectoryEnd,
        cde_start_pos: u64,
    ) -> ZipResult<(u64, u64, usize)> {
        // The ZIP64 locator, if present, sits immediately before the footer.
        let locator = if cde_start_pos >= Zip64CentralDirectoryEndLocator::SIZE {
            backing
                .seek(io::SeekFrom::Start(
                    cde_start_pos - Zip64CentralDirectoryEndLocator::SIZE,
                ))
                .map_err(|_| ZipError::UnreadableArchive("could not seek to zip64 locator"))?;
            Zip64CentralDirectoryEndLocator::parse(backing).ok()
        } else {
            None
        };

        match locator {
            None => {
                // Data prepended to the archive shifts all stored offsets.
                // The shift is the gap between where the footer says the
                // directory ends and where we actually found the footer.
                let archive_offset = cde_start_pos
                    .checked_sub(footer.central_directory_size as u64)
                    .and_then(|x| x.checked_sub(footer.central_directory_offset as u64))
                    .ok_or(ZipError::UnreadableArchive(
                        "invalid central directory size or offset",
                    ))?;

                let directory_start = footer.central_directory_offset as u64 + archive_offset;
                Ok((
                    archive_offset,
                    directory_start,
                    footer.number_of_files_on_this_disk as usize,
                ))
            }
            Some(locator64) => {
                if !footer.requires_zip64()
                    && footer.disk_number as u32 != locator64.disk_with_central_directory
                {
                    return Err(ZipError::UnreadableArchive(
                        "multi-volume archives are not supported",
                    ));
                }

                let search_upper_bound = cde_start_pos
                    .checked_sub(
                        Zip64CentralDirectoryEnd::SIZE + Zip64CentralDirectoryEndLocator::SIZE,
                    )
                    .ok_or(ZipError::UnreadableArchive(
                        "file cannot contain a zip64 central directory end",
                    ))?;
                let (footer64, archive_offset) = Zip64CentralDirectoryEnd::find_and_parse(
                    backing,
                    locator64.end_of_central_directory_offset,
                    search_upper_bound,
                )?;

                if footer64.disk_number != footer64.disk_with_central_directory {
                    return Err(ZipError::UnreadableArchive(
                        "multi-volume archives are not supported",
                    ));
                }

                let directory_start = footer64
                    .central_directory_offset
                    .checked_add(archive_offset)
                    .ok_or(ZipError::UnreadableArchive(
                        "invalid central directory size or offset",
                    ))?;
                Ok((
                    archive_offset,
                    directory_start,
                    footer64.number_of_files as usize,
                ))
            }
        }
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The mode this archive was opened in.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Iterate the catalog in on-disk central directory order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Look up an entry by its exact stored path. No case folding, no
    /// normalization: `dir/a` and `dir//a` are different entries.
    pub fn by_name(&self, name: &str) -> Option<&Entry> {
        self.names_map.get(name).map(|&index| &self.entries[index])
    }

    /// The archive-level comment stored in the footer.
    pub fn comment(&self) -> &[u8] {
        &self.footer.zip_file_comment
    }

    /// Bytes of foreign data prepended before the archive proper. Zero for
    /// anything this library wrote.
    pub fn offset(&self) -> u64 {
        self.archive_offset
    }

    /// Extract an entry, streaming its decompressed content into `consumer`.
    ///
    /// The CRC-32 is accumulated over the decompressed bytes and compared to
    /// the catalog after streaming; a mismatch fails with
    /// [`ZipError::InvalidCrc32`]. Returns the number of bytes written.
    pub fn extract<W: Write>(&mut self, name: &str, consumer: W) -> ZipResult<u64> {
        self.extract_with(name, consumer, &ExtractOptions::default())
    }

    /// Extract an entry with explicit buffering, checksum and cancellation
    /// behavior.
    pub fn extract_with<W: Write>(
        &mut self,
        name: &str,
        consumer: W,
        options: &ExtractOptions,
    ) -> ZipResult<u64> {
        let index = *self.names_map.get(name).ok_or(ZipError::EntryNotFound)?;
        self.extract_index(index, consumer, options)
    }

    fn extract_index<W: Write>(
        &mut self,
        index: usize,
        mut consumer: W,
        options: &ExtractOptions,
    ) -> ZipResult<u64> {
        let entry = self.entries[index].clone();
        if entry.encrypted {
            return Err(ZipError::UnreadableArchive(
                "encrypted entries are not supported",
            ));
        }

        self.backing
            .seek(io::SeekFrom::Start(entry.data_start))
            .map_err(ZipError::unreadable)?;
        let limited = (&mut self.backing).take(entry.compressed_size);

        match entry.compression_method {
            CompressionMethod::Stored => {
                stream_entry(Crc32Reader::new(limited), &mut consumer, &entry, options)
            }
            CompressionMethod::Deflated => stream_entry(
                Crc32Reader::new(DeflateDecoder::new(limited)),
                &mut consumer,
                &entry,
                options,
            ),
            CompressionMethod::Unsupported(_) => Err(ZipError::UnreadableArchive(
                "compression method not supported",
            )),
        }
    }

    /// Extract every entry into a sink with checksum verification enabled.
    pub fn check_integrity(&mut self) -> ZipResult<()> {
        let options = ExtractOptions::default();
        for index in 0..self.entries.len() {
            self.extract_index(index, io::sink(), &options)?;
        }
        Ok(())
    }

    /// Flush the backing and hand it back, consuming the archive.
    ///
    /// For memory archives, [`Backing::into_bytes`] recovers the buffer.
    pub fn finish(mut self) -> ZipResult<Backing> {
        if self.backing.flags().write {
            self.backing.sync().map_err(ZipError::unwritable)?;
        }
        Ok(self.backing)
    }

    pub(crate) fn ensure_writable(&self) -> ZipResult<()> {
        match self.mode {
            AccessMode::Read => Err(ZipError::UnwritableArchive("archive is opened read-only")),
            AccessMode::Update | AccessMode::Create => Ok(()),
        }
    }
}

fn stream_entry<R: Read, W: Write>(
    mut reader: Crc32Reader<R>,
    consumer: &mut W,
    entry: &Entry,
    options: &ExtractOptions,
) -> ZipResult<u64> {
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut written = 0u64;
    loop {
        if options.cancel.is_cancelled() {
            return Err(ZipError::Cancelled);
        }
        let count = reader.read(&mut buf).map_err(ZipError::unreadable)?;
        if count == 0 {
            break;
        }
        consumer
            .write_all(&buf[..count])
            .map_err(ZipError::unwritable)?;
        written += count as u64;
    }

    if !options.skip_crc32 {
        let actual = reader.finalize();
        if actual != entry.crc32 {
            return Err(ZipError::InvalidCrc32 {
                expected: entry.crc32,
                actual,
            });
        }
    }
    Ok(written)
}

/// Parse one central directory header into an entry.
pub(crate) fn central_header_to_entry(
    reader: &mut Backing,
    archive_offset: u64,
) -> ZipResult<Entry> {
    fn truncated(_: io::Error) -> ZipError {
        ZipError::UnreadableArchive("central directory header truncated")
    }

    let signature = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    if signature != spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE {
        return Err(ZipError::UnreadableArchive(
            "invalid central directory header",
        ));
    }

    let version_made_by = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let _version_to_extract = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let flags = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let encrypted = flags & 1 == 1;
    let is_utf8 = flags & (1 << 11) != 0;
    let using_data_descriptor = flags & (1 << 3) != 0;
    let compression_method = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let last_mod_time = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let last_mod_date = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let crc32 = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    let compressed_size = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    let uncompressed_size = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    let file_name_length = reader.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let extra_field_length = reader.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let file_comment_length = reader.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let _disk_number_start = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let _internal_attributes = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    let external_attributes = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    let offset = reader.read_u32::<LittleEndian>().map_err(truncated)? as u64;

    let mut file_name_raw = vec![0u8; file_name_length];
    reader.read_exact(&mut file_name_raw).map_err(truncated)?;
    let mut extra_field = vec![0u8; extra_field_length];
    reader.read_exact(&mut extra_field).map_err(truncated)?;
    let mut file_comment = vec![0u8; file_comment_length];
    reader.read_exact(&mut file_comment).map_err(truncated)?;

    // Names without the UTF-8 flag are decoded permissively; the stored
    // bytes stay available through `Entry::name_raw`.
    let file_name = String::from_utf8_lossy(&file_name_raw).into_owned();

    let mut entry = Entry {
        host_system: (version_made_by >> 8) as u8,
        version_made_by: version_made_by as u8,
        encrypted,
        is_utf8,
        using_data_descriptor,
        compression_method: CompressionMethod::from_u16(compression_method),
        last_modified_time: DateTime::from_msdos(last_mod_date, last_mod_time),
        crc32,
        compressed_size: compressed_size as u64,
        uncompressed_size: uncompressed_size as u64,
        file_name,
        file_name_raw,
        extra_field,
        file_comment,
        external_attributes,
        header_start: offset,
        data_start: 0,
        descriptor_size: 0,
        large_file: false,
    };

    parse_extra_field(&mut entry)?;

    // Account for shifted zip offsets.
    entry.header_start = entry
        .header_start
        .checked_add(archive_offset)
        .ok_or(ZipError::UnreadableArchive("archive header is too large"))?;

    Ok(entry)
}

/// Interpret the ZIP64 block of the extra field and keep everything else
/// verbatim for forwarding.
fn parse_extra_field(entry: &mut Entry) -> ZipResult<()> {
    fn truncated(_: io::Error) -> ZipError {
        ZipError::UnreadableArchive("zip64 extra field truncated")
    }

    let extra = mem::take(&mut entry.extra_field);
    let mut kept = Vec::new();
    let mut pos = 0usize;

    while pos + 4 <= extra.len() {
        let kind = u16::from_le_bytes(extra[pos..pos + 2].try_into().unwrap());
        let len = u16::from_le_bytes(extra[pos + 2..pos + 4].try_into().unwrap()) as usize;
        let body = pos + 4;
        if body + len > extra.len() {
            log::warn!("extra field block {kind:#06x} overruns the field; forwarding verbatim");
            break;
        }

        if kind == 0x0001 {
            // Zip64 extended information: present fields shadow whichever
            // narrow fields hold the sentinel, in a fixed order.
            let mut field = &extra[body..body + len];
            if entry.uncompressed_size == spec::ZIP64_BYTES_THR {
                entry.large_file = true;
                entry.uncompressed_size = field.read_u64::<LittleEndian>().map_err(truncated)?;
            }
            if entry.compressed_size == spec::ZIP64_BYTES_THR {
                entry.large_file = true;
                entry.compressed_size = field.read_u64::<LittleEndian>().map_err(truncated)?;
            }
            if entry.header_start == spec::ZIP64_BYTES_THR {
                entry.header_start = field.read_u64::<LittleEndian>().map_err(truncated)?;
            }
            // The disk start number is not interpreted.
        } else {
            kept.extend_from_slice(&extra[pos..body + len]);
        }
        pos = body + len;
    }
    if pos < extra.len() {
        kept.extend_from_slice(&extra[pos..]);
    }

    entry.extra_field = kept;
    Ok(())
}

/// Visit the local header the central directory points at: derive the payload
/// offset, measure the trailing data descriptor and verify the stored name.
fn read_local_header(backing: &mut Backing, entry: &mut Entry) -> ZipResult<()> {
    fn truncated(_: io::Error) -> ZipError {
        ZipError::UnreadableArchive("local file header truncated")
    }

    backing
        .seek(io::SeekFrom::Start(entry.header_start))
        .map_err(truncated)?;
    let signature = backing.read_u32::<LittleEndian>().map_err(truncated)?;
    if signature != spec::LOCAL_FILE_HEADER_SIGNATURE {
        return Err(ZipError::UnreadableArchive("invalid local file header"));
    }

    // The central directory is authoritative for sizes and checksum (the
    // local copies may be zero under the streaming flag); only the variable
    // lengths and the name are needed from here.
    backing
        .seek(io::SeekFrom::Current(22))
        .map_err(truncated)?;
    let file_name_length = backing.read_u16::<LittleEndian>().map_err(truncated)? as u64;
    let extra_field_length = backing.read_u16::<LittleEndian>().map_err(truncated)? as u64;

    let mut local_name = vec![0u8; file_name_length as usize];
    backing.read_exact(&mut local_name).map_err(truncated)?;
    if local_name != entry.file_name_raw {
        return Err(ZipError::UnreadableArchive(
            "local header name does not match central directory",
        ));
    }

    entry.data_start = entry.header_start + 30 + file_name_length + extra_field_length;

    if entry.using_data_descriptor {
        // A data descriptor trails the payload; its signature is optional.
        backing
            .seek(io::SeekFrom::Start(entry.data_start + entry.compressed_size))
            .map_err(truncated)?;
        let first = backing.read_u32::<LittleEndian>().map_err(truncated)?;
        entry.descriptor_size = if first == spec::DATA_DESCRIPTOR_SIGNATURE {
            16
        } else {
            12
        };
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_garbage_fails() {
        let mut state = 0x12345678u32;
        let buf: Vec<u8> = (0..1024)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();
        let result = Archive::open_memory(buf, AccessMode::Read);
        assert!(matches!(result, Err(ZipError::UnreadableArchive(_))));
    }

    #[test]
    fn create_in_memory_is_empty() {
        let archive = Archive::create_in_memory().unwrap();
        assert!(archive.is_empty());
        assert_eq!(archive.comment(), b"");
        assert_eq!(archive.offset(), 0);
    }

    #[test]
    fn create_scan_finds_fresh_footer() {
        let archive = Archive::create_in_memory().unwrap();
        let bytes = archive.finish().unwrap().into_bytes().unwrap();
        assert_eq!(bytes.len(), 22);

        let reopened = Archive::open_memory(bytes, AccessMode::Read).unwrap();
        assert_eq!(reopened.len(), 0);
    }

    #[test]
    fn create_rejects_populated_buffer() {
        let result = Archive::open_memory(vec![1, 2, 3], AccessMode::Create);
        assert!(matches!(result, Err(ZipError::UnwritableArchive(_))));
    }

    #[test]
    fn missing_entry_lookup() {
        let mut archive = Archive::create_in_memory().unwrap();
        assert!(archive.by_name("absent").is_none());
        let err = archive.extract("absent", io::sink()).unwrap_err();
        assert!(matches!(err, ZipError::EntryNotFound));
    }
}
