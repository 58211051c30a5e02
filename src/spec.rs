//! Fixed-layout footer records and the sentinel constants of the ZIP format.
//!
//! The per-entry records (local file header, central directory header) are
//! parsed and serialized next to the catalog code that owns them; this module
//! holds the archive-wide trailer records and the scan that locates them.

use std::io;
use std::io::prelude::*;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::result::{ZipError, ZipResult};

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub(crate) const CENTRAL_DIRECTORY_HEADER_SIGNATURE: u32 = 0x02014b50;
pub(crate) const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
pub(crate) const ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06064b50;
pub(crate) const ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE: u32 = 0x07064b50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// Largest value representable in the narrow 32-bit size/offset fields.
pub(crate) const ZIP64_BYTES_THR: u64 = u32::MAX as u64;
/// Largest entry count representable in the 16-bit footer fields.
pub(crate) const ZIP64_ENTRY_THR: u64 = u16::MAX as u64;

/// The thresholds above which a value moves to its ZIP64 shadow field.
///
/// These default to the wire sentinels. Tests lower them to exercise the
/// promotion machinery without writing multi-gigabyte archives; the sentinel
/// written into the narrow field is always the real one.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Zip64Limits {
    pub(crate) max_field_bytes: u64,
    pub(crate) max_entries: u64,
}

impl Default for Zip64Limits {
    fn default() -> Zip64Limits {
        Zip64Limits {
            max_field_bytes: ZIP64_BYTES_THR,
            max_entries: ZIP64_ENTRY_THR,
        }
    }
}

fn scan_failed(_: io::Error) -> ZipError {
    ZipError::UnreadableArchive("backing read failed during footer scan")
}

/// End of central directory record, the entry point for reading an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CentralDirectoryEnd {
    pub(crate) disk_number: u16,
    pub(crate) disk_with_central_directory: u16,
    pub(crate) number_of_files_on_this_disk: u16,
    pub(crate) number_of_files: u16,
    pub(crate) central_directory_size: u32,
    pub(crate) central_directory_offset: u32,
    pub(crate) zip_file_comment: Vec<u8>,
}

impl CentralDirectoryEnd {
    pub(crate) const SIZE: u64 = 22;

    /// An empty footer, as written into a freshly created archive.
    pub(crate) fn empty() -> CentralDirectoryEnd {
        CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: 0,
            number_of_files: 0,
            central_directory_size: 0,
            central_directory_offset: 0,
            zip_file_comment: Vec::new(),
        }
    }

    /// Any sentinel in the narrow fields means the true value lives in the
    /// ZIP64 end of central directory record.
    pub(crate) fn requires_zip64(&self) -> bool {
        self.disk_number == u16::MAX
            || self.disk_with_central_directory == u16::MAX
            || self.number_of_files_on_this_disk == u16::MAX
            || self.number_of_files == u16::MAX
            || self.central_directory_size == u32::MAX
            || self.central_directory_offset == u32::MAX
    }

    pub(crate) fn parse<T: Read>(reader: &mut T) -> ZipResult<CentralDirectoryEnd> {
        let magic = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        if magic != CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::UnreadableArchive(
                "invalid end of central directory signature",
            ));
        }
        let disk_number = reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let disk_with_central_directory =
            reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let number_of_files_on_this_disk =
            reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let number_of_files = reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let central_directory_size = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        let central_directory_offset = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        let comment_length = reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let mut zip_file_comment = vec![0u8; comment_length as usize];
        reader.read_exact(&mut zip_file_comment).map_err(scan_failed)?;

        Ok(CentralDirectoryEnd {
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
            zip_file_comment,
        })
    }

    /// Locate the footer by scanning backwards from the end of the stream.
    ///
    /// At most 65 557 bytes (fixed record plus the largest possible comment)
    /// are searched, in a single buffered window. A candidate signature only
    /// counts when its comment-length field reaches exactly to end of stream,
    /// so comments containing the magic bytes do not fool the scan.
    ///
    /// Returns the record and its absolute offset.
    pub(crate) fn find_and_parse<T: Read + Seek>(
        reader: &mut T,
    ) -> ZipResult<(CentralDirectoryEnd, u64)> {
        let file_length = reader.seek(io::SeekFrom::End(0)).map_err(scan_failed)?;
        if file_length < Self::SIZE {
            return Err(ZipError::UnreadableArchive("invalid zip header"));
        }

        let window_size = (Self::SIZE + u16::MAX as u64).min(file_length);
        let window_start = file_length - window_size;
        reader
            .seek(io::SeekFrom::Start(window_start))
            .map_err(scan_failed)?;
        let mut window = vec![0u8; window_size as usize];
        reader.read_exact(&mut window).map_err(scan_failed)?;

        let mut pos = (window_size - Self::SIZE) as usize;
        loop {
            let signature = u32::from_le_bytes(window[pos..pos + 4].try_into().unwrap());
            if signature == CENTRAL_DIRECTORY_END_SIGNATURE {
                let comment_length =
                    u16::from_le_bytes(window[pos + 20..pos + 22].try_into().unwrap()) as u64;
                if window.len() as u64 - pos as u64 - Self::SIZE == comment_length {
                    let offset = window_start + pos as u64;
                    let footer = CentralDirectoryEnd::parse(&mut &window[pos..])?;
                    log::debug!("end of central directory located at offset {offset}");
                    return Ok((footer, offset));
                }
            }
            if pos == 0 {
                break;
            }
            pos -= 1;
        }
        Err(ZipError::UnreadableArchive(
            "could not find end of central directory record",
        ))
    }

    pub(crate) fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        let mut write = || -> io::Result<()> {
            writer.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_END_SIGNATURE)?;
            writer.write_u16::<LittleEndian>(self.disk_number)?;
            writer.write_u16::<LittleEndian>(self.disk_with_central_directory)?;
            writer.write_u16::<LittleEndian>(self.number_of_files_on_this_disk)?;
            writer.write_u16::<LittleEndian>(self.number_of_files)?;
            writer.write_u32::<LittleEndian>(self.central_directory_size)?;
            writer.write_u32::<LittleEndian>(self.central_directory_offset)?;
            writer.write_u16::<LittleEndian>(self.zip_file_comment.len() as u16)?;
            writer.write_all(&self.zip_file_comment)
        };
        write().map_err(ZipError::unwritable)
    }
}

/// Locator preceding the footer when the archive carries ZIP64 records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Zip64CentralDirectoryEndLocator {
    pub(crate) disk_with_central_directory: u32,
    pub(crate) end_of_central_directory_offset: u64,
    pub(crate) number_of_disks: u32,
}

impl Zip64CentralDirectoryEndLocator {
    pub(crate) const SIZE: u64 = 20;

    pub(crate) fn parse<T: Read>(reader: &mut T) -> ZipResult<Zip64CentralDirectoryEndLocator> {
        let magic = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        if magic != ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE {
            return Err(ZipError::UnreadableArchive(
                "invalid zip64 locator signature",
            ));
        }
        let disk_with_central_directory =
            reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        let end_of_central_directory_offset =
            reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        let number_of_disks = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;

        Ok(Zip64CentralDirectoryEndLocator {
            disk_with_central_directory,
            end_of_central_directory_offset,
            number_of_disks,
        })
    }

    pub(crate) fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        let mut write = || -> io::Result<()> {
            writer.write_u32::<LittleEndian>(ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE)?;
            writer.write_u32::<LittleEndian>(self.disk_with_central_directory)?;
            writer.write_u64::<LittleEndian>(self.end_of_central_directory_offset)?;
            writer.write_u32::<LittleEndian>(self.number_of_disks)
        };
        write().map_err(ZipError::unwritable)
    }
}

/// ZIP64 end of central directory record, holding the wide archive totals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Zip64CentralDirectoryEnd {
    pub(crate) version_made_by: u16,
    pub(crate) version_needed_to_extract: u16,
    pub(crate) disk_number: u32,
    pub(crate) disk_with_central_directory: u32,
    pub(crate) number_of_files_on_this_disk: u64,
    pub(crate) number_of_files: u64,
    pub(crate) central_directory_size: u64,
    pub(crate) central_directory_offset: u64,
}

impl Zip64CentralDirectoryEnd {
    pub(crate) const SIZE: u64 = 56;

    /// Search forward from where the locator claims the record sits.
    ///
    /// Archives with data prepended to them shift every stored offset, so the
    /// nominal position may undershoot; the distance between the nominal and
    /// the actual position is the archive offset.
    pub(crate) fn find_and_parse<T: Read + Seek>(
        reader: &mut T,
        nominal_offset: u64,
        search_upper_bound: u64,
    ) -> ZipResult<(Zip64CentralDirectoryEnd, u64)> {
        let mut pos = nominal_offset;
        while pos <= search_upper_bound {
            reader.seek(io::SeekFrom::Start(pos)).map_err(scan_failed)?;
            if reader.read_u32::<LittleEndian>().map_err(scan_failed)?
                == ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE
            {
                let record = Zip64CentralDirectoryEnd::parse_after_signature(reader)?;
                let archive_offset = pos - nominal_offset;
                return Ok((record, archive_offset));
            }
            pos += 1;
        }
        Err(ZipError::UnreadableArchive(
            "could not find zip64 end of central directory record",
        ))
    }

    fn parse_after_signature<T: Read>(reader: &mut T) -> ZipResult<Zip64CentralDirectoryEnd> {
        let _record_size = reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        let version_made_by = reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let version_needed_to_extract =
            reader.read_u16::<LittleEndian>().map_err(scan_failed)?;
        let disk_number = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        let disk_with_central_directory =
            reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        let number_of_files_on_this_disk =
            reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        let number_of_files = reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        let central_directory_size = reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        let central_directory_offset = reader.read_u64::<LittleEndian>().map_err(scan_failed)?;
        // The extensible data sector is not interpreted.

        Ok(Zip64CentralDirectoryEnd {
            version_made_by,
            version_needed_to_extract,
            disk_number,
            disk_with_central_directory,
            number_of_files_on_this_disk,
            number_of_files,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub(crate) fn parse<T: Read>(reader: &mut T) -> ZipResult<Zip64CentralDirectoryEnd> {
        let magic = reader.read_u32::<LittleEndian>().map_err(scan_failed)?;
        if magic != ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE {
            return Err(ZipError::UnreadableArchive(
                "invalid zip64 end of central directory signature",
            ));
        }
        Zip64CentralDirectoryEnd::parse_after_signature(reader)
    }

    pub(crate) fn write<T: Write>(&self, writer: &mut T) -> ZipResult<()> {
        let mut write = || -> io::Result<()> {
            writer.write_u32::<LittleEndian>(ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE)?;
            // Size of the remainder of the record; no extensible data.
            writer.write_u64::<LittleEndian>(Self::SIZE - 12)?;
            writer.write_u16::<LittleEndian>(self.version_made_by)?;
            writer.write_u16::<LittleEndian>(self.version_needed_to_extract)?;
            writer.write_u32::<LittleEndian>(self.disk_number)?;
            writer.write_u32::<LittleEndian>(self.disk_with_central_directory)?;
            writer.write_u64::<LittleEndian>(self.number_of_files_on_this_disk)?;
            writer.write_u64::<LittleEndian>(self.number_of_files)?;
            writer.write_u64::<LittleEndian>(self.central_directory_size)?;
            writer.write_u64::<LittleEndian>(self.central_directory_offset)
        };
        write().map_err(ZipError::unwritable)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn footer_roundtrip() {
        let footer = CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: 3,
            number_of_files: 3,
            central_directory_size: 145,
            central_directory_offset: 1024,
            zip_file_comment: b"made by zipkit".to_vec(),
        };
        let mut buf = Vec::new();
        footer.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, CentralDirectoryEnd::SIZE + 14);

        let parsed = CentralDirectoryEnd::parse(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, footer);
    }

    #[test]
    fn empty_footer_bytes() {
        let mut buf = Vec::new();
        CentralDirectoryEnd::empty().write(&mut buf).unwrap();
        assert_eq!(
            buf,
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn find_footer_behind_comment() {
        let footer = CentralDirectoryEnd {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: 1,
            number_of_files: 1,
            central_directory_size: 46,
            central_directory_offset: 64,
            zip_file_comment: b"trailing archive comment".to_vec(),
        };
        let mut buf = vec![0u8; 300];
        footer.write(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let (parsed, offset) = CentralDirectoryEnd::find_and_parse(&mut cursor).unwrap();
        assert_eq!(offset, 300);
        assert_eq!(parsed, footer);
    }

    #[test]
    fn comment_containing_magic_is_skipped() {
        // A comment that embeds the footer signature must not win the scan;
        // only the record whose comment length reaches end of stream counts.
        let decoy = CentralDirectoryEnd {
            number_of_files: 9,
            ..CentralDirectoryEnd::empty()
        };
        let mut decoy_bytes = Vec::new();
        decoy.write(&mut decoy_bytes).unwrap();

        // Trailing bytes after the embedded record make its comment-length
        // check fail, so the scan must keep looking.
        let mut comment = decoy_bytes;
        comment.extend_from_slice(b"tail");
        let real = CentralDirectoryEnd {
            number_of_files: 1,
            number_of_files_on_this_disk: 1,
            zip_file_comment: comment,
            ..CentralDirectoryEnd::empty()
        };
        let mut buf = Vec::new();
        real.write(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let (parsed, offset) = CentralDirectoryEnd::find_and_parse(&mut cursor).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(parsed.number_of_files, 1);
    }

    #[test]
    fn garbage_has_no_footer() {
        // Pseudo-random bytes; no footer to find.
        let mut state = 0x2545f491u32;
        let buf: Vec<u8> = (0..1024)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            CentralDirectoryEnd::find_and_parse(&mut cursor),
            Err(ZipError::UnreadableArchive(_))
        ));
    }

    #[test]
    fn too_small_for_footer() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(CentralDirectoryEnd::find_and_parse(&mut cursor).is_err());
    }

    #[test]
    fn zip64_locator_roundtrip() {
        let locator = Zip64CentralDirectoryEndLocator {
            disk_with_central_directory: 0,
            end_of_central_directory_offset: 0x1_2345_6789,
            number_of_disks: 1,
        };
        let mut buf = Vec::new();
        locator.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, Zip64CentralDirectoryEndLocator::SIZE);

        let parsed = Zip64CentralDirectoryEndLocator::parse(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, locator);
    }

    #[test]
    fn zip64_footer_roundtrip() {
        let footer = Zip64CentralDirectoryEnd {
            version_made_by: 45,
            version_needed_to_extract: 45,
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: 0x1_0001,
            number_of_files: 0x1_0001,
            central_directory_size: 0x2000,
            central_directory_offset: 0x1_0000_0000,
        };
        let mut buf = Vec::new();
        footer.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, Zip64CentralDirectoryEnd::SIZE);

        let parsed = Zip64CentralDirectoryEnd::parse(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, footer);

        let (found, archive_offset) =
            Zip64CentralDirectoryEnd::find_and_parse(&mut Cursor::new(&buf), 0, 0).unwrap();
        assert_eq!(found, footer);
        assert_eq!(archive_offset, 0);
    }

    #[test]
    fn zip64_footer_found_behind_prepended_junk() {
        let footer = Zip64CentralDirectoryEnd {
            version_made_by: 45,
            version_needed_to_extract: 45,
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_files_on_this_disk: 1,
            number_of_files: 1,
            central_directory_size: 46,
            central_directory_offset: 0,
        };
        let mut buf = vec![0x55u8; 40];
        footer.write(&mut buf).unwrap();

        let (found, archive_offset) =
            Zip64CentralDirectoryEnd::find_and_parse(&mut Cursor::new(&buf), 0, 40).unwrap();
        assert_eq!(found, footer);
        assert_eq!(archive_offset, 40);
    }

    #[test]
    fn sentinel_detection() {
        let mut footer = CentralDirectoryEnd::empty();
        assert!(!footer.requires_zip64());
        footer.number_of_files = u16::MAX;
        assert!(footer.requires_zip64());
    }
}
