//! Types that specify what is contained in a ZIP.

#[cfg(feature = "time")]
use time::OffsetDateTime;

/// Host system recorded in the high byte of the version-made-by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    /// MS-DOS and OS/2 compatible attributes
    Dos = 0,
    /// UNIX attributes (file mode in the high half of external attributes)
    Unix = 3,
    /// Any other host
    Unknown,
}

impl System {
    pub(crate) fn from_u8(system: u8) -> System {
        use self::System::*;

        match system {
            0 => Dos,
            3 => Unix,
            _ => Unknown,
        }
    }
}

/// Representation of a moment in time.
///
/// Zip files use an old format from DOS to store timestamps,
/// with its own set of peculiarities. For example, it has a
/// resolution of 2 seconds!
///
/// A [`DateTime`] can be stored directly in a zipfile with
/// [`EntryOptions::last_modified_time`](crate::EntryOptions::last_modified_time),
/// or read from one with [`Entry::last_modified`].
///
/// # Warning
///
/// Because there is no timezone associated with the [`DateTime`], they should
/// ideally only be used for user-facing descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl Default for DateTime {
    /// Constructs an 'default' datetime of 1980-01-01 00:00:00
    fn default() -> DateTime {
        DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateTime {
    /// Converts an msdos (u16, u16) pair to a DateTime object
    pub fn from_msdos(datepart: u16, timepart: u16) -> DateTime {
        let seconds = (timepart & 0b0000000000011111) << 1;
        let minutes = (timepart & 0b0000011111100000) >> 5;
        let hours = (timepart & 0b1111100000000000) >> 11;
        let days = datepart & 0b0000000000011111;
        let months = (datepart & 0b0000000111100000) >> 5;
        let years = (datepart & 0b1111111000000000) >> 9;

        DateTime {
            year: years + 1980,
            month: months as u8,
            day: days as u8,
            hour: hours as u8,
            minute: minutes as u8,
            second: seconds as u8,
        }
    }

    /// Constructs a DateTime from a specific date and time
    ///
    /// The bounds are:
    /// * year: [1980, 2099]
    /// * month: [1, 12]
    /// * day: [1, 31]
    /// * hour: [0, 23]
    /// * minute: [0, 59]
    /// * second: [0, 60]
    pub fn from_date_and_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Option<DateTime> {
        if (1980..=2099).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour <= 23
            && minute <= 59
            && second <= 60
        {
            Some(DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
            })
        } else {
            None
        }
    }

    /// Returns whether every component lies within the representable range.
    pub fn is_valid(&self) -> bool {
        DateTime::from_date_and_time(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
        .is_some()
    }

    #[cfg(feature = "time")]
    /// Converts an [`OffsetDateTime`] to a DateTime, clamping to the
    /// representable range (1980-01-01 through 2099-12-31).
    pub fn from_time(dt: OffsetDateTime) -> DateTime {
        if dt.year() < 1980 {
            return DateTime::default();
        }
        if dt.year() > 2099 {
            return DateTime {
                year: 2099,
                month: 12,
                day: 31,
                hour: 23,
                minute: 59,
                second: 58,
            };
        }
        DateTime {
            year: dt.year() as u16,
            month: u8::from(dt.month()),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }

    /// Gets the time portion of this datetime in the msdos representation
    pub fn timepart(&self) -> u16 {
        ((self.second as u16) >> 1) | ((self.minute as u16) << 5) | ((self.hour as u16) << 11)
    }

    /// Gets the date portion of this datetime in the msdos representation
    pub fn datepart(&self) -> u16 {
        (self.day as u16) | ((self.month as u16) << 5) | ((self.year - 1980) << 9)
    }

    /// Get the year. There is no epoch, i.e. 2018 will be returned as 2018.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Get the month, where 1 = january and 12 = december
    pub fn month(&self) -> u8 {
        self.month
    }

    /// Get the day
    pub fn day(&self) -> u8 {
        self.day
    }

    /// Get the hour
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Get the minute
    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Get the second
    pub fn second(&self) -> u8 {
        self.second
    }
}

pub(crate) mod ffi {
    pub const S_IFMT: u32 = 0o0170000;
    pub const S_IFDIR: u32 = 0o0040000;
    pub const S_IFREG: u32 = 0o0100000;
    pub const S_IFLNK: u32 = 0o0120000;
}

/// The logical kind of an archive entry, derived from its stored attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file
    File,
    /// A directory marker (no content, name ends in `/`)
    Directory,
    /// A symbolic link whose target is stored as the entry content
    Symlink,
}

/// Version-made-by written into central directory headers we produce.
pub(crate) const DEFAULT_VERSION: u8 = 45;

/// One member of an archive: the merged view of a central directory header
/// and the local file header it points at.
///
/// Entries are value-like snapshots. They are produced by the catalog scan or
/// by a successful add, never mutated afterwards; overwriting a path yields a
/// fresh `Entry` and invalidates the old one.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Raw high byte of version-made-by; preserved so foreign headers
    /// rewrite faithfully even for hosts we do not interpret.
    pub(crate) host_system: u8,
    pub(crate) version_made_by: u8,
    pub(crate) encrypted: bool,
    pub(crate) is_utf8: bool,
    pub(crate) using_data_descriptor: bool,
    pub(crate) compression_method: crate::compression::CompressionMethod,
    pub(crate) last_modified_time: DateTime,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) file_name: String,
    pub(crate) file_name_raw: Vec<u8>,
    pub(crate) extra_field: Vec<u8>,
    pub(crate) file_comment: Vec<u8>,
    pub(crate) external_attributes: u32,
    /// Absolute offset of the local file header in the backing.
    pub(crate) header_start: u64,
    /// Absolute offset of the first payload byte.
    pub(crate) data_start: u64,
    /// 0, 12 or 16 bytes of trailing data descriptor.
    pub(crate) descriptor_size: u64,
    pub(crate) large_file: bool,
}

impl Entry {
    /// Get the name of the entry
    ///
    /// # Warnings
    ///
    /// It is dangerous to use this name directly when extracting an archive.
    /// It may contain an absolute path (`/etc/shadow`), or break out of the
    /// current directory (`../runtime`). Validate it before touching the
    /// file system.
    pub fn name(&self) -> &str {
        &self.file_name
    }

    /// Get the name of the entry in the raw (internal) byte representation.
    ///
    /// Lookup by [`Archive::by_name`](crate::Archive::by_name) matches the
    /// decoded form; these bytes are what is stored on disk.
    pub fn name_raw(&self) -> &[u8] {
        &self.file_name_raw
    }

    /// The kind of the entry, derived from the UNIX mode bits in the external
    /// attributes, falling back to the trailing-slash convention.
    pub fn kind(&self) -> EntryKind {
        if let Some(mode) = self.unix_mode() {
            match mode & ffi::S_IFMT {
                ffi::S_IFLNK => return EntryKind::Symlink,
                ffi::S_IFDIR => return EntryKind::Directory,
                ffi::S_IFREG => return EntryKind::File,
                _ => {}
            }
        }
        if self.file_name.ends_with('/') || self.file_name.ends_with('\\') {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Returns whether the entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Returns whether the entry is a regular file
    pub fn is_file(&self) -> bool {
        self.kind() == EntryKind::File
    }

    /// Returns whether the entry is a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.kind() == EntryKind::Symlink
    }

    /// Get the size of the entry, in bytes, when uncompressed
    pub fn size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Get the size of the entry, in bytes, inside the archive
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Get the CRC32 hash of the original content
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Get the compression method used to store the entry
    pub fn compression(&self) -> crate::compression::CompressionMethod {
        self.compression_method
    }

    /// Get the time the entry was last modified
    pub fn last_modified(&self) -> DateTime {
        self.last_modified_time
    }

    /// Get the comment attached to the entry, as raw bytes
    pub fn comment(&self) -> &[u8] {
        &self.file_comment
    }

    /// Extra-field bytes forwarded verbatim from the central directory
    /// header. The ZIP64 block is interpreted during the scan and is not
    /// part of this slice.
    pub fn extra_data(&self) -> &[u8] {
        &self.extra_field
    }

    /// Get unix mode for the entry
    pub fn unix_mode(&self) -> Option<u32> {
        if self.external_attributes == 0 {
            return None;
        }

        match self.system() {
            System::Unix => Some(self.external_attributes >> 16),
            System::Dos => {
                // Interpret the DOS directory and read-only bits.
                let mut mode = if 0x10 == (self.external_attributes & 0x10) {
                    ffi::S_IFDIR | 0o0755
                } else {
                    ffi::S_IFREG | 0o0644
                };
                if 0x01 == (self.external_attributes & 0x01) {
                    mode &= 0o0555 | ffi::S_IFMT;
                }
                Some(mode)
            }
            _ => None,
        }
    }

    /// POSIX permission bits, defaulting to 0755 for directories and 0644 for
    /// files when the recording host stored none.
    pub fn permissions(&self) -> u32 {
        match self.unix_mode() {
            Some(mode) => mode & !ffi::S_IFMT,
            None => match self.kind() {
                EntryKind::Directory => 0o755,
                _ => 0o644,
            },
        }
    }

    /// Get the starting offset of the local header for this entry
    pub fn header_start(&self) -> u64 {
        self.header_start
    }

    /// Get the starting offset of the (compressed) content
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Number of backing bytes occupied by this entry: local header, name and
    /// extra field, compressed payload and the optional data descriptor.
    pub fn local_size(&self) -> u64 {
        (self.data_start - self.header_start) + self.compressed_size + self.descriptor_size
    }

    /// Get the version of the software that produced the entry
    pub fn version_made_by(&self) -> (u8, u8) {
        (self.version_made_by / 10, self.version_made_by % 10)
    }

    /// The host system that recorded the external attributes
    pub fn system(&self) -> System {
        System::from_u8(self.host_system)
    }

    /// Whether the entry payload is encrypted. Encrypted entries can be
    /// catalogued but not extracted.
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }
}
