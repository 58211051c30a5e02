//! Possible ZIP compression methods.

use std::fmt;

/// Identifies the storage format used to compress a file within a ZIP archive.
///
/// Only the methods this library can read back are representable; everything
/// else is carried as [`CompressionMethod::Unsupported`] so foreign archives
/// can still be catalogued.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CompressionMethod {
    /// Store the file as is
    Stored,
    /// Compress the file using Deflate
    Deflated,
    /// Unsupported compression method
    Unsupported(u16),
}

impl CompressionMethod {
    /// Converts a wire u16 to its corresponding CompressionMethod
    pub fn from_u16(val: u16) -> CompressionMethod {
        match val {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// Converts a CompressionMethod to its corresponding wire u16
    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Just duplicate what the Debug format looks like, i.e, the enum key
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod test {
    use super::CompressionMethod;

    #[test]
    fn from_eq_to() {
        for v in 0..=u16::MAX {
            let method = CompressionMethod::from_u16(v);
            assert_eq!(v, method.to_u16());
        }
    }

    #[test]
    fn to_eq_from() {
        fn check_match(method: CompressionMethod) {
            let to = method.to_u16();
            let from = CompressionMethod::from_u16(to);
            let back = from.to_u16();
            assert_eq!(to, back);
        }

        check_match(CompressionMethod::Stored);
        check_match(CompressionMethod::Deflated);
        check_match(CompressionMethod::Unsupported(35));
    }

    #[test]
    fn to_display_fmt() {
        fn check_display(method: CompressionMethod, expected: &str) {
            let actual = format!("{method}");
            assert_eq!(actual, expected);
        }

        check_display(CompressionMethod::Stored, "Stored");
        check_display(CompressionMethod::Deflated, "Deflated");
        check_display(CompressionMethod::Unsupported(35), "Unsupported(35)");
    }
}
