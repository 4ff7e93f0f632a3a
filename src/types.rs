//! Core types for the routefs virtual filesystem.

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::FsError;

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Result of a stat query.
///
/// Existence is implied by having a `Metadata` at all. Every other field is
/// `None` when the backend could not (or was not asked to) determine it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Type of the entry, if known.
    pub file_type: Option<FileType>,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// Last modification time, if known.
    pub modified: Option<SystemTime>,
}

impl Metadata {
    /// Metadata for a regular file of known size.
    pub fn file(size: u64) -> Self {
        Self {
            file_type: Some(FileType::File),
            size: Some(size),
            modified: None,
        }
    }

    /// Metadata for a directory.
    pub fn directory() -> Self {
        Self {
            file_type: Some(FileType::Directory),
            size: None,
            modified: None,
        }
    }

    /// Set the modification time.
    pub fn with_modified(mut self, modified: Option<SystemTime>) -> Self {
        self.modified = modified;
        self
    }

    /// Returns `true` if this is known to be a regular file.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.file_type == Some(FileType::File)
    }

    /// Returns `true` if this is known to be a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == Some(FileType::Directory)
    }
}

/// An entry produced by a directory walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Name relative to the walked directory; nested entries use `/`.
    pub name: String,
    /// Type of the entry, if known.
    pub file_type: Option<FileType>,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// Last modification time, if known.
    pub modified: Option<SystemTime>,
    /// Backend-specific attributes.
    pub extra: BTreeMap<String, String>,
}

impl DirEntry {
    /// Returns `true` if this entry is known to be a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type == Some(FileType::Directory)
    }
}

/// Flags for opening a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create file if it doesn't exist.
    pub create: bool,
    /// Truncate file to zero length.
    pub truncate: bool,
    /// Append to end of file.
    pub append: bool,
}

impl OpenFlags {
    /// Read-only access (`r`).
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
    };

    /// Write access with create and truncate (`w`).
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    /// Read and write access on an existing file (`r+`).
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
    };

    /// Read and write access, creating or truncating (`w+`).
    pub const READ_WRITE_CREATE: Self = Self {
        read: true,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    /// Append mode - writes go to end of file (`a`).
    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };

    /// Append mode that also allows reading (`a+`).
    pub const APPEND_READ: Self = Self {
        read: true,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };

    /// Parse an fopen-style mode string (`"rb"`, `"wb+"`, `"a"`, ...).
    ///
    /// The binary marker `b` is accepted anywhere after the first letter
    /// and ignored.
    pub fn parse(mode: &str) -> Result<Self, FsError> {
        let invalid = || FsError::InvalidArgument(format!("invalid open mode: {mode:?}"));
        let mut chars = mode.chars();
        let base = chars.next().ok_or_else(invalid)?;
        let mut plus = false;
        for c in chars {
            match c {
                'b' | 't' => {}
                '+' if !plus => plus = true,
                _ => return Err(invalid()),
            }
        }
        Ok(match (base, plus) {
            ('r', false) => Self::READ,
            ('r', true) => Self::READ_WRITE,
            ('w', false) => Self::WRITE,
            ('w', true) => Self::READ_WRITE_CREATE,
            ('a', false) => Self::APPEND,
            ('a', true) => Self::APPEND_READ,
            _ => return Err(invalid()),
        })
    }

    /// Returns `true` if the handle may not modify the file.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.write
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which fields a stat query must determine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFlags {
    /// Existence: an absent path yields `Ok(None)` instead of an error.
    pub exists: bool,
    /// File type.
    pub nature: bool,
    /// Size.
    pub size: bool,
}

impl StatFlags {
    /// Existence only.
    pub const EXISTS: Self = Self {
        exists: true,
        nature: false,
        size: false,
    };

    /// File type only.
    pub const NATURE: Self = Self {
        exists: false,
        nature: true,
        size: false,
    };

    /// Size only.
    pub const SIZE: Self = Self {
        exists: false,
        nature: false,
        size: true,
    };

    /// Everything.
    pub const ALL: Self = Self {
        exists: true,
        nature: true,
        size: true,
    };
}

impl BitOr for StatFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            exists: self.exists || rhs.exists,
            nature: self.nature || rhs.nature,
            size: self.size || rhs.size,
        }
    }
}

/// Allocation state of a byte range in a sparse file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeStatus {
    /// The range holds materialized data.
    Data,
    /// The range is unallocated and reads as zeros.
    Hole,
    /// The backend cannot tell.
    Unknown,
}

/// Description of one option understood by a backend handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Option key as accepted by [`Config::set_option`](crate::Config::set_option).
    pub name: &'static str,
    /// Value type (`boolean`, `size`, `integer`, `string`).
    pub kind: &'static str,
    /// Human-readable description.
    pub description: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_file() {
        let m = Metadata::file(3);
        assert!(m.is_file());
        assert!(!m.is_dir());
        assert_eq!(m.size, Some(3));
    }

    #[test]
    fn metadata_unknown_type_is_neither() {
        let m = Metadata::default();
        assert!(!m.is_file());
        assert!(!m.is_dir());
    }

    #[test]
    fn open_flags_constants() {
        assert!(OpenFlags::READ.read);
        assert!(!OpenFlags::READ.write);
        assert!(!OpenFlags::READ.create);

        assert!(!OpenFlags::WRITE.read);
        assert!(OpenFlags::WRITE.write);
        assert!(OpenFlags::WRITE.create);
        assert!(OpenFlags::WRITE.truncate);

        assert!(OpenFlags::READ_WRITE.read);
        assert!(OpenFlags::READ_WRITE.write);
        assert!(!OpenFlags::READ_WRITE.create);

        assert!(OpenFlags::APPEND.write);
        assert!(OpenFlags::APPEND.create);
        assert!(OpenFlags::APPEND.append);
        assert!(!OpenFlags::APPEND.truncate);
    }

    #[test]
    fn open_flags_parse_modes() {
        assert_eq!(OpenFlags::parse("r").unwrap(), OpenFlags::READ);
        assert_eq!(OpenFlags::parse("rb").unwrap(), OpenFlags::READ);
        assert_eq!(OpenFlags::parse("r+b").unwrap(), OpenFlags::READ_WRITE);
        assert_eq!(OpenFlags::parse("wb").unwrap(), OpenFlags::WRITE);
        assert_eq!(
            OpenFlags::parse("wb+").unwrap(),
            OpenFlags::READ_WRITE_CREATE
        );
        assert_eq!(OpenFlags::parse("ab").unwrap(), OpenFlags::APPEND);
        assert_eq!(OpenFlags::parse("a+").unwrap(), OpenFlags::APPEND_READ);
        assert_eq!("w".parse::<OpenFlags>().unwrap(), OpenFlags::WRITE);
    }

    #[test]
    fn open_flags_parse_rejects_garbage() {
        assert!(OpenFlags::parse("").is_err());
        assert!(OpenFlags::parse("x").is_err());
        assert!(OpenFlags::parse("r++").is_err());
        assert!(OpenFlags::parse("rw").is_err());
    }

    #[test]
    fn stat_flags_combine() {
        let flags = StatFlags::EXISTS | StatFlags::SIZE;
        assert!(flags.exists);
        assert!(flags.size);
        assert!(!flags.nature);
        assert_eq!(StatFlags::EXISTS | StatFlags::NATURE | StatFlags::SIZE, StatFlags::ALL);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FileType>();
        assert_send_sync::<Metadata>();
        assert_send_sync::<DirEntry>();
        assert_send_sync::<OpenFlags>();
        assert_send_sync::<StatFlags>();
        assert_send_sync::<RangeStatus>();
    }
}
