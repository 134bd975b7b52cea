#![forbid(unsafe_code)]
//! Shared newtypes for VTFS.
//!
//! Inode ids, handle generations, file modes and the attribute record that
//! every operation hands back to the host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

/// Per-slot incarnation counter.
///
/// Advanced every time a record is installed in an inode-table slot, so a
/// handle taken before the slot was reclaimed and reused no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    /// Generation of a slot that has never held a record.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Back-reference from a host object (open file, cached dentry) to an inode.
///
/// Holding a handle never keeps the record alive; it only lets the engine
/// detect that the slot it points at has since been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeHandle {
    pub ino: InodeNumber,
    pub generation: Generation,
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ino, self.generation)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Permission and sticky/setuid/setgid bits.
pub const S_IPERM: u16 = 0o7777;

/// Directory entry type tags as reported to the host (`DT_*`).
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;

/// Object kind stored in an inode's mode and in each directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
}

impl FileType {
    /// Mode bits for this kind.
    #[must_use]
    pub const fn mode_bits(self) -> u16 {
        match self {
            Self::RegularFile => S_IFREG,
            Self::Directory => S_IFDIR,
        }
    }

    /// `DT_*` tag for directory listings.
    #[must_use]
    pub const fn dtype(self) -> u8 {
        match self {
            Self::RegularFile => DT_REG,
            Self::Directory => DT_DIR,
        }
    }
}

/// Object kind plus permission bits.
///
/// Construction always goes through [`FileMode::new`], which discards any
/// caller-supplied type bits, so a stored mode always names exactly one of
/// the supported kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMode(u16);

impl FileMode {
    #[must_use]
    pub const fn new(kind: FileType, perm: u16) -> Self {
        Self(kind.mode_bits() | (perm & S_IPERM))
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn perm(self) -> u16 {
        self.0 & S_IPERM
    }

    #[must_use]
    pub const fn file_type(self) -> FileType {
        if self.0 & S_IFMT == S_IFDIR {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }

    #[must_use]
    pub const fn is_dir(self) -> bool {
        matches!(self.file_type(), FileType::Directory)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

/// Inode attributes returned by `getattr`, `lookup`, `create`, `mkdir` and
/// `link`.
///
/// A snapshot: mutating the inode afterwards does not update a previously
/// returned `InodeAttr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    /// Inode number.
    pub ino: InodeNumber,
    /// Slot generation at the time of the snapshot.
    pub generation: Generation,
    /// Object kind and permission bits.
    pub mode: FileMode,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Content length for files, 0 for directories.
    pub size: u64,
    /// Number of hard links.
    pub nlink: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

impl InodeAttr {
    #[must_use]
    pub fn kind(&self) -> FileType {
        self.mode.file_type()
    }

    #[must_use]
    pub fn perm(&self) -> u16 {
        self.mode.perm()
    }

    /// Handle the host keeps for later read/write/evict calls.
    #[must_use]
    pub fn handle(&self) -> InodeHandle {
        InodeHandle {
            ino: self.ino,
            generation: self.generation,
        }
    }
}
