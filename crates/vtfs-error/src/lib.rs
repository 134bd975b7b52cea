#![forbid(unsafe_code)]
//! Error types for VTFS.
//!
//! # Error Taxonomy
//!
//! VTFS has a single error type, [`VtfsError`], shared by every crate in the
//! workspace. The directory store, the file buffer, the allocator and the
//! engine all return it directly, so no conversion layer exists between
//! crates.
//!
//! Most variants describe a deterministic outcome of the current tree state
//! (a name already taken, a directory at capacity, an empty table). Callers
//! never need to retry such an error without first changing the state.
//! `Corruption` is the exception: it marks an internal-consistency violation
//! (an entry naming a free slot, a bitmap bit outside the table) and tests
//! treat it as fatal.
//!
//! ## Host errno Mapping
//!
//! Every `VtfsError` variant maps to exactly one POSIX errno via
//! [`VtfsError::to_errno`]. The mapping is exhaustive (no wildcard arms) so
//! adding a new variant is a compile error until its errno is assigned.
//!
//! | Variant | errno | Constant |
//! |---------|-------|----------|
//! | `NotFound` | `ENOENT` | 2 |
//! | `AlreadyExists` | `EEXIST` | 17 |
//! | `DirectoryFull` | `ENOSPC` | 28 |
//! | `CapacityExhausted` | `ENOSPC` | 28 |
//! | `NotADirectory` | `ENOTDIR` | 20 |
//! | `IsDirectory` | `EISDIR` | 21 |
//! | `NotEmpty` | `ENOTEMPTY` | 39 |
//! | `OutOfSpace` | `ENOSPC` | 28 |
//! | `InvalidInode` | `ENOENT` | 2 |
//! | `StaleHandle` | `ESTALE` | 116 |
//! | `NameTooLong` | `ENAMETOOLONG` | 36 |
//! | `InvalidName` | `EINVAL` | 22 |
//! | `NotPermitted` | `EPERM` | 1 |
//! | `InvalidConfig` | `EINVAL` | 22 |
//! | `Corruption` | `EIO` | 5 |
//!
//! ## Design Constraints
//!
//! - `vtfs-error` MUST NOT depend on any other workspace crate.
//! - All string payloads are owned (`String`) so errors can cross thread
//!   boundaries freely.

use thiserror::Error;

/// Unified error type for all VTFS operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VtfsError {
    /// Named entry or inode not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target name already present in the directory.
    #[error("file exists")]
    AlreadyExists,

    /// The directory's entry array is at capacity.
    #[error("directory full")]
    DirectoryFull,

    /// Every inode id in the table is allocated.
    #[error("inode table exhausted")]
    CapacityExhausted,

    /// The inode is not a directory (or the entry does not name one).
    #[error("not a directory")]
    NotADirectory,

    /// A file operation was attempted on a directory.
    #[error("is a directory")]
    IsDirectory,

    /// rmdir on a directory that holds more than `.` and `..`.
    #[error("directory not empty")]
    NotEmpty,

    /// A write would end past the file buffer's capacity.
    #[error("no space left in file buffer")]
    OutOfSpace,

    /// Inode id out of the table range, or not allocated.
    #[error("invalid inode {0}")]
    InvalidInode(u64),

    /// Handle generation no longer matches the table slot.
    #[error("stale handle for inode {0}")]
    StaleHandle(u64),

    /// Entry name exceeds the 255-byte limit.
    #[error("name too long")]
    NameTooLong,

    /// Entry name is empty, contains `/` or NUL, or targets `.`/`..`.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Operation not permitted (hard link to a directory).
    #[error("operation not permitted")]
    NotPermitted,

    /// Mount configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal-consistency violation in the inode table.
    #[error("corrupt inode table at inode {ino}: {detail}")]
    Corruption { ino: u64, detail: String },
}

impl VtfsError {
    /// Convert this error into a POSIX errno for the host layer.
    ///
    /// The mapping is exhaustive. Policy notes:
    /// - `DirectoryFull`, `CapacityExhausted` and `OutOfSpace` all collapse
    ///   to `ENOSPC`; the variant keeps the distinction for logs and tests.
    /// - `InvalidInode` → `ENOENT`: an unallocated id looks like a vanished
    ///   object to the host.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound(_) | Self::InvalidInode(_) => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::DirectoryFull | Self::CapacityExhausted | Self::OutOfSpace => libc::ENOSPC,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::StaleHandle(_) => libc::ESTALE,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::InvalidName(_) | Self::InvalidConfig(_) => libc::EINVAL,
            Self::NotPermitted => libc::EPERM,
            Self::Corruption { .. } => libc::EIO,
        }
    }

    /// Whether this error signals an internal-consistency violation.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

/// Result alias using `VtfsError`.
pub type Result<T> = std::result::Result<T, VtfsError>;
