#![forbid(unsafe_code)]
//! Directory entry store.
//!
//! A directory is a capacity-bounded, insertion-ordered sequence of
//! `(name, inode, kind)` triples whose first two slots are always `.` and
//! `..`. Lookups are a linear scan with exact byte comparison; capacity is
//! small enough that this never matters.

use serde::{Deserialize, Serialize};
use vtfs_error::{Result, VtfsError};
use vtfs_types::{FileType, InodeNumber};

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

pub const DOT: &[u8] = b".";
pub const DOTDOT: &[u8] = b"..";

/// Number of slots every directory spends on `.` and `..`.
pub const RESERVED_ENTRIES: usize = 2;

fn display_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Reject names the store can never hold.
///
/// Empty names, names containing `/` or NUL, and names over
/// [`MAX_NAME_LEN`] bytes. `.` and `..` pass here; callers decide what a
/// dot name means for their operation.
pub fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(VtfsError::InvalidName(
            "directory entry name cannot be empty".to_owned(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(VtfsError::NameTooLong);
    }
    if name.iter().any(|&b| b == b'/' || b == 0) {
        return Err(VtfsError::InvalidName(display_name(name)));
    }
    Ok(())
}

#[must_use]
pub fn is_dot_name(name: &[u8]) -> bool {
    name == DOT || name == DOTDOT
}

/// One name → inode association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    name: Vec<u8>,
    pub ino: InodeNumber,
    pub kind: FileType,
}

impl DirEntry {
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        display_name(&self.name)
    }
}

/// Directory payload of an inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
    capacity: usize,
}

impl Directory {
    /// New directory holding only `.` → `self_ino` and `..` → `parent`.
    ///
    /// `capacity` counts the dot entries, so it must be at least 2.
    pub fn new(self_ino: InodeNumber, parent: InodeNumber, capacity: usize) -> Result<Self> {
        if capacity < RESERVED_ENTRIES {
            return Err(VtfsError::InvalidConfig(format!(
                "directory capacity {capacity} cannot hold . and .."
            )));
        }
        let mut entries = Vec::with_capacity(capacity);
        entries.push(DirEntry {
            name: DOT.to_vec(),
            ino: self_ino,
            kind: FileType::Directory,
        });
        entries.push(DirEntry {
            name: DOTDOT.to_vec(),
            ino: parent,
            kind: FileType::Directory,
        });
        Ok(Self { entries, capacity })
    }

    /// Inode id recorded in the `..` entry.
    #[must_use]
    pub fn parent(&self) -> InodeNumber {
        self.entries[1].ino
    }

    /// Entries in use, including `.` and `..`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// True when the directory holds nothing but `.` and `..`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= RESERVED_ENTRIES
    }

    pub fn find(&self, name: &[u8]) -> Result<&DirEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| VtfsError::NotFound(display_name(name)))
    }

    #[must_use]
    pub fn contains(&self, name: &[u8]) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Append a new entry.
    ///
    /// Fails with `AlreadyExists` when the name is taken (which covers `.`
    /// and `..`) and `DirectoryFull` at capacity. Nothing changes on error.
    pub fn insert(&mut self, name: &[u8], ino: InodeNumber, kind: FileType) -> Result<()> {
        validate_name(name)?;
        if self.contains(name) {
            return Err(VtfsError::AlreadyExists);
        }
        if self.is_full() {
            return Err(VtfsError::DirectoryFull);
        }
        self.entries.push(DirEntry {
            name: name.to_vec(),
            ino,
            kind,
        });
        Ok(())
    }

    /// Remove the entry called `name`, shifting later entries down by one.
    ///
    /// `.` and `..` can never be removed.
    pub fn remove(&mut self, name: &[u8]) -> Result<DirEntry> {
        if is_dot_name(name) {
            return Err(VtfsError::InvalidName(display_name(name)));
        }
        let pos = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| VtfsError::NotFound(display_name(name)))?;
        Ok(self.entries.remove(pos))
    }

    #[must_use]
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Entries starting at position `offset`, paired with their position.
    pub fn entries_from(&self, offset: usize) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries.iter().enumerate().skip(offset)
    }

    /// Number of entries (excluding `..`) that name subdirectories.
    #[must_use]
    pub fn subdirectory_count(&self) -> usize {
        self.entries
            .iter()
            .skip(RESERVED_ENTRIES)
            .filter(|e| e.kind == FileType::Directory)
            .count()
    }
}
