#![forbid(unsafe_code)]
//! Inode records.
//!
//! An [`InodeRecord`] holds metadata plus exactly one payload: a
//! [`Directory`] or a [`FileBuffer`]. The payload enum is the object-kind
//! tag; the mode's type bits are derived from the same constructor, so the
//! two can never disagree.

use std::time::SystemTime;
use vtfs_dir::Directory;
use vtfs_error::{Result, VtfsError};
use vtfs_types::{FileMode, FileType, Generation, InodeAttr, InodeNumber};

// ── File buffer ─────────────────────────────────────────────────────────────

/// Capacity-bounded file content.
///
/// Storage grows on demand but never past `capacity`; a write that would
/// end beyond it is rejected whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl FileBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Length of valid content.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes in `offset .. offset + len`, clamped to the content length.
    ///
    /// An offset at or past the end yields an empty slice.
    #[must_use]
    pub fn read(&self, offset: u64, len: usize) -> &[u8] {
        let Ok(start) = usize::try_from(offset) else {
            return &[];
        };
        if start >= self.data.len() {
            return &[];
        }
        let end = start.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    /// Copy `bytes` in at `offset`, extending the content when the write
    /// ends past it. A gap between the old end and `offset` reads as zeros.
    ///
    /// Returns the number of bytes written. An empty write changes nothing.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<usize> {
        let start = usize::try_from(offset).map_err(|_| VtfsError::OutOfSpace)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or(VtfsError::OutOfSpace)?;
        if end > self.capacity {
            return Err(VtfsError::OutOfSpace);
        }
        if bytes.is_empty() {
            return Ok(0);
        }
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

// ── Inode record ────────────────────────────────────────────────────────────

/// Kind-specific inode contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodePayload {
    Directory(Directory),
    File(FileBuffer),
}

/// Owner and permission bits supplied by the host at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    #[must_use]
    pub const fn new(perm: u16, uid: u32, gid: u32) -> Self {
        Self { perm, uid, gid }
    }
}

/// One filesystem object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    pub ino: InodeNumber,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    payload: InodePayload,
}

impl InodeRecord {
    /// New directory with `.` and `..`, link count 2.
    pub fn new_dir(
        ino: InodeNumber,
        parent: InodeNumber,
        owner: Ownership,
        capacity: usize,
    ) -> Result<Self> {
        let dir = Directory::new(ino, parent, capacity)?;
        Ok(Self::with_payload(
            ino,
            FileMode::new(FileType::Directory, owner.perm),
            owner,
            2,
            InodePayload::Directory(dir),
        ))
    }

    /// New empty regular file, link count 1.
    #[must_use]
    pub fn new_file(ino: InodeNumber, owner: Ownership, capacity: usize) -> Self {
        Self::with_payload(
            ino,
            FileMode::new(FileType::RegularFile, owner.perm),
            owner,
            1,
            InodePayload::File(FileBuffer::new(capacity)),
        )
    }

    fn with_payload(
        ino: InodeNumber,
        mode: FileMode,
        owner: Ownership,
        nlink: u32,
        payload: InodePayload,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            ino,
            mode,
            uid: owner.uid,
            gid: owner.gid,
            nlink,
            atime: now,
            mtime: now,
            ctime: now,
            payload,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FileType {
        match self.payload {
            InodePayload::Directory(_) => FileType::Directory,
            InodePayload::File(_) => FileType::RegularFile,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &InodePayload {
        &self.payload
    }

    /// Content length for files, 0 for directories.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.payload {
            InodePayload::File(buf) => buf.len() as u64,
            InodePayload::Directory(_) => 0,
        }
    }

    pub fn as_dir(&self) -> Result<&Directory> {
        match &self.payload {
            InodePayload::Directory(dir) => Ok(dir),
            InodePayload::File(_) => Err(VtfsError::NotADirectory),
        }
    }

    pub fn as_dir_mut(&mut self) -> Result<&mut Directory> {
        match &mut self.payload {
            InodePayload::Directory(dir) => Ok(dir),
            InodePayload::File(_) => Err(VtfsError::NotADirectory),
        }
    }

    pub fn as_file(&self) -> Result<&FileBuffer> {
        match &self.payload {
            InodePayload::File(buf) => Ok(buf),
            InodePayload::Directory(_) => Err(VtfsError::IsDirectory),
        }
    }

    pub fn as_file_mut(&mut self) -> Result<&mut FileBuffer> {
        match &mut self.payload {
            InodePayload::File(buf) => Ok(buf),
            InodePayload::Directory(_) => Err(VtfsError::IsDirectory),
        }
    }

    /// Increment the link count, saturating.
    pub fn inc_nlink(&mut self) {
        self.nlink = self.nlink.saturating_add(1);
    }

    /// Decrement the link count, flooring at zero.
    pub fn drop_nlink(&mut self) {
        self.nlink = self.nlink.saturating_sub(1);
    }

    pub fn clear_nlink(&mut self) {
        self.nlink = 0;
    }

    /// Mark a metadata change (link count, ownership).
    pub fn touch_ctime(&mut self) {
        self.ctime = SystemTime::now();
    }

    /// Mark a content change (file data or directory entries).
    pub fn touch_mtime(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_atime(&mut self) {
        self.atime = SystemTime::now();
    }

    /// Snapshot the attributes the host sees.
    #[must_use]
    pub fn attr(&self, generation: Generation) -> InodeAttr {
        InodeAttr {
            ino: self.ino,
            generation,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size(),
            nlink: self.nlink,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}
