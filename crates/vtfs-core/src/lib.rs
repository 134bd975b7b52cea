#![forbid(unsafe_code)]
//! VTFS engine: a fixed-capacity in-memory filesystem driven by a host VFS.
//!
//! The host resolves paths one component at a time through
//! [`FsOps::lookup`] and hands every mutation a resolved parent plus a single
//! name. Open files are referred to by [`InodeHandle`], which carries the
//! slot generation so a reclaimed-and-reused inode is detected instead of
//! silently aliased.
//!
//! ## Concurrency
//!
//! Every inode slot has its own `RwLock`; the allocation bitmap has one
//! `Mutex`. A mutation holds its parent directory's write lock from the
//! first check to the last store, then takes the child's lock, then (when
//! allocating or freeing) the bitmap lock. Tree edges only point downward
//! (no directory hard links, `.`/`..` never targeted), so that order is
//! acyclic.

mod config;
mod integrity;
mod table;

pub use config::{
    DEFAULT_DIR_CAPACITY, DEFAULT_FILE_CAPACITY, DEFAULT_MAX_INODES, DEFAULT_ROOT_INO, FsConfig,
};
pub use integrity::{IntegrityReport, Violation, verify_integrity};
pub use vtfs_dir::MAX_NAME_LEN;
pub use vtfs_error::{Result, VtfsError};
pub use vtfs_types::{FileMode, FileType, Generation, InodeAttr, InodeHandle, InodeNumber};

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use table::{InodeTable, Slot};
use tracing::{debug, error, info, trace, warn};
use vtfs_dir::{DOT, DOTDOT, is_dot_name, validate_name};
use vtfs_inode::{InodeRecord, Ownership};

/// Permission bits of the root directory.
pub const ROOT_PERM: u16 = 0o777;

// ── Host-facing types ───────────────────────────────────────────────────────

/// One directory listing entry returned by [`FsOps::readdir`].
///
/// `offset` is the cookie to pass back to continue after this entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaddirEntry {
    pub ino: InodeNumber,
    pub offset: u64,
    pub kind: FileType,
    pub name: Vec<u8>,
}

impl ReaddirEntry {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Filesystem-wide counters returned by [`FsOps::statfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    pub root_ino: InodeNumber,
    /// Table size, root included.
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub dir_capacity: usize,
    pub file_capacity: usize,
}

// ── Operation interface ─────────────────────────────────────────────────────

/// Operations the host VFS dispatches to the engine.
///
/// Every call is synchronous, bounded, and either fully applied or not
/// applied at all.
pub trait FsOps: Send + Sync {
    /// Id of the root directory.
    fn root(&self) -> InodeNumber;

    /// Attributes of an allocated inode.
    ///
    /// `InvalidInode` when `ino` is outside the table or unallocated.
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr>;

    /// Resolve one name inside `parent`.
    ///
    /// An absent name is `Ok(None)`, not an error. Fails only for an
    /// invalid parent, a parent that is not a directory, or an invalid name.
    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<Option<InodeAttr>>;

    /// List entries of `ino` starting at position `offset`, `.` and `..`
    /// included. Pass 0 first, then the last entry's `offset` cookie.
    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<ReaddirEntry>>;

    /// Create an empty regular file with link count 1.
    fn create(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<InodeAttr>;

    /// Create a directory holding `.` and `..`, link count 2, and bump the
    /// parent's link count.
    fn mkdir(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<InodeAttr>;

    /// Remove a file entry and drop the target's link count. The inode
    /// itself survives until the host evicts it.
    fn unlink(&self, parent: InodeNumber, name: &OsStr) -> Result<()>;

    /// Remove an empty subdirectory.
    fn rmdir(&self, parent: InodeNumber, name: &OsStr) -> Result<()>;

    /// Add a second name for the regular file `source`.
    fn link(&self, source: InodeNumber, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr>;

    /// Up to `size` bytes from `offset`; empty at or past end of file.
    fn read(&self, handle: InodeHandle, offset: u64, size: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(&self, handle: InodeHandle, offset: u64, data: &[u8]) -> Result<u32>;

    fn statfs(&self) -> FsStats;

    /// The host no longer references `handle`. Reclaims the inode when its
    /// link count is zero; otherwise does nothing.
    fn evict(&self, handle: InodeHandle);
}

// ── Failure logging ─────────────────────────────────────────────────────────

/// Structured context for a failed operation.
struct OpFailure<'a> {
    op: &'static str,
    ino: InodeNumber,
    error: &'a VtfsError,
}

impl OpFailure<'_> {
    fn log(&self) {
        let errno = self.error.to_errno();
        match self.error {
            VtfsError::Corruption { .. } => {
                error!(op = self.op, ino = self.ino.0, errno, error = %self.error, "vtfs op hit corruption");
            }
            VtfsError::StaleHandle(_) => {
                warn!(op = self.op, ino = self.ino.0, errno, error = %self.error, "vtfs op with stale handle");
            }
            _ if errno == libc::ENOENT => {
                trace!(op = self.op, ino = self.ino.0, errno, error = %self.error, "vtfs op returned ENOENT");
            }
            _ => {
                debug!(op = self.op, ino = self.ino.0, errno, error = %self.error, "vtfs op rejected");
            }
        }
    }
}

fn logged<T>(op: &'static str, ino: InodeNumber, result: Result<T>) -> Result<T> {
    result.inspect_err(|error| OpFailure { op, ino, error }.log())
}

fn lossy(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// An entry names an inode whose slot is empty.
fn dangling(dir: InodeNumber, target: InodeNumber) -> VtfsError {
    VtfsError::Corruption {
        ino: dir.0,
        detail: format!("entry points at unallocated inode {target}"),
    }
}

/// Directory record that can still accept or lose entries.
fn live_dir(slot: &mut Slot, ino: InodeNumber) -> Result<&mut InodeRecord> {
    let record = slot.get_mut(ino)?;
    record.as_dir()?;
    if record.nlink == 0 {
        return Err(VtfsError::NotFound(format!("directory {ino} was removed")));
    }
    Ok(record)
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// A mounted filesystem instance. Owns the inode table outright.
#[derive(Debug)]
pub struct Vtfs {
    config: FsConfig,
    table: InodeTable,
}

impl Vtfs {
    /// Validate `config`, build the table and install the root directory
    /// (`.` and `..` both pointing at itself, link count 2).
    pub fn mount(config: FsConfig) -> Result<Self> {
        config.validate()?;
        let table = InodeTable::new(&config)?;
        let root = table.root();
        let record = InodeRecord::new_dir(
            root,
            root,
            Ownership::new(ROOT_PERM, 0, 0),
            config.dir_capacity,
        )?;
        table.slot(root)?.write().install(record);
        info!(
            root = root.0,
            max_inodes = config.max_inodes,
            dir_capacity = config.dir_capacity,
            file_capacity = config.file_capacity,
            "vtfs mounted"
        );
        Ok(Self { config, table })
    }

    /// Tear down the instance, discarding every record.
    pub fn unmount(self) {
        let live = self.table.allocated_ids().len();
        info!(root = self.table.root().0, live_inodes = live, "vtfs unmounted");
    }

    #[must_use]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// [`FsOps::create`] with a host-side materialization step.
    ///
    /// `materialize` runs after the inode is built but before its entry is
    /// published. If it fails, the inode is discarded and its id freed, so
    /// the parent is left exactly as it was. It runs with the parent locked
    /// and must not call back into this instance.
    pub fn create_with<F>(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        mode: u16,
        uid: u32,
        gid: u32,
        materialize: F,
    ) -> Result<InodeAttr>
    where
        F: FnOnce(&InodeAttr) -> Result<()>,
    {
        logged(
            "create",
            parent,
            self.make_node(
                parent,
                name.as_encoded_bytes(),
                FileType::RegularFile,
                Ownership::new(mode, uid, gid),
                materialize,
            ),
        )
    }

    fn make_node<F>(
        &self,
        parent: InodeNumber,
        name: &[u8],
        kind: FileType,
        owner: Ownership,
        materialize: F,
    ) -> Result<InodeAttr>
    where
        F: FnOnce(&InodeAttr) -> Result<()>,
    {
        validate_name(name)?;
        let mut parent_slot = self.table.slot(parent)?.write();
        let parent_rec = live_dir(&mut parent_slot, parent)?;
        let dir = parent_rec.as_dir()?;
        if dir.contains(name) {
            return Err(VtfsError::AlreadyExists);
        }
        if dir.is_full() {
            return Err(VtfsError::DirectoryFull);
        }

        let ino = self.table.allocate()?;
        match self.populate(parent_rec, parent, name, ino, kind, owner, materialize) {
            Ok(attr) => {
                debug!(
                    parent = parent.0,
                    ino = ino.0,
                    generation = attr.generation.0,
                    ?kind,
                    name = %lossy(name),
                    "inode created"
                );
                Ok(attr)
            }
            Err(err) => {
                if let Err(free_err) = self.table.release(ino) {
                    error!(ino = ino.0, error = %free_err, "failed to free id during rollback");
                }
                trace!(parent = parent.0, ino = ino.0, error = %err, "create rolled back");
                Err(err)
            }
        }
    }

    /// Build the record for a freshly allocated id, run the host callback,
    /// and publish the entry. On error the slot is left empty; the caller
    /// frees the id.
    #[allow(clippy::too_many_arguments)]
    fn populate<F>(
        &self,
        parent_rec: &mut InodeRecord,
        parent: InodeNumber,
        name: &[u8],
        ino: InodeNumber,
        kind: FileType,
        owner: Ownership,
        materialize: F,
    ) -> Result<InodeAttr>
    where
        F: FnOnce(&InodeAttr) -> Result<()>,
    {
        let record = match kind {
            FileType::Directory => {
                InodeRecord::new_dir(ino, parent, owner, self.config.dir_capacity)?
            }
            FileType::RegularFile => InodeRecord::new_file(ino, owner, self.config.file_capacity),
        };
        let mut child = self.table.slot(ino)?.write();
        if child.record.is_some() {
            return Err(VtfsError::Corruption {
                ino: ino.0,
                detail: "allocator handed out an occupied slot".to_owned(),
            });
        }
        let generation = child.install(record);
        let attr = child.get(ino)?.attr(generation);

        let published = materialize(&attr).and_then(|()| {
            parent_rec
                .as_dir_mut()
                .and_then(|dir| dir.insert(name, ino, kind))
        });
        if let Err(err) = published {
            child.clear();
            return Err(err);
        }
        if kind == FileType::Directory {
            parent_rec.inc_nlink();
        }
        parent_rec.touch_mtime();
        Ok(attr)
    }

    fn lookup_child(&self, parent: InodeNumber, name: &[u8]) -> Result<Option<InodeAttr>> {
        validate_name(name)?;
        let slot = self.table.slot(parent)?.read();
        let record = slot.get(parent)?;
        let dir = record.as_dir()?;
        if name == DOT {
            return Ok(Some(record.attr(slot.generation)));
        }
        if name == DOTDOT {
            let up = dir.parent();
            if up == parent {
                return Ok(Some(record.attr(slot.generation)));
            }
            // Never hold a child while locking its ancestor.
            drop(slot);
            let up_slot = self.table.slot(up)?.read();
            return Ok(up_slot
                .record
                .as_ref()
                .map(|r| r.attr(up_slot.generation)));
        }

        let Ok(entry) = dir.find(name) else {
            trace!(parent = parent.0, name = %lossy(name), "lookup miss");
            return Ok(None);
        };
        let target = entry.ino;
        let child = self.table.slot(target)?.read();
        let attr = child
            .get(target)
            .map_err(|_| dangling(parent, target))?
            .attr(child.generation);
        trace!(parent = parent.0, ino = target.0, name = %lossy(name), "lookup hit");
        Ok(Some(attr))
    }

    fn list_dir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<ReaddirEntry>> {
        let slot = self.table.slot(ino)?.read();
        let dir = slot.get(ino)?.as_dir()?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let entries: Vec<ReaddirEntry> = dir
            .entries_from(start)
            .map(|(pos, entry)| ReaddirEntry {
                ino: entry.ino,
                offset: pos as u64 + 1,
                kind: entry.kind,
                name: entry.name().to_vec(),
            })
            .collect();
        trace!(ino = ino.0, offset, returned = entries.len(), "readdir");
        Ok(entries)
    }

    fn remove_file(&self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        validate_name(name)?;
        let mut parent_slot = self.table.slot(parent)?.write();
        let parent_rec = live_dir(&mut parent_slot, parent)?;
        let entry = parent_rec.as_dir()?.find(name)?;
        if entry.kind == FileType::Directory {
            return Err(VtfsError::IsDirectory);
        }
        let target = entry.ino;

        let mut child_slot = self.table.slot(target)?.write();
        let child = child_slot
            .get_mut(target)
            .map_err(|_| dangling(parent, target))?;
        parent_rec.as_dir_mut()?.remove(name)?;
        parent_rec.touch_mtime();
        child.drop_nlink();
        child.touch_ctime();
        debug!(
            parent = parent.0,
            ino = target.0,
            nlink = child.nlink,
            name = %lossy(name),
            "unlinked"
        );
        Ok(())
    }

    fn remove_dir(&self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        if is_dot_name(name) {
            return Err(VtfsError::InvalidName(lossy(name)));
        }
        validate_name(name)?;
        let mut parent_slot = self.table.slot(parent)?.write();
        let parent_rec = live_dir(&mut parent_slot, parent)?;
        let entry = parent_rec.as_dir()?.find(name)?;
        if entry.kind != FileType::Directory {
            return Err(VtfsError::NotADirectory);
        }
        let target = entry.ino;

        let mut child_slot = self.table.slot(target)?.write();
        let child = child_slot
            .get_mut(target)
            .map_err(|_| dangling(parent, target))?;
        if !child.as_dir()?.is_empty() {
            return Err(VtfsError::NotEmpty);
        }
        parent_rec.as_dir_mut()?.remove(name)?;
        parent_rec.drop_nlink();
        parent_rec.touch_mtime();
        child.clear_nlink();
        child.touch_ctime();
        debug!(parent = parent.0, ino = target.0, name = %lossy(name), "directory removed");
        Ok(())
    }

    fn link_file(
        &self,
        source: InodeNumber,
        parent: InodeNumber,
        name: &[u8],
    ) -> Result<InodeAttr> {
        validate_name(name)?;
        let missing = || VtfsError::NotFound(format!("inode {source}"));

        // Peek at the source kind before taking the parent lock; a directory
        // source could be an ancestor of `parent`.
        let generation = {
            let slot = self.table.slot(source)?.read();
            let record = slot.get(source).map_err(|_| missing())?;
            if record.kind() == FileType::Directory {
                return Err(VtfsError::NotPermitted);
            }
            slot.generation
        };
        if source == parent {
            return Err(VtfsError::NotADirectory);
        }

        let mut parent_slot = self.table.slot(parent)?.write();
        let parent_rec = live_dir(&mut parent_slot, parent)?;
        let dir = parent_rec.as_dir()?;
        if dir.contains(name) {
            return Err(VtfsError::AlreadyExists);
        }
        if dir.is_full() {
            return Err(VtfsError::DirectoryFull);
        }

        let mut source_slot = self.table.slot(source)?.write();
        let target = source_slot
            .check_mut(InodeHandle {
                ino: source,
                generation,
            })
            .map_err(|_| missing())?;
        if target.nlink == 0 {
            return Err(VtfsError::NotFound(format!("inode {source} has no links")));
        }
        parent_rec
            .as_dir_mut()?
            .insert(name, source, FileType::RegularFile)?;
        parent_rec.touch_mtime();
        target.inc_nlink();
        target.touch_ctime();
        debug!(
            parent = parent.0,
            ino = source.0,
            nlink = target.nlink,
            name = %lossy(name),
            "linked"
        );
        Ok(target.attr(generation))
    }

    fn read_file(&self, handle: InodeHandle, offset: u64, size: u32) -> Result<Vec<u8>> {
        let slot = self.table.slot(handle.ino)?.read();
        let buf = slot.check(handle)?.as_file()?;
        let data = buf
            .read(offset, usize::try_from(size).unwrap_or(usize::MAX))
            .to_vec();
        trace!(ino = handle.ino.0, offset, requested = size, returned = data.len(), "read");
        Ok(data)
    }

    fn write_file(&self, handle: InodeHandle, offset: u64, data: &[u8]) -> Result<u32> {
        let mut slot = self.table.slot(handle.ino)?.write();
        let record = slot.check_mut(handle)?;
        let written = record.as_file_mut()?.write(offset, data)?;
        if written > 0 {
            record.touch_mtime();
        }
        trace!(ino = handle.ino.0, offset, written, size = record.size(), "write");
        u32::try_from(written).map_err(|_| VtfsError::OutOfSpace)
    }

    fn reclaim(&self, handle: InodeHandle) {
        let Ok(lock) = self.table.slot(handle.ino) else {
            warn!(%handle, "evict of inode outside the table ignored");
            return;
        };
        if handle.ino == self.table.root() {
            return;
        }
        let mut slot = lock.write();
        let nlink = match slot.check(handle) {
            Ok(record) => record.nlink,
            Err(err) => {
                warn!(%handle, error = %err, "evict with stale handle ignored");
                return;
            }
        };
        if nlink > 0 {
            trace!(%handle, nlink, "evict of linked inode; keeping");
            return;
        }
        slot.clear();
        if let Err(err) = self.table.release(handle.ino) {
            error!(%handle, error = %err, "failed to free evicted inode");
            return;
        }
        debug!(%handle, "inode reclaimed");
    }
}

impl FsOps for Vtfs {
    fn root(&self) -> InodeNumber {
        self.table.root()
    }

    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        let result = self.table.slot(ino).and_then(|lock| {
            let slot = lock.read();
            slot.get(ino).map(|record| record.attr(slot.generation))
        });
        logged("getattr", ino, result)
    }

    fn lookup(&self, parent: InodeNumber, name: &OsStr) -> Result<Option<InodeAttr>> {
        logged(
            "lookup",
            parent,
            self.lookup_child(parent, name.as_encoded_bytes()),
        )
    }

    fn readdir(&self, ino: InodeNumber, offset: u64) -> Result<Vec<ReaddirEntry>> {
        logged("readdir", ino, self.list_dir(ino, offset))
    }

    fn create(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<InodeAttr> {
        self.create_with(parent, name, mode, uid, gid, |_| Ok(()))
    }

    fn mkdir(
        &self,
        parent: InodeNumber,
        name: &OsStr,
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<InodeAttr> {
        logged(
            "mkdir",
            parent,
            self.make_node(
                parent,
                name.as_encoded_bytes(),
                FileType::Directory,
                Ownership::new(mode, uid, gid),
                |_| Ok(()),
            ),
        )
    }

    fn unlink(&self, parent: InodeNumber, name: &OsStr) -> Result<()> {
        logged("unlink", parent, self.remove_file(parent, name.as_encoded_bytes()))
    }

    fn rmdir(&self, parent: InodeNumber, name: &OsStr) -> Result<()> {
        logged("rmdir", parent, self.remove_dir(parent, name.as_encoded_bytes()))
    }

    fn link(&self, source: InodeNumber, parent: InodeNumber, name: &OsStr) -> Result<InodeAttr> {
        logged(
            "link",
            parent,
            self.link_file(source, parent, name.as_encoded_bytes()),
        )
    }

    fn read(&self, handle: InodeHandle, offset: u64, size: u32) -> Result<Vec<u8>> {
        logged("read", handle.ino, self.read_file(handle, offset, size))
    }

    fn write(&self, handle: InodeHandle, offset: u64, data: &[u8]) -> Result<u32> {
        logged("write", handle.ino, self.write_file(handle, offset, data))
    }

    fn statfs(&self) -> FsStats {
        FsStats {
            root_ino: self.table.root(),
            total_inodes: self.table.capacity(),
            free_inodes: self.table.count_free(),
            dir_capacity: self.config.dir_capacity,
            file_capacity: self.config.file_capacity,
        }
    }

    fn evict(&self, handle: InodeHandle) {
        self.reclaim(handle);
    }
}
