//! Inode table: one lock-protected slot per id plus the allocation bitmap.
//!
//! ## Locking
//!
//! Each slot is its own `RwLock`; the bitmap sits behind a single `Mutex`.
//! Callers acquire locks in the order parent directory → child → bitmap and
//! never hold a slot lock across operations.

use crate::config::FsConfig;
use parking_lot::{Mutex, RwLock};
use vtfs_alloc::InodeBitmap;
use vtfs_error::{Result, VtfsError};
use vtfs_inode::InodeRecord;
use vtfs_types::{Generation, InodeHandle, InodeNumber};

/// Contents of one table slot.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) generation: Generation,
    pub(crate) record: Option<InodeRecord>,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            generation: Generation::NONE,
            record: None,
        }
    }

    /// Place a fresh record in the slot, starting a new generation.
    pub(crate) fn install(&mut self, record: InodeRecord) -> Generation {
        self.generation = self.generation.next();
        self.record = Some(record);
        self.generation
    }

    /// Clear the record. The generation is left as is so outstanding
    /// handles keep failing once the slot is reused.
    pub(crate) fn clear(&mut self) -> Option<InodeRecord> {
        self.record.take()
    }

    pub(crate) fn get(&self, ino: InodeNumber) -> Result<&InodeRecord> {
        self.record.as_ref().ok_or(VtfsError::InvalidInode(ino.0))
    }

    pub(crate) fn get_mut(&mut self, ino: InodeNumber) -> Result<&mut InodeRecord> {
        self.record.as_mut().ok_or(VtfsError::InvalidInode(ino.0))
    }

    /// Resolve a handle, rejecting it when the slot was reclaimed or reused.
    pub(crate) fn check(&self, handle: InodeHandle) -> Result<&InodeRecord> {
        match &self.record {
            Some(record) if self.generation == handle.generation => Ok(record),
            _ => Err(VtfsError::StaleHandle(handle.ino.0)),
        }
    }

    pub(crate) fn check_mut(&mut self, handle: InodeHandle) -> Result<&mut InodeRecord> {
        match &mut self.record {
            Some(record) if self.generation == handle.generation => Ok(record),
            _ => Err(VtfsError::StaleHandle(handle.ino.0)),
        }
    }
}

/// Fixed-size inode table covering `root .. root + slots.len()`.
#[derive(Debug)]
pub(crate) struct InodeTable {
    root: InodeNumber,
    slots: Vec<RwLock<Slot>>,
    bitmap: Mutex<InodeBitmap>,
}

impl InodeTable {
    pub(crate) fn new(config: &FsConfig) -> Result<Self> {
        let size = config.table_size().ok_or_else(|| {
            VtfsError::InvalidConfig(format!(
                "inode range {}..{} is empty or too large",
                config.root_ino, config.max_inodes
            ))
        })?;
        let root = InodeNumber(config.root_ino);
        let bitmap = InodeBitmap::new(root, size)?;
        let slots = (0..size).map(|_| RwLock::new(Slot::empty())).collect();
        Ok(Self {
            root,
            slots,
            bitmap: Mutex::new(bitmap),
        })
    }

    pub(crate) fn root(&self) -> InodeNumber {
        self.root
    }

    /// Slot lock for `ino`, or `InvalidInode` when outside the table.
    pub(crate) fn slot(&self, ino: InodeNumber) -> Result<&RwLock<Slot>> {
        ino.0
            .checked_sub(self.root.0)
            .and_then(|rel| usize::try_from(rel).ok())
            .and_then(|idx| self.slots.get(idx))
            .ok_or(VtfsError::InvalidInode(ino.0))
    }

    /// Claim the lowest free id past the root.
    pub(crate) fn allocate(&self) -> Result<InodeNumber> {
        self.bitmap.lock().allocate()
    }

    /// Return an id to the free pool.
    pub(crate) fn release(&self, ino: InodeNumber) -> Result<()> {
        self.bitmap.lock().free(ino)
    }

    /// Total ids, root included.
    pub(crate) fn capacity(&self) -> u32 {
        self.bitmap.lock().capacity()
    }

    pub(crate) fn count_free(&self) -> u32 {
        self.bitmap.lock().count_free()
    }

    /// Snapshot of every allocated id, ascending.
    pub(crate) fn allocated_ids(&self) -> Vec<InodeNumber> {
        self.bitmap.lock().allocated().collect()
    }

    /// Every id the table covers, ascending.
    pub(crate) fn ids(&self) -> impl Iterator<Item = InodeNumber> + '_ {
        (self.root.0..).take(self.slots.len()).map(InodeNumber)
    }
}
