//! Mount-time configuration.

use serde::{Deserialize, Serialize};
use vtfs_dir::RESERVED_ENTRIES;
use vtfs_error::{Result, VtfsError};

/// Default id of the root directory.
pub const DEFAULT_ROOT_INO: u64 = 1000;
/// Default exclusive upper bound of the inode id range.
pub const DEFAULT_MAX_INODES: u64 = 2000;
/// Default directory capacity, counting `.` and `..`.
pub const DEFAULT_DIR_CAPACITY: usize = 100;
/// Default per-file content capacity in bytes.
pub const DEFAULT_FILE_CAPACITY: usize = 4096;

/// Capacities and id range for one mounted instance.
///
/// Missing fields in a serialized config fall back to the defaults, so a
/// JSON file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Id of the root directory; the first id of the table.
    pub root_ino: u64,
    /// Exclusive upper bound of the id range.
    pub max_inodes: u64,
    /// Maximum entries per directory, including `.` and `..`.
    pub dir_capacity: usize,
    /// Maximum content length of a regular file.
    pub file_capacity: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root_ino: DEFAULT_ROOT_INO,
            max_inodes: DEFAULT_MAX_INODES,
            dir_capacity: DEFAULT_DIR_CAPACITY,
            file_capacity: DEFAULT_FILE_CAPACITY,
        }
    }
}

impl FsConfig {
    /// Reject configurations that cannot describe a usable filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.root_ino == 0 {
            return Err(VtfsError::InvalidConfig("root_ino must be non-zero".to_owned()));
        }
        if self.max_inodes <= self.root_ino {
            return Err(VtfsError::InvalidConfig(format!(
                "max_inodes ({}) must exceed root_ino ({})",
                self.max_inodes, self.root_ino
            )));
        }
        if self.table_size().is_none() {
            return Err(VtfsError::InvalidConfig(format!(
                "inode range {}..{} is too large",
                self.root_ino, self.max_inodes
            )));
        }
        if self.dir_capacity < RESERVED_ENTRIES {
            return Err(VtfsError::InvalidConfig(format!(
                "dir_capacity ({}) must hold . and ..",
                self.dir_capacity
            )));
        }
        if self.file_capacity == 0 {
            return Err(VtfsError::InvalidConfig(
                "file_capacity must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Number of table slots, root included, when it fits in `u32`.
    #[must_use]
    pub fn table_size(&self) -> Option<u32> {
        let span = self.max_inodes.checked_sub(self.root_ino)?;
        u32::try_from(span).ok()
    }
}
