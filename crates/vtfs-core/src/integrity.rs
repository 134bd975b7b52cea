//! Offline consistency check of a mounted instance.
//!
//! Walks the tree from the root and cross-checks it against the inode table
//! and the allocation bitmap. Each slot is snapshotted under its own read
//! lock, one at a time, so the result is only meaningful while no mutations
//! are in flight.

use crate::Vtfs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, error};
use vtfs_dir::{DOT, DOTDOT, RESERVED_ENTRIES};
use vtfs_error::{Result, VtfsError};
use vtfs_inode::{InodePayload, InodeRecord};
use vtfs_types::{FileType, InodeNumber};

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Inode the problem was found at.
    pub ino: u64,
    pub detail: String,
}

/// Outcome of [`verify_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Directories reachable from the root, root included.
    pub directories: u64,
    /// Regular files reachable from the root.
    pub files: u64,
    /// Ids marked allocated in the bitmap.
    pub allocated: u64,
    /// Allocated records no directory references. Legitimate between
    /// unlink/rmdir and eviction.
    pub orphans: u64,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turn the first violation, if any, into a `Corruption` error.
    pub fn ensure_clean(&self) -> Result<()> {
        match self.violations.first() {
            None => Ok(()),
            Some(v) => Err(VtfsError::Corruption {
                ino: v.ino,
                detail: v.detail.clone(),
            }),
        }
    }

    fn flag(&mut self, ino: InodeNumber, detail: String) {
        error!(ino = ino.0, %detail, "integrity violation");
        self.violations.push(Violation { ino: ino.0, detail });
    }
}

/// Check every structural invariant of the tree and the table.
///
/// Never mutates. Verified:
/// - bitmap bits and slot contents agree;
/// - `.` and `..` lead every directory and point at self and parent;
/// - names are unique and entry counts stay within capacity;
/// - every entry names an allocated inode of the tagged kind;
/// - directory link count is 2 + subdirectories, file link count is the
///   number of referencing entries;
/// - file content fits the configured capacity;
/// - unreachable records carry no links.
#[must_use]
pub fn verify_integrity(fs: &Vtfs) -> IntegrityReport {
    let table = &fs.table;
    let mut report = IntegrityReport::default();

    let mut records: BTreeMap<InodeNumber, InodeRecord> = BTreeMap::new();
    for ino in table.ids() {
        if let Ok(lock) = table.slot(ino) {
            if let Some(record) = &lock.read().record {
                records.insert(ino, record.clone());
            }
        }
    }
    let allocated: BTreeSet<InodeNumber> = table.allocated_ids().into_iter().collect();
    report.allocated = allocated.len() as u64;

    for ino in table.ids() {
        match (allocated.contains(&ino), records.contains_key(&ino)) {
            (true, false) => report.flag(ino, "allocated id has no record".to_owned()),
            (false, true) => report.flag(ino, "free id still holds a record".to_owned()),
            _ => {}
        }
    }

    let root = table.root();
    let mut dirs_seen: HashSet<InodeNumber> = HashSet::new();
    let mut file_refs: HashMap<InodeNumber, u32> = HashMap::new();
    let mut queue = VecDeque::from([(root, root)]);

    while let Some((ino, parent)) = queue.pop_front() {
        if !dirs_seen.insert(ino) {
            report.flag(ino, "directory reachable by more than one path".to_owned());
            continue;
        }
        let Some(record) = records.get(&ino) else {
            report.flag(ino, "reachable directory has no record".to_owned());
            continue;
        };
        let InodePayload::Directory(dir) = record.payload() else {
            report.flag(ino, "entry tagged directory names a file".to_owned());
            continue;
        };
        report.directories += 1;

        let entries = dir.entries();
        if dir.len() > dir.capacity() {
            report.flag(
                ino,
                format!("{} entries exceed capacity {}", dir.len(), dir.capacity()),
            );
        }
        let dots_ok = entries.len() >= RESERVED_ENTRIES
            && entries[0].name() == DOT
            && entries[0].ino == ino
            && entries[1].name() == DOTDOT
            && entries[1].ino == parent;
        if !dots_ok {
            report.flag(ino, "missing or misdirected . / .. entries".to_owned());
        }

        let mut names: HashSet<&[u8]> = HashSet::new();
        for entry in entries {
            if !names.insert(entry.name()) {
                report.flag(ino, format!("duplicate entry {:?}", entry.name_str()));
            }
        }

        for entry in entries.iter().skip(RESERVED_ENTRIES) {
            match records.get(&entry.ino) {
                None => report.flag(
                    ino,
                    format!("entry {:?} points at free inode {}", entry.name_str(), entry.ino),
                ),
                Some(child) if child.kind() != entry.kind => report.flag(
                    ino,
                    format!("entry {:?} kind disagrees with inode {}", entry.name_str(), entry.ino),
                ),
                Some(_) => match entry.kind {
                    FileType::Directory => queue.push_back((entry.ino, ino)),
                    FileType::RegularFile => *file_refs.entry(entry.ino).or_default() += 1,
                },
            }
        }

        let expected = 2 + dir.subdirectory_count();
        if usize::try_from(record.nlink).ok() != Some(expected) {
            report.flag(
                ino,
                format!("directory nlink {} but expected {expected}", record.nlink),
            );
        }
    }

    for (&ino, &refs) in &file_refs {
        report.files += 1;
        if let Some(record) = records.get(&ino) {
            if record.nlink != refs {
                report.flag(
                    ino,
                    format!("file nlink {} but {refs} entries reference it", record.nlink),
                );
            }
        }
    }

    for (&ino, record) in &records {
        if let InodePayload::File(buf) = record.payload() {
            if buf.len() > fs.config.file_capacity {
                report.flag(
                    ino,
                    format!(
                        "file length {} exceeds capacity {}",
                        buf.len(),
                        fs.config.file_capacity
                    ),
                );
            }
        }
        let reachable = dirs_seen.contains(&ino) || file_refs.contains_key(&ino);
        if !reachable {
            report.orphans += 1;
            if record.nlink > 0 {
                report.flag(
                    ino,
                    format!("unreachable inode still has nlink {}", record.nlink),
                );
            }
        }
    }

    debug!(
        directories = report.directories,
        files = report.files,
        allocated = report.allocated,
        orphans = report.orphans,
        violations = report.violations.len(),
        "integrity scan complete"
    );
    report
}
