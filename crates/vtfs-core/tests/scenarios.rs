#![forbid(unsafe_code)]
//! End-to-end operation sequences against a freshly mounted instance.
//!
//! Scenarios tested:
//! 1. mkdir / create / write / read / unlink / rmdir walk-through.
//! 2. Duplicate create leaves the directory unchanged.
//! 3. Table exhaustion adds no entry and leaks no id.
//! 4. Hard links share one inode and count independently.
//! 5. rmdir emptiness boundary.
//! 6. Id reuse after eviction invalidates old handles.

use std::ffi::OsStr;
use vtfs_core::{
    FileType, FsConfig, FsOps, InodeNumber, ReaddirEntry, Vtfs, VtfsError, verify_integrity,
};

fn name(s: &str) -> &OsStr {
    OsStr::new(s)
}

fn entry_count(fs: &Vtfs, dir: InodeNumber) -> usize {
    fs.readdir(dir, 0).expect("readdir").len()
}

fn listing(fs: &Vtfs, dir: InodeNumber) -> Vec<String> {
    fs.readdir(dir, 0)
        .expect("readdir")
        .iter()
        .map(ReaddirEntry::name_str)
        .collect()
}

fn assert_clean(fs: &Vtfs) {
    let report = verify_integrity(fs);
    assert!(report.is_clean(), "integrity violations: {:?}", report.violations);
}

// ---------------------------------------------------------------------------
// Scenario 1: basic lifecycle
// ---------------------------------------------------------------------------

#[test]
fn mkdir_create_write_read_unlink_rmdir() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    assert_eq!(entry_count(&fs, root), 2);

    let a = fs.mkdir(root, name("a"), 0o755, 0, 0).expect("mkdir a");
    assert_eq!(a.kind(), FileType::Directory);
    assert_eq!(a.nlink, 2);
    assert_eq!(entry_count(&fs, root), 3);
    assert_eq!(fs.getattr(root).unwrap().nlink, 3);
    assert_eq!(listing(&fs, a.ino), vec![".", ".."]);

    let f = fs.create(a.ino, name("f.txt"), 0o644, 1000, 1000).expect("create");
    assert_eq!(entry_count(&fs, a.ino), 3);
    assert_eq!(fs.write(f.handle(), 0, b"hello").unwrap(), 5);
    assert_eq!(fs.read(f.handle(), 0, 5).unwrap(), b"hello");
    assert_eq!(fs.read(f.handle(), 0, 4096).unwrap(), b"hello");
    assert!(fs.read(f.handle(), 5, 10).unwrap().is_empty());
    assert_eq!(fs.getattr(f.ino).unwrap().size, 5);
    assert_eq!(
        fs.lookup(a.ino, name("f.txt")).unwrap().map(|attr| attr.ino),
        Some(f.ino)
    );
    assert_clean(&fs);

    fs.unlink(a.ino, name("f.txt")).expect("unlink");
    assert_eq!(entry_count(&fs, a.ino), 2);
    assert_eq!(fs.lookup(a.ino, name("f.txt")).unwrap(), None);
    fs.evict(f.handle());

    fs.rmdir(root, name("a")).expect("rmdir");
    assert_eq!(entry_count(&fs, root), 2);
    assert_eq!(fs.getattr(root).unwrap().nlink, 2);
    fs.evict(a.handle());

    assert_clean(&fs);
    assert_eq!(fs.statfs().free_inodes, 999);
    fs.unmount();
}

// ---------------------------------------------------------------------------
// Scenario 2: duplicate names
// ---------------------------------------------------------------------------

#[test]
fn duplicate_create_is_rejected() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    let first = fs.create(root, name("x"), 0o644, 0, 0).unwrap();
    let free = fs.statfs().free_inodes;

    assert_eq!(fs.create(root, name("x"), 0o644, 0, 0), Err(VtfsError::AlreadyExists));
    assert_eq!(fs.mkdir(root, name("x"), 0o755, 0, 0), Err(VtfsError::AlreadyExists));
    assert_eq!(entry_count(&fs, root), 3);
    assert_eq!(fs.statfs().free_inodes, free);
    assert_eq!(fs.lookup(root, name("x")).unwrap().unwrap().ino, first.ino);
}

#[test]
fn names_are_case_sensitive() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    let lower = fs.create(root, name("readme"), 0o644, 0, 0).unwrap();
    let upper = fs.create(root, name("README"), 0o644, 0, 0).unwrap();
    assert_ne!(lower.ino, upper.ino);
    assert_eq!(fs.lookup(root, name("readme")).unwrap().unwrap().ino, lower.ino);
    assert_eq!(fs.lookup(root, name("readm")).unwrap(), None);
}

// ---------------------------------------------------------------------------
// Scenario 3: table exhaustion
// ---------------------------------------------------------------------------

#[test]
fn creates_beyond_table_capacity_fail_cleanly() {
    // Ids 1001..=1004 are allocatable; directory room is ample.
    let fs = Vtfs::mount(FsConfig {
        max_inodes: 1005,
        ..FsConfig::default()
    })
    .expect("mount");
    let root = fs.root();
    for i in 0..4 {
        fs.create(root, name(&format!("f{i}")), 0o644, 0, 0)
            .expect("create within capacity");
    }
    assert_eq!(fs.statfs().free_inodes, 0);
    assert_eq!(
        fs.create(root, name("overflow"), 0o644, 0, 0),
        Err(VtfsError::CapacityExhausted)
    );
    assert_eq!(
        fs.mkdir(root, name("overflow"), 0o755, 0, 0),
        Err(VtfsError::CapacityExhausted)
    );
    assert_eq!(entry_count(&fs, root), 6);
    assert_eq!(fs.lookup(root, name("overflow")).unwrap(), None);
    assert_clean(&fs);

    // Freeing one id makes room again.
    let victim = fs.lookup(root, name("f2")).unwrap().unwrap();
    fs.unlink(root, name("f2")).unwrap();
    assert_eq!(
        fs.create(root, name("overflow"), 0o644, 0, 0),
        Err(VtfsError::CapacityExhausted)
    );
    fs.evict(victim.handle());
    let reused = fs.create(root, name("overflow"), 0o644, 0, 0).unwrap();
    assert_eq!(reused.ino, victim.ino);
}

// ---------------------------------------------------------------------------
// Scenario 4: hard links
// ---------------------------------------------------------------------------

#[test]
fn link_and_unlink_counts() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    let sub = fs.mkdir(root, name("sub"), 0o755, 0, 0).unwrap();
    let f = fs.create(root, name("orig"), 0o644, 0, 0).unwrap();
    fs.write(f.handle(), 0, b"shared").unwrap();

    let linked = fs.link(f.ino, sub.ino, name("alias")).unwrap();
    assert_eq!(linked.ino, f.ino);
    assert_eq!(linked.nlink, 2);
    let via_alias = fs.lookup(sub.ino, name("alias")).unwrap().unwrap();
    assert_eq!(via_alias.ino, f.ino);
    assert_eq!(fs.read(via_alias.handle(), 0, 64).unwrap(), b"shared");
    assert_clean(&fs);

    fs.unlink(root, name("orig")).unwrap();
    assert_eq!(fs.getattr(f.ino).unwrap().nlink, 1);
    assert_eq!(fs.lookup(root, name("orig")).unwrap(), None);
    assert_eq!(
        fs.lookup(sub.ino, name("alias")).unwrap().map(|a| a.ino),
        Some(f.ino)
    );
    // Still linked once, so eviction keeps it.
    fs.evict(f.handle());
    assert_eq!(fs.read(f.handle(), 0, 64).unwrap(), b"shared");
    assert_clean(&fs);

    fs.unlink(sub.ino, name("alias")).unwrap();
    assert_eq!(fs.getattr(f.ino).unwrap().nlink, 0);
    fs.evict(f.handle());
    assert_eq!(fs.getattr(f.ino), Err(VtfsError::InvalidInode(f.ino.0)));
    assert_clean(&fs);
}

#[test]
fn link_into_full_directory() {
    let fs = Vtfs::mount(FsConfig {
        dir_capacity: 4,
        ..FsConfig::default()
    })
    .expect("mount");
    let root = fs.root();
    let f = fs.create(root, name("a"), 0o644, 0, 0).unwrap();
    fs.create(root, name("b"), 0o644, 0, 0).unwrap();
    assert_eq!(fs.link(f.ino, root, name("c")), Err(VtfsError::DirectoryFull));
    assert_eq!(fs.getattr(f.ino).unwrap().nlink, 1);
}

// ---------------------------------------------------------------------------
// Scenario 5: rmdir emptiness
// ---------------------------------------------------------------------------

#[test]
fn rmdir_requires_empty_directory() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    let d = fs.mkdir(root, name("d"), 0o755, 0, 0).unwrap();
    fs.create(d.ino, name("inner"), 0o644, 0, 0).unwrap();
    let nested = fs.mkdir(d.ino, name("nested"), 0o755, 0, 0).unwrap();
    assert_eq!(fs.getattr(d.ino).unwrap().nlink, 3);

    assert_eq!(fs.rmdir(root, name("d")), Err(VtfsError::NotEmpty));
    fs.unlink(d.ino, name("inner")).unwrap();
    assert_eq!(fs.rmdir(root, name("d")), Err(VtfsError::NotEmpty));

    fs.rmdir(d.ino, name("nested")).unwrap();
    assert_eq!(fs.getattr(nested.ino).unwrap().nlink, 0);
    assert_eq!(fs.getattr(d.ino).unwrap().nlink, 2);

    fs.rmdir(root, name("d")).unwrap();
    assert_eq!(listing(&fs, root), vec![".", ".."]);
    assert_eq!(fs.getattr(d.ino).unwrap().nlink, 0);
}

#[test]
fn entry_order_survives_removal() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    for n in ["one", "two", "three", "four"] {
        fs.create(root, name(n), 0o644, 0, 0).unwrap();
    }
    fs.unlink(root, name("two")).unwrap();
    assert_eq!(listing(&fs, root), vec![".", "..", "one", "three", "four"]);
}

// ---------------------------------------------------------------------------
// Scenario 6: stale handles
// ---------------------------------------------------------------------------

#[test]
fn stale_handle_after_evict_and_reuse() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let root = fs.root();
    let old = fs.create(root, name("old"), 0o644, 0, 0).unwrap();
    fs.write(old.handle(), 0, b"old data").unwrap();
    fs.unlink(root, name("old")).unwrap();
    fs.evict(old.handle());

    let new = fs.create(root, name("new"), 0o644, 0, 0).unwrap();
    assert_eq!(new.ino, old.ino);
    assert_ne!(new.generation, old.generation);

    assert_eq!(fs.read(old.handle(), 0, 8), Err(VtfsError::StaleHandle(old.ino.0)));
    assert_eq!(
        fs.write(old.handle(), 0, b"clobber"),
        Err(VtfsError::StaleHandle(old.ino.0))
    );
    // A stale evict must not reclaim the new occupant.
    fs.unlink(root, name("new")).unwrap();
    fs.evict(old.handle());
    assert!(fs.getattr(new.ino).is_ok());
    assert!(fs.read(new.handle(), 0, 8).unwrap().is_empty());
}

#[test]
fn handle_outside_table_is_invalid() {
    let fs = Vtfs::mount(FsConfig::default()).expect("mount");
    let mut handle = fs.getattr(fs.root()).unwrap().handle();
    handle.ino = InodeNumber(99_999);
    assert_eq!(fs.read(handle, 0, 1), Err(VtfsError::InvalidInode(99_999)));
    fs.evict(handle);
}
