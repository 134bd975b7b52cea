#![forbid(unsafe_code)]
//! Test tooling for VTFS: a path resolver built on `lookup`, the canonical
//! walk-through scenario as a checked script, and a seeded concurrent stress
//! driver.

pub mod stress;

pub use stress::{StressConfig, StressReport, outcome_label, run_stress};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use vtfs::{FileType, FsConfig, FsOps, InodeAttr, Vtfs, VtfsError, verify_integrity};

/// Walk a `/`-separated path from the root, one `lookup` per component,
/// the way a host VFS does.
///
/// Empty components (leading, trailing or doubled slashes) are skipped.
/// Returns `Ok(None)` as soon as a component is absent.
pub fn resolve_path<F: FsOps + ?Sized>(fs: &F, path: &str) -> vtfs::Result<Option<InodeAttr>> {
    let mut current = fs.getattr(fs.root())?;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if current.kind() != FileType::Directory {
            return Err(VtfsError::NotADirectory);
        }
        match fs.lookup(current.ino, OsStr::new(component))? {
            Some(attr) => current = attr,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// One checked step of [`run_scenario`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub op: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub steps: Vec<ScenarioStep>,
    pub passed: bool,
}

struct Script {
    steps: Vec<ScenarioStep>,
}

impl Script {
    fn step(&mut self, op: &str, detail: String) {
        self.steps.push(ScenarioStep {
            op: op.to_owned(),
            detail,
        });
    }
}

fn entry_count(fs: &Vtfs, attr: &InodeAttr) -> Result<usize> {
    Ok(fs.readdir(attr.ino, 0)?.len())
}

/// Mount, build `/a/f.txt`, write and read it back, then tear it down,
/// checking entry counts and the integrity report at every stage.
pub fn run_scenario() -> Result<ScenarioReport> {
    let fs = Vtfs::mount(FsConfig::default()).context("mount")?;
    let mut script = Script { steps: Vec::new() };

    let root = fs.getattr(fs.root())?;
    ensure!(entry_count(&fs, &root)? == 2, "fresh root must hold . and ..");
    script.step("mount", format!("root={} nlink={}", root.ino, root.nlink));

    let a = fs
        .mkdir(root.ino, OsStr::new("a"), 0o755, 0, 0)
        .context("mkdir /a")?;
    ensure!(entry_count(&fs, &root)? == 3, "root should hold 3 entries after mkdir");
    script.step("mkdir", format!("/a ino={} nlink={}", a.ino, a.nlink));

    let f = fs
        .create(a.ino, OsStr::new("f.txt"), 0o644, 0, 0)
        .context("create /a/f.txt")?;
    script.step("create", format!("/a/f.txt ino={}", f.ino));

    let written = fs.write(f.handle(), 0, b"hello").context("write")?;
    ensure!(written == 5, "write returned {written}, expected 5");
    let data = fs.read(f.handle(), 0, 5).context("read")?;
    ensure!(data == b"hello", "read back {:?}", String::from_utf8_lossy(&data));
    script.step("write+read", format!("{written} bytes round-tripped"));

    let resolved = resolve_path(&fs, "/a/f.txt")?.context("/a/f.txt did not resolve")?;
    ensure!(resolved.ino == f.ino, "path resolved to the wrong inode");
    script.step("resolve", format!("/a/f.txt -> {}", resolved.ino));

    verify_integrity(&fs).ensure_clean()?;

    match fs.create(a.ino, OsStr::new("f.txt"), 0o644, 0, 0) {
        Err(VtfsError::AlreadyExists) => {}
        other => bail!("duplicate create returned {other:?}"),
    }
    ensure!(entry_count(&fs, &a)? == 3, "duplicate create changed /a");
    script.step("create", "duplicate /a/f.txt rejected".to_owned());

    fs.unlink(a.ino, OsStr::new("f.txt")).context("unlink")?;
    ensure!(entry_count(&fs, &a)? == 2, "/a should be back to 2 entries");
    fs.evict(f.handle());
    script.step("unlink", "/a/f.txt removed and evicted".to_owned());

    fs.rmdir(root.ino, OsStr::new("a")).context("rmdir")?;
    ensure!(entry_count(&fs, &root)? == 2, "root should be back to 2 entries");
    fs.evict(a.handle());
    script.step("rmdir", "/a removed and evicted".to_owned());

    let report = verify_integrity(&fs);
    report.ensure_clean()?;
    ensure!(report.orphans == 0, "{} orphans left behind", report.orphans);
    let stats = fs.statfs();
    ensure!(
        stats.free_inodes == stats.total_inodes - 1,
        "ids leaked: {} free of {}",
        stats.free_inodes,
        stats.total_inodes
    );
    script.step("verify", format!("{} free inodes", stats.free_inodes));
    fs.unmount();

    Ok(ScenarioReport {
        steps: script.steps,
        passed: true,
    })
}
