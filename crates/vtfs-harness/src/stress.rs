//! Seeded multi-threaded workload against one mounted instance.
//!
//! Every worker draws operations from its own deterministic generator over
//! a small shared name pool, so creates, links and removals collide across
//! threads. After all workers join, unlinked inodes are evicted and the tree
//! is checked with `verify_integrity`.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};
use vtfs::{
    FsConfig, FsOps, InodeHandle, InodeNumber, IntegrityReport, Vtfs, VtfsError, verify_integrity,
};

/// Stress run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Worker threads.
    pub threads: usize,
    /// Operations each worker executes.
    pub ops_per_thread: u64,
    /// Base seed; worker `t` uses a seed derived from it and `t`.
    pub seed: u64,
    /// Shared working directories created under the root before the run.
    pub work_dirs: usize,
    /// Distinct names workers draw from inside each working directory.
    pub name_pool: usize,
    /// Handles each worker keeps before evicting the oldest.
    pub max_open: usize,
    /// Filesystem under test.
    pub fs: FsConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            ops_per_thread: 10_000,
            seed: 0x5654_4653_0000_0001,
            work_dirs: 4,
            name_pool: 24,
            max_open: 16,
            fs: FsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReport {
    pub seed: u64,
    pub threads: usize,
    pub operations_executed: u64,
    /// Operations issued, by kind.
    pub operation_mix: BTreeMap<String, u64>,
    /// Results observed, by outcome label (`ok` or an error kind).
    pub outcomes: BTreeMap<String, u64>,
    /// Inodes reclaimed by the post-run eviction sweep.
    pub reclaimed_after_run: u64,
    pub free_inodes_after: u32,
    pub integrity: IntegrityReport,
    pub passed: bool,
    pub duration_us: u64,
}

/// Stable label for an outcome, used as a report key.
#[must_use]
pub fn outcome_label<T>(result: &vtfs::Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => match err {
            VtfsError::NotFound(_) => "not_found",
            VtfsError::AlreadyExists => "already_exists",
            VtfsError::DirectoryFull => "directory_full",
            VtfsError::CapacityExhausted => "capacity_exhausted",
            VtfsError::NotADirectory => "not_a_directory",
            VtfsError::IsDirectory => "is_directory",
            VtfsError::NotEmpty => "not_empty",
            VtfsError::OutOfSpace => "out_of_space",
            VtfsError::InvalidInode(_) => "invalid_inode",
            VtfsError::StaleHandle(_) => "stale_handle",
            VtfsError::NameTooLong => "name_too_long",
            VtfsError::InvalidName(_) => "invalid_name",
            VtfsError::NotPermitted => "not_permitted",
            VtfsError::InvalidConfig(_) => "invalid_config",
            VtfsError::Corruption { .. } => "corruption",
        },
    }
}

// ── Deterministic generator ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn next_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive <= 1 {
            return 0;
        }
        let upper = u64::try_from(upper_exclusive).unwrap_or(u64::MAX);
        usize::try_from(self.next_u64() % upper).unwrap_or(0)
    }
}

// ── Worker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Create,
    Mkdir,
    Unlink,
    Rmdir,
    Link,
    Lookup,
    Readdir,
    Write,
    Read,
    Evict,
}

impl OpKind {
    /// Weighted pick; mutations dominate so the tree keeps changing.
    fn pick(rng: &mut DeterministicRng) -> Self {
        match rng.next_usize(100) {
            0..=19 => Self::Create,
            20..=27 => Self::Mkdir,
            28..=41 => Self::Unlink,
            42..=49 => Self::Rmdir,
            50..=57 => Self::Link,
            58..=67 => Self::Lookup,
            68..=71 => Self::Readdir,
            72..=83 => Self::Write,
            84..=93 => Self::Read,
            _ => Self::Evict,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Mkdir => "mkdir",
            Self::Unlink => "unlink",
            Self::Rmdir => "rmdir",
            Self::Link => "link",
            Self::Lookup => "lookup",
            Self::Readdir => "readdir",
            Self::Write => "write",
            Self::Read => "read",
            Self::Evict => "evict",
        }
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    operations: u64,
    operation_mix: BTreeMap<String, u64>,
    outcomes: BTreeMap<String, u64>,
}

impl WorkerTally {
    fn record<T>(&mut self, kind: OpKind, result: &vtfs::Result<T>) {
        self.operations += 1;
        *self.operation_mix.entry(kind.as_str().to_owned()).or_default() += 1;
        *self.outcomes.entry(outcome_label(result).to_owned()).or_default() += 1;
    }

    fn merge_into(self, mix: &mut BTreeMap<String, u64>, outcomes: &mut BTreeMap<String, u64>) {
        for (k, v) in self.operation_mix {
            *mix.entry(k).or_default() += v;
        }
        for (k, v) in self.outcomes {
            *outcomes.entry(k).or_default() += v;
        }
    }
}

struct Worker<'a> {
    fs: &'a Vtfs,
    dirs: &'a [InodeNumber],
    config: &'a StressConfig,
    rng: DeterministicRng,
    open: Vec<InodeHandle>,
    tally: WorkerTally,
}

impl Worker<'_> {
    fn pick_dir(&mut self) -> InodeNumber {
        self.dirs[self.rng.next_usize(self.dirs.len())]
    }

    fn pick_name(&mut self) -> String {
        format!("n{}", self.rng.next_usize(self.config.name_pool))
    }

    fn pick_open(&mut self) -> Option<InodeHandle> {
        if self.open.is_empty() {
            None
        } else {
            Some(self.open[self.rng.next_usize(self.open.len())])
        }
    }

    fn remember(&mut self, handle: InodeHandle) {
        if self.open.len() >= self.config.max_open {
            let oldest = self.open.remove(0);
            self.fs.evict(oldest);
        }
        self.open.push(handle);
    }

    fn step(&mut self) {
        let kind = OpKind::pick(&mut self.rng);
        let dir = self.pick_dir();
        let name = self.pick_name();
        let name = OsStr::new(&name);
        match kind {
            OpKind::Create => {
                let result = self.fs.create(dir, name, 0o644, 0, 0);
                self.tally.record(kind, &result);
                if let Ok(attr) = result {
                    self.remember(attr.handle());
                }
            }
            OpKind::Mkdir => {
                // Only ever one level below a working directory, so a later
                // rmdir of the same name can empty it again.
                let result = self.fs.mkdir(dir, name, 0o755, 0, 0);
                self.tally.record(kind, &result);
            }
            OpKind::Unlink => {
                let result = self.fs.unlink(dir, name);
                self.tally.record(kind, &result);
            }
            OpKind::Rmdir => {
                let result = self.fs.rmdir(dir, name);
                self.tally.record(kind, &result);
            }
            OpKind::Link => {
                if let Some(handle) = self.pick_open() {
                    let result = self.fs.link(handle.ino, dir, name);
                    self.tally.record(kind, &result);
                }
            }
            OpKind::Lookup => {
                let result = self.fs.lookup(dir, name);
                self.tally.record(kind, &result);
            }
            OpKind::Readdir => {
                let result = self.fs.readdir(dir, 0);
                self.tally.record(kind, &result);
            }
            OpKind::Write => {
                if let Some(handle) = self.pick_open() {
                    let cap = self.config.fs.file_capacity;
                    let offset = self.rng.next_usize(cap + cap / 8);
                    let len = self.rng.next_usize(cap / 4 + 1);
                    let fill = u8::try_from(self.rng.next_usize(256)).unwrap_or(0);
                    let data = vec![fill; len];
                    let result = self.fs.write(handle, offset as u64, &data);
                    self.tally.record(kind, &result);
                }
            }
            OpKind::Read => {
                if let Some(handle) = self.pick_open() {
                    let offset = self.rng.next_usize(self.config.fs.file_capacity);
                    let result = self.fs.read(handle, offset as u64, 512);
                    self.tally.record(kind, &result);
                }
            }
            OpKind::Evict => {
                if !self.open.is_empty() {
                    let idx = self.rng.next_usize(self.open.len());
                    let handle = self.open.swap_remove(idx);
                    self.fs.evict(handle);
                    self.tally.record::<()>(kind, &Ok(()));
                }
            }
        }
    }

    fn run(mut self) -> WorkerTally {
        for _ in 0..self.config.ops_per_thread {
            self.step();
        }
        for handle in self.open.drain(..) {
            self.fs.evict(handle);
        }
        self.tally
    }
}

/// Evict every allocated inode whose link count reached zero, as a host
/// would once all its references are gone.
fn sweep_unlinked(fs: &Vtfs) -> u64 {
    let config = fs.config();
    let mut reclaimed = 0;
    for raw in config.root_ino + 1..config.max_inodes {
        if let Ok(attr) = fs.getattr(InodeNumber(raw)) {
            if attr.nlink == 0 {
                fs.evict(attr.handle());
                reclaimed += 1;
            }
        }
    }
    reclaimed
}

/// Run the workload and check the resulting tree.
pub fn run_stress(config: &StressConfig) -> Result<StressReport> {
    if config.threads == 0 {
        bail!("threads must be greater than zero");
    }
    if config.work_dirs == 0 || config.name_pool == 0 {
        bail!("work_dirs and name_pool must be greater than zero");
    }

    let fs = Vtfs::mount(config.fs.clone())?;
    let root = fs.root();
    let mut dirs = Vec::with_capacity(config.work_dirs);
    for i in 0..config.work_dirs {
        let name = format!("w{i}");
        dirs.push(fs.mkdir(root, OsStr::new(&name), 0o755, 0, 0)?.ino);
    }
    info!(
        threads = config.threads,
        ops_per_thread = config.ops_per_thread,
        seed = config.seed,
        "stress run starting"
    );

    let start = Instant::now();
    let tallies: Vec<WorkerTally> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let worker = Worker {
                    fs: &fs,
                    dirs: &dirs,
                    config,
                    rng: DeterministicRng::new(config.seed.wrapping_add(t as u64)),
                    open: Vec::new(),
                    tally: WorkerTally::default(),
                };
                s.spawn(move || worker.run())
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect()
    });
    let duration = start.elapsed();
    if tallies.len() != config.threads {
        bail!(
            "{} of {} stress workers panicked",
            config.threads - tallies.len(),
            config.threads
        );
    }

    let mut operation_mix = BTreeMap::new();
    let mut outcomes = BTreeMap::new();
    let mut operations_executed = 0;
    for tally in tallies {
        operations_executed += tally.operations;
        tally.merge_into(&mut operation_mix, &mut outcomes);
    }

    let reclaimed_after_run = sweep_unlinked(&fs);
    let integrity = verify_integrity(&fs);
    let corruptions = outcomes.get("corruption").copied().unwrap_or(0);
    let passed = integrity.is_clean() && corruptions == 0;
    let free_inodes_after = fs.statfs().free_inodes;
    debug!(
        operations_executed,
        reclaimed_after_run, free_inodes_after, passed, "stress run finished"
    );
    fs.unmount();

    Ok(StressReport {
        seed: config.seed,
        threads: config.threads,
        operations_executed,
        operation_mix,
        outcomes,
        reclaimed_after_run,
        free_inodes_after,
        integrity,
        passed,
        duration_us: u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
    })
}
