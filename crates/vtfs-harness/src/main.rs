#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use vtfs::FsConfig;
use vtfs_harness::{StressConfig, run_scenario, run_stress};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("stress") => run_stress_cmd(&args[1..]),
        Some("scenario") => {
            let report = run_scenario()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn load_fs_config(path: &Path) -> Result<FsConfig> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config: FsConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok(config)
}

fn run_stress_cmd(args: &[String]) -> Result<()> {
    let mut config = StressConfig::default();
    let mut index = 0_usize;
    while index < args.len() {
        match args[index].as_str() {
            "--threads" => {
                let raw = args.get(index + 1).context("--threads requires a value")?;
                config.threads = raw.parse().context("invalid --threads value")?;
                index += 2;
            }
            "--ops" => {
                let raw = args.get(index + 1).context("--ops requires a value")?;
                config.ops_per_thread = raw.parse().context("invalid --ops value")?;
                index += 2;
            }
            "--seed" => {
                let raw = args.get(index + 1).context("--seed requires a value")?;
                config.seed = raw.parse().context("invalid --seed value")?;
                index += 2;
            }
            "--names" => {
                let raw = args.get(index + 1).context("--names requires a value")?;
                config.name_pool = raw.parse().context("invalid --names value")?;
                index += 2;
            }
            "--config" => {
                let raw = args.get(index + 1).context("--config requires a value")?;
                config.fs = load_fs_config(Path::new(raw))?;
                index += 2;
            }
            other => {
                bail!("unknown stress option: {other}");
            }
        }
    }

    let report = run_stress(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        bail!(
            "stress run left {} integrity violation(s)",
            report.integrity.violations.len()
        );
    }
    Ok(())
}

fn print_usage() {
    println!("vtfs-harness: workload driver for the VTFS engine");
    println!();
    println!("USAGE:");
    println!("  vtfs-harness stress [--threads N] [--ops N] [--seed S] [--names N] [--config FILE]");
    println!("  vtfs-harness scenario");
    println!();
    println!("STRESS:");
    println!("  Runs a seeded mix of create/mkdir/unlink/rmdir/link/read/write/evict across");
    println!("  N threads, then evicts unlinked inodes and checks the tree. FILE is a JSON");
    println!("  FsConfig; omitted fields keep their defaults.");
    println!();
    println!("SCENARIO:");
    println!("  Mounts, builds /a/f.txt, round-trips data, tears it down and checks counts.");
    println!();
    println!("Set RUST_LOG (e.g. RUST_LOG=vtfs_core=debug) for engine tracing on stderr.");
}
