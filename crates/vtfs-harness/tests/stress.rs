#![forbid(unsafe_code)]
//! Stress driver runs against small tables so every capacity path is hit.

use vtfs::FsConfig;
use vtfs_harness::{StressConfig, run_scenario, run_stress};

fn tight() -> StressConfig {
    StressConfig {
        threads: 6,
        ops_per_thread: 3_000,
        seed: 42,
        work_dirs: 3,
        name_pool: 12,
        max_open: 8,
        fs: FsConfig {
            root_ino: 1000,
            max_inodes: 1040,
            dir_capacity: 10,
            file_capacity: 256,
        },
    }
}

#[test]
fn stress_run_leaves_consistent_tree() {
    let report = run_stress(&tight()).expect("stress run");
    assert!(
        report.passed,
        "violations: {:?}",
        report.integrity.violations
    );
    assert_eq!(report.operations_executed, report.operation_mix.values().sum::<u64>());
    assert_eq!(report.operations_executed, report.outcomes.values().sum::<u64>());
    assert!(!report.outcomes.contains_key("corruption"));
    assert_eq!(report.integrity.orphans, 0);
    assert!(report.outcomes.get("ok").copied().unwrap_or(0) > 0);
}

#[test]
fn tight_capacities_are_exercised() {
    let report = run_stress(&tight()).expect("stress run");
    for label in ["already_exists", "directory_full", "out_of_space"] {
        assert!(
            report.outcomes.contains_key(label),
            "expected some {label} outcomes, got {:?}",
            report.outcomes
        );
    }
}

#[test]
fn single_thread_runs_are_reproducible() {
    let config = StressConfig {
        threads: 1,
        ..tight()
    };
    let first = run_stress(&config).expect("first run");
    let second = run_stress(&config).expect("second run");
    assert_eq!(first.operation_mix, second.operation_mix);
    assert_eq!(first.outcomes, second.outcomes);
    assert_eq!(first.free_inodes_after, second.free_inodes_after);
}

#[test]
fn report_serializes_to_json() {
    let config = StressConfig {
        threads: 2,
        ops_per_thread: 200,
        ..tight()
    };
    let report = run_stress(&config).expect("stress run");
    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["seed"], 42);
    assert!(json["integrity"]["violations"].as_array().is_some());
}

#[test]
fn scenario_script_passes() {
    let report = run_scenario().expect("scenario");
    assert!(report.passed);
    assert!(report.steps.iter().any(|s| s.op == "rmdir"));
}
