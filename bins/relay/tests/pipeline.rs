//! End-to-end runs of the `relay` binary: real processes, real rings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Output};

fn shm_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("relay_bin_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn relay(dir: &PathBuf, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_relay"))
        .arg("run")
        .arg("--shm-dir")
        .arg(dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run relay")
}

fn log_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter(|l| l.starts_with("[LOG] "))
        .map(str::to_owned)
        .collect()
}

/// `[LOG] Worker <w> processed <v> produced by <p>` into `(w, v, p)`.
fn parse(line: &str) -> (u32, i32, u32) {
    let f: Vec<&str> = line.split_whitespace().collect();
    assert_eq!(f.len(), 8, "unexpected line: {line}");
    assert_eq!((f[1], f[3], f[5], f[6]), ("Worker", "processed", "produced", "by"));
    (f[2].parse().unwrap(), f[4].parse().unwrap(), f[7].parse().unwrap())
}

fn assert_dir_empty(dir: &PathBuf) {
    let left: Vec<_> = std::fs::read_dir(dir).unwrap().collect();
    assert!(left.is_empty(), "ring files left behind: {left:?}");
}

#[test]
fn single_chain_preserves_order() {
    let dir = shm_dir("order");
    let out = relay(
        &dir,
        &["--capacity=4", "--producers=1", "--workers=1", "--loggers=1", "--values=7,42,99"],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = log_lines(&out);
    let payloads: Vec<i32> = lines.iter().map(|l| parse(l).1).collect();
    assert_eq!(payloads, vec![7, 42, 99]);

    let producers: Vec<u32> = lines.iter().map(|l| parse(l).2).collect();
    assert!(producers.windows(2).all(|w| w[0] == w[1]));
    assert_dir_empty(&dir);
}

#[test]
fn every_task_is_logged_exactly_once() {
    let dir = shm_dir("fanout");
    let values: Vec<String> = (0..100).map(|v| v.to_string()).collect();
    let values = format!("--values={}", values.join(","));
    let out = relay(
        &dir,
        &["--capacity=8", "--producers=3", "--workers=5", "--loggers=2", &values],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = log_lines(&out);
    assert_eq!(lines.len(), 300);

    let mut per_producer: HashMap<u32, Vec<i32>> = HashMap::new();
    for line in &lines {
        let (_, payload, producer) = parse(line);
        per_producer.entry(producer).or_default().push(payload);
    }
    assert_eq!(per_producer.len(), 3);
    for (_, mut payloads) in per_producer {
        payloads.sort_unstable();
        assert_eq!(payloads, (0..100).collect::<Vec<_>>());
    }
    assert_dir_empty(&dir);
}

#[test]
fn capacity_one_still_completes() {
    let dir = shm_dir("cap1");
    let out = relay(
        &dir,
        &["--capacity=1", "--producers=2", "--workers=2", "--loggers=1", "--values=1,2,3,4,5"],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(log_lines(&out).len(), 10);
    assert_dir_empty(&dir);
}

#[test]
fn random_plan_stays_within_bounds() {
    let dir = shm_dir("random");
    let out = relay(
        &dir,
        &[
            "--capacity=16",
            "--producers=2",
            "--workers=2",
            "--loggers=1",
            "--min-tasks=5",
            "--max-tasks=20",
            "--seed=3",
        ],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = log_lines(&out);
    assert!((10..=40).contains(&lines.len()), "got {} lines", lines.len());
    assert!(lines.iter().map(|l| parse(l).1).all(|v| v >= 0));
}

#[test]
fn missing_shm_dir_fails_with_diagnostic() {
    let dir = shm_dir("missing").join("no/such/dir");
    let out = relay(&dir, &["--producers=1", "--workers=1", "--loggers=1", "--values=1"]);

    assert!(!out.status.success());
    assert!(log_lines(&out).is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to set up shared ring"), "stderr: {stderr}");
}

#[test]
fn invalid_configuration_is_rejected() {
    let dir = shm_dir("invalid");
    let out = relay(&dir, &["--workers=0"]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("pool.workers must be at least 1"), "stderr: {stderr}");
}
