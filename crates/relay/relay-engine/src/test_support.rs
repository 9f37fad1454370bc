use relay_events::{LogRecord, Task};
use relay_icc::{OwnedRing, RingConfig, SharedRing};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static SEQ: AtomicUsize = AtomicUsize::new(0);

fn temp_path(tag: &str) -> PathBuf {
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("relay_engine_{tag}_{}_{n}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

pub fn task_ring(tag: &str, capacity: usize) -> OwnedRing<Task> {
    SharedRing::create(temp_path(tag), RingConfig::new(capacity)).expect("failed to create task ring")
}

pub fn log_ring(tag: &str, capacity: usize) -> OwnedRing<LogRecord> {
    SharedRing::create(temp_path(tag), RingConfig::new(capacity)).expect("failed to create log ring")
}
