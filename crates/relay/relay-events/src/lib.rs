#![forbid(unsafe_code)]

pub mod log_record;
pub mod task;

pub use log_record::LogRecord;
pub use task::Task;

/// Reserved payload meaning "no more work". Never produced as data.
pub const SENTINEL: i32 = -1;

// Process identity as seen by the OS. Stable for the lifetime of a role
// process, which is all the provenance fields need.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn current() -> Self {
        ProcessId(std::process::id())
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entries that can carry the termination sentinel through a ring.
///
/// The orchestrator injects one sentinel per consumer it wants to stop; a
/// consumer that pops a sentinel exits without forwarding it.
pub trait Sentinel: Copy {
    fn sentinel(origin: ProcessId) -> Self;

    fn is_sentinel(&self) -> bool;
}
