use crate::{ProcessId, SENTINEL, Sentinel, Task};
use std::fmt;

/// A processed task on its way to a logger.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LogRecord {
    pub worker: ProcessId,
    pub producer: ProcessId,
    pub payload: i32,
}

impl LogRecord {
    /// Stamp `task` with the identity of the worker that handled it.
    #[inline]
    pub fn processed(task: &Task, worker: ProcessId) -> Self {
        LogRecord {
            worker,
            producer: task.producer,
            payload: task.payload,
        }
    }
}

impl Sentinel for LogRecord {
    #[inline]
    fn sentinel(origin: ProcessId) -> Self {
        LogRecord {
            worker: origin,
            producer: origin,
            payload: SENTINEL,
        }
    }

    #[inline]
    fn is_sentinel(&self) -> bool {
        self.payload == SENTINEL
    }
}

// One logger line. Tests and downstream tooling parse this layout.
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[LOG] Worker {} processed {} produced by {}",
            self.worker, self.payload, self.producer
        )
    }
}
