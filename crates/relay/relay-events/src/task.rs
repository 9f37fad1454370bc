use crate::{ProcessId, SENTINEL, Sentinel};

/// Unit of work published by a producer into the task ring.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Task {
    pub producer: ProcessId,
    pub payload: i32,
}

impl Task {
    #[inline]
    pub fn new(producer: ProcessId, payload: i32) -> Self {
        Task { producer, payload }
    }
}

impl Sentinel for Task {
    #[inline]
    fn sentinel(origin: ProcessId) -> Self {
        Task::new(origin, SENTINEL)
    }

    #[inline]
    fn is_sentinel(&self) -> bool {
        self.payload == SENTINEL
    }
}
