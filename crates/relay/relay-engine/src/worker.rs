use relay_events::{LogRecord, ProcessId, Sentinel, Task};
use relay_icc::{RingError, SharedRing};
use tracing::info;

/// Moves tasks from the task ring to the log ring.
///
/// A worker performs no I/O on its consumption path; everything it learns
/// goes to the log ring for a logger to write out.
pub struct Worker<'a> {
    tasks: &'a SharedRing<Task>,
    logs: &'a SharedRing<LogRecord>,
    id: ProcessId,
}

impl<'a> Worker<'a> {
    pub fn new(tasks: &'a SharedRing<Task>, logs: &'a SharedRing<LogRecord>, id: ProcessId) -> Self {
        Worker { tasks, logs, id }
    }

    /// Runs until a sentinel is consumed. The sentinel is not forwarded.
    /// Returns the number of tasks forwarded.
    pub fn run(&mut self) -> Result<u64, RingError> {
        let mut processed: u64 = 0;
        loop {
            let claim = self.tasks.wait_ready(self.tasks.claim_read()?)?;
            let task = self.tasks.consume(claim)?;

            if task.is_sentinel() {
                break;
            }

            let claim = self.logs.claim_write()?;
            self.logs.publish(claim, LogRecord::processed(&task, self.id))?;
            processed += 1;
        }

        info!(worker = %self.id, processed, "worker stopped on sentinel");
        Ok(processed)
    }
}
