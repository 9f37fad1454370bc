use crate::error::RoleError;
use relay_events::{LogRecord, Sentinel};
use relay_icc::SharedRing;
use std::io::Write;
use tracing::info;

/// Drains the log ring into `sink`, one line per record.
///
/// The only role that performs I/O.
pub struct Logger<'a, W: Write> {
    logs: &'a SharedRing<LogRecord>,
    sink: W,
}

impl<'a, W: Write> Logger<'a, W> {
    pub fn new(logs: &'a SharedRing<LogRecord>, sink: W) -> Self {
        Logger { logs, sink }
    }

    /// Runs until a sentinel is consumed. Returns the number of lines written.
    pub fn run(&mut self) -> Result<u64, RoleError> {
        let mut written: u64 = 0;
        loop {
            let record = self.logs.pop()?;
            if record.is_sentinel() {
                break;
            }
            writeln!(self.sink, "{record}")?;
            written += 1;
        }
        self.sink.flush()?;

        info!(written, "logger stopped on sentinel");
        Ok(written)
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}
