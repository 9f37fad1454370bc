//! Ring configuration and cursor arithmetic.
//!
//! Cursors are monotonically increasing `u64` positions. A cursor maps to a
//! physical slot by `cursor % capacity` and to a *lap* (how many times the
//! ring has been wrapped) by `cursor / capacity`. The lap is what lets a slot
//! tell apart "ready for this claim" from "ready for a claim one lap ago".

use std::time::{Duration, Instant};

/// How a claimant waits for a specific slot to change state.
///
/// Semaphores only say that *some* slot is available; waiting for *this*
/// slot is a bounded-sleep poll. `quantum` is the sleep between checks and
/// `timeout`, when set, caps the total wait.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadyPoll {
    pub quantum: Duration,
    pub timeout: Option<Duration>,
}

impl Default for ReadyPoll {
    fn default() -> Self {
        ReadyPoll {
            quantum: Duration::from_micros(1),
            timeout: None,
        }
    }
}

impl ReadyPoll {
    pub fn new(quantum: Duration, timeout: Option<Duration>) -> Self {
        ReadyPoll { quantum, timeout }
    }

    /// Polls `done` until it returns true.
    ///
    /// Returns `Err(waited)` once `timeout` has elapsed without success.
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) -> Result<(), Duration> {
        if done() {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            if self.quantum.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.quantum);
            }

            if done() {
                return Ok(());
            }

            if let Some(limit) = self.timeout {
                let waited = start.elapsed();
                if waited >= limit {
                    return Err(waited);
                }
            }
        }
    }
}

/// Configuration for a shared ring.
#[derive(Debug, Copy, Clone)]
pub struct RingConfig {
    /// Number of slots. Any value from 1 up to `i32::MAX` (the semaphore limit).
    pub capacity: usize,
    pub poll: ReadyPoll,
}

impl RingConfig {
    /// # Panics
    /// Panics if `capacity` is zero.
    ///
    /// # Example
    /// ```
    /// use relay_icc::RingConfig;
    /// let cfg = RingConfig::new(1024);
    /// assert_eq!(cfg.capacity, 1024);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        Self {
            capacity,
            poll: ReadyPoll::default(),
        }
    }

    pub fn with_poll(mut self, poll: ReadyPoll) -> Self {
        self.poll = poll;
        self
    }
}

/// Physical slot index of `seq`.
///
/// ```text
/// capacity = 3
/// seq = 0 → 0, seq = 2 → 2, seq = 3 → 0 (wraps), seq = 7 → 1
/// ```
#[inline(always)]
pub fn seq_to_index(seq: u64, capacity: u64) -> u64 {
    seq % capacity
}

/// Number of full wraps of the ring before `seq`.
#[inline(always)]
pub fn seq_to_lap(seq: u64, capacity: u64) -> u64 {
    seq / capacity
}
