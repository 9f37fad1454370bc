//! Multi-producer, multi-consumer bounded ring over shared memory.
//!
//! Any number of processes (or threads) may write and read concurrently.
//! There is no lock anywhere on the path; coordination uses:
//!
//! - two process-shared counting semaphores for capacity accounting
//!   (`empty` starts at `capacity`, `full` at 0),
//! - atomic fetch-and-increment on the write and read cursors, so every
//!   claimant receives a unique cursor,
//! - a per-slot readiness turn (see `slot`), polled with a short sleep.
//!
//! # Write protocol
//! 1. `claim_write`: wait on `empty`, take the next write cursor.
//! 2. `publish`: wait until the slot is vacant for the claim's lap, store the
//!    value, full fence, mark ready, post `full`.
//!
//! # Read protocol
//! 1. `claim_read`: wait on `full`, take the next read cursor.
//! 2. `wait_ready`: `full` was posted by *some* writer, not necessarily the
//!    one holding this cursor, so poll this slot until it is ready.
//! 3. `consume`: copy the value, full fence, mark vacant, post `empty`.
//!
//! # Failed slot operations
//! A claim has already advanced a cursor and spent a permit. When `publish`,
//! `wait_ready` or `consume` cannot complete, the claim comes back inside
//! the error ([`RingError::into_claim`]) and can be retried. A claim that is
//! dropped instead strands its slot.
//!
//! # Ownership
//! [`SharedRing::create`] returns an [`OwnedRing`]: the creator destroys the
//! semaphores and unlinks the backing file on drop. Every other participant
//! attaches with [`SharedRing::open`] and only unmaps.

use crate::error::RingError;
use crate::ring::{ReadyPoll, RingConfig, seq_to_index, seq_to_lap};
use crate::shm_layout::{
    Cursor, MAX_CAPACITY, RING_MAGIC, RING_VERSION, RingHeader, bytes_for_ring, slots_offset,
};
use crate::semaphore::SharedSemaphore;
use crate::slot::ReadySlot;
use relay_mmap::SharedFile;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::path::Path;
use std::ptr;
use std::sync::atomic::Ordering;

/// A claimed cursor and the physical slot it maps to.
///
/// Claims are handed out exactly once and are spent by a successful
/// `publish` or `consume`, so a claim cannot be used twice.
#[must_use = "a claim holds a ring permit until it is published or consumed"]
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    cursor: u64,
    index: usize,
    lap: u64,
}

impl Claim {
    fn new(cursor: u64, capacity: u64) -> Self {
        Claim {
            cursor,
            index: seq_to_index(cursor, capacity) as usize,
            lap: seq_to_lap(cursor, capacity),
        }
    }

    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A process's view of a shared ring of `T`.
///
/// `T` must be `Copy` plain data: it is moved between address spaces bitwise.
pub struct SharedRing<T: Copy> {
    /// Owns the mapping; slots and header are reached through `base`.
    mm: SharedFile,
    base: *mut u8,
    capacity: u64,
    slots_offset: usize,
    poll: ReadyPoll,
    _pd: PhantomData<T>,
}

// SAFETY: all shared state is reached through atomics, semaphores, or slot
// data guarded by the readiness turn.
unsafe impl<T: Copy + Send> Send for SharedRing<T> {}
unsafe impl<T: Copy + Send> Sync for SharedRing<T> {}

impl<T: Copy> SharedRing<T> {
    /// Creates the backing file at `path` and initialises the ring.
    ///
    /// Fails if the file already exists, if mapping fails, or if either
    /// semaphore cannot be initialised. Nothing is left on disk on failure.
    pub fn create<P: AsRef<Path>>(path: P, cfg: RingConfig) -> Result<OwnedRing<T>, RingError> {
        let path = path.as_ref();
        if cfg.capacity == 0 || cfg.capacity > MAX_CAPACITY {
            return Err(RingError::Layout {
                path: path.display().to_string(),
                reason: "capacity out of range",
            });
        }

        let bytes = bytes_for_ring::<T>(cfg.capacity);
        let mut mm = SharedFile::create(path, bytes as u64).map_err(|source| RingError::Map {
            path: path.display().to_string(),
            source,
        })?;
        let base = mm.as_mut_ptr();

        // Slots are not touched: the new file reads as zeros and a zero turn
        // is vacant for lap 0, so pages are only faulted in when used.
        //
        // SAFETY: the file was just created by us and nobody else maps it
        // yet; the region is sized for the header and every slot.
        let h = unsafe {
            let h = base as *mut RingHeader;
            ptr::write(
                h,
                RingHeader {
                    magic: RING_MAGIC,
                    version: RING_VERSION,
                    capacity: cfg.capacity as u64,
                    elem_size: size_of::<T>() as u64,
                    write_cursor: Cursor::new(0),
                    read_cursor: Cursor::new(0),
                    empty: SharedSemaphore::uninit(),
                    full: SharedSemaphore::uninit(),
                },
            );
            &*h
        };

        // SAFETY: both semaphores sit at their final address in the mapping.
        let init = unsafe { h.empty.init(cfg.capacity as u32) }
            .map_err(RingError::semaphore("init(empty)"))
            .and_then(|()| {
                unsafe { h.full.init(0) }.map_err(|e| {
                    unsafe { h.empty.destroy() };
                    RingError::semaphore("init(full)")(e)
                })
            });

        if let Err(e) = init {
            drop(mm);
            let _ = std::fs::remove_file(path);
            return Err(e);
        }

        Ok(OwnedRing {
            ring: SharedRing {
                mm,
                base,
                capacity: cfg.capacity as u64,
                slots_offset: slots_offset::<T>(),
                poll: cfg.poll,
                _pd: PhantomData,
            },
        })
    }

    /// Attaches to a ring created by another process.
    ///
    /// The header is validated against `T` before anything else is touched.
    pub fn open<P: AsRef<Path>>(path: P, poll: ReadyPoll) -> Result<Self, RingError> {
        let path = path.as_ref();
        let layout_err = |reason| RingError::Layout {
            path: path.display().to_string(),
            reason,
        };

        let mut mm = SharedFile::open(path).map_err(|source| RingError::Map {
            path: path.display().to_string(),
            source,
        })?;
        if mm.len() < size_of::<RingHeader>() {
            return Err(layout_err("file smaller than header"));
        }
        let base = mm.as_mut_ptr();

        // SAFETY: the mapping is at least one header long; validate() rejects
        // anything that was not written by `create`.
        let h = unsafe { &*(base as *const RingHeader) };
        h.validate::<T>().map_err(layout_err)?;

        let capacity = h.capacity;
        if mm.len() < bytes_for_ring::<T>(capacity as usize) {
            return Err(layout_err("file smaller than its slots"));
        }

        Ok(SharedRing {
            mm,
            base,
            capacity,
            slots_offset: slots_offset::<T>(),
            poll,
            _pd: PhantomData,
        })
    }

    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: base points to a header initialised by `create`
        unsafe { &*(self.base as *const RingHeader) }
    }

    #[inline(always)]
    fn slot(&self, idx: usize) -> &ReadySlot<T> {
        // SAFETY: idx comes from a Claim, always < capacity
        unsafe {
            let slots = self.base.add(self.slots_offset) as *const ReadySlot<T>;
            &*slots.add(idx)
        }
    }

    /// Blocks until a slot is free to write, then claims the next write cursor.
    pub fn claim_write(&self) -> Result<Claim, RingError> {
        self.header()
            .empty
            .wait()
            .map_err(RingError::semaphore("wait(empty)"))?;
        let cursor = self.header().write_cursor.0.fetch_add(1, Ordering::AcqRel);
        Ok(Claim::new(cursor, self.capacity))
    }

    /// Writes `value` into the claimed slot and makes it visible to readers.
    pub fn publish(&self, claim: Claim, value: T) -> Result<(), RingError> {
        let (slot, lap) = (self.slot(claim.index), claim.lap);
        if let Err(waited) = self.poll.wait_until(|| slot.is_vacant_for(lap)) {
            return Err(RingError::VacancyTimeout { claim, waited });
        }

        // SAFETY: the claim is unique for this slot and lap, and the slot
        // has been vacated by the previous lap's reader.
        unsafe { slot.write(claim.lap, value) };

        self.header()
            .full
            .post()
            .map_err(RingError::semaphore("post(full)"))
    }

    /// Blocks until some slot has been published, then claims the next read
    /// cursor. The claimed slot itself may still be in flight; call
    /// [`wait_ready`](Self::wait_ready) before [`consume`](Self::consume).
    pub fn claim_read(&self) -> Result<Claim, RingError> {
        self.header()
            .full
            .wait()
            .map_err(RingError::semaphore("wait(full)"))?;
        let cursor = self.header().read_cursor.0.fetch_add(1, Ordering::AcqRel);
        Ok(Claim::new(cursor, self.capacity))
    }

    /// Polls the claimed slot until its writer has published, then hands
    /// the claim back for [`consume`](Self::consume).
    pub fn wait_ready(&self, claim: Claim) -> Result<Claim, RingError> {
        let (slot, lap) = (self.slot(claim.index), claim.lap);
        match self.poll.wait_until(|| slot.is_ready_for(lap)) {
            Ok(()) => Ok(claim),
            Err(waited) => Err(RingError::ReadyTimeout { claim, waited }),
        }
    }

    /// Takes the value out of a ready slot and returns the slot to writers.
    pub fn consume(&self, claim: Claim) -> Result<T, RingError> {
        let slot = self.slot(claim.index);
        if !slot.is_ready_for(claim.lap) {
            return Err(RingError::NotReady { claim });
        }

        // SAFETY: the read claim is unique for this slot and lap, and the
        // slot is published for it.
        let value = unsafe { slot.take(claim.lap) };

        self.header()
            .empty
            .post()
            .map_err(RingError::semaphore("post(empty)"))?;
        Ok(value)
    }

    /// `claim_write` + `publish`.
    pub fn push(&self, value: T) -> Result<(), RingError> {
        let claim = self.claim_write()?;
        self.publish(claim, value)
    }

    /// `claim_read` + `wait_ready` + `consume`.
    pub fn pop(&self) -> Result<T, RingError> {
        let claim = self.claim_read()?;
        let claim = self.wait_ready(claim)?;
        self.consume(claim)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn poll(&self) -> ReadyPoll {
        self.poll
    }

    pub fn path(&self) -> &Path {
        self.mm.path()
    }

    /// Cursors handed out to writers so far.
    pub fn write_cursor(&self) -> u64 {
        self.header().write_cursor.0.load(Ordering::Acquire)
    }

    /// Cursors handed out to readers so far.
    pub fn read_cursor(&self) -> u64 {
        self.header().read_cursor.0.load(Ordering::Acquire)
    }

    /// Current value of the `full` semaphore.
    pub fn available_to_read(&self) -> Result<usize, RingError> {
        self.header()
            .full
            .value()
            .map_err(RingError::semaphore("getvalue(full)"))
    }

    /// Current value of the `empty` semaphore.
    pub fn available_to_write(&self) -> Result<usize, RingError> {
        self.header()
            .empty
            .value()
            .map_err(RingError::semaphore("getvalue(empty)"))
    }
}

/// The creator's handle on a ring.
///
/// Dereferences to [`SharedRing`]. Dropping it destroys both semaphores and
/// removes the backing file, so it must outlive every process attached to
/// the ring.
pub struct OwnedRing<T: Copy> {
    ring: SharedRing<T>,
}

impl<T: Copy> Deref for OwnedRing<T> {
    type Target = SharedRing<T>;

    fn deref(&self) -> &SharedRing<T> {
        &self.ring
    }
}

impl<T: Copy> Drop for OwnedRing<T> {
    fn drop(&mut self) {
        let h = self.ring.header();
        // SAFETY: the owner is dropped only after every attached process has
        // been joined, so no one waits on these semaphores anymore.
        unsafe {
            h.empty.destroy();
            h.full.destroy();
        }
        let _ = std::fs::remove_file(self.ring.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_events::{ProcessId, Sentinel, Task};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    fn temp_path(tag: &str) -> PathBuf {
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "relay_ring_{tag}_{}_{n}",
            std::process::id()
        ))
    }

    fn ring<T: Copy>(tag: &str, capacity: usize) -> OwnedRing<T> {
        SharedRing::create(temp_path(tag), RingConfig::new(capacity)).expect("create ring")
    }

    fn short_timeout() -> ReadyPoll {
        ReadyPoll::new(Duration::from_micros(50), Some(Duration::from_millis(5)))
    }

    #[test]
    fn push_pop_in_cursor_order() {
        let r = ring::<u64>("fifo", 4);
        for v in [7, 42, 99] {
            r.push(v).unwrap();
        }
        assert_eq!(r.available_to_read().unwrap(), 3);
        assert_eq!(r.available_to_write().unwrap(), 1);

        let got: Vec<u64> = (0..3).map(|_| r.pop().unwrap()).collect();
        assert_eq!(got, vec![7, 42, 99]);
        assert_eq!(r.write_cursor(), 3);
        assert_eq!(r.read_cursor(), 3);
        assert_eq!(r.available_to_write().unwrap(), 4);
    }

    #[test]
    fn open_sees_the_creators_data() {
        let owner = ring::<u64>("open", 8);
        owner.push(5).unwrap();

        let view = SharedRing::<u64>::open(owner.path(), ReadyPoll::default()).unwrap();
        assert_eq!(view.capacity(), 8);
        assert_eq!(view.pop().unwrap(), 5);
        view.push(6).unwrap();
        assert_eq!(owner.pop().unwrap(), 6);
    }

    #[test]
    fn open_rejects_mismatched_element_type() {
        let owner = ring::<u64>("mismatch", 2);
        let err = SharedRing::<u32>::open(owner.path(), ReadyPoll::default()).err().unwrap();
        assert!(matches!(
            err,
            RingError::Layout { reason: "element size mismatch", .. }
        ));
    }

    #[test]
    fn open_missing_file_is_a_map_error() {
        let err = SharedRing::<u64>::open(temp_path("missing"), ReadyPoll::default())
            .err()
            .unwrap();
        assert!(matches!(err, RingError::Map { .. }));
    }

    #[test]
    fn dropping_owner_removes_backing_file() {
        let owner = ring::<u64>("drop", 2);
        let path = owner.path().to_path_buf();
        assert!(path.exists());
        drop(owner);
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_claims_get_distinct_slots() {
        const CAP: usize = 64;
        let r = ring::<u64>("claims", CAP);

        let claims: Vec<Claim> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..CAP / 8).map(|_| r.claim_write().unwrap()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let indices: HashSet<usize> = claims.iter().map(Claim::index).collect();
        let cursors: HashSet<u64> = claims.iter().map(Claim::cursor).collect();
        assert_eq!(indices.len(), CAP);
        assert_eq!(cursors.len(), CAP);
        assert_eq!(r.available_to_write().unwrap(), 0);
    }

    #[test]
    fn reader_waits_for_its_own_slot_not_any_slot() {
        let r = SharedRing::<u64>::create(
            temp_path("race"),
            RingConfig::new(4).with_poll(short_timeout()),
        )
        .unwrap();

        let slow = r.claim_write().unwrap();
        let fast = r.claim_write().unwrap();
        r.publish(fast, 2).unwrap();

        // `full` was posted by the second writer, but the reader gets cursor 0.
        let read = r.claim_read().unwrap();
        assert_eq!(read.cursor(), 0);
        let read = match r.wait_ready(read) {
            Err(RingError::ReadyTimeout { claim, .. }) => claim,
            other => panic!("expected ReadyTimeout, got {other:?}"),
        };
        assert_eq!((read.cursor(), read.index()), (0, 0));

        r.publish(slow, 1).unwrap();
        let read = r.wait_ready(read).unwrap();
        assert_eq!(r.consume(read).unwrap(), 1);
        assert_eq!(r.pop().unwrap(), 2);
    }

    #[test]
    fn refused_consume_hands_back_the_claim() {
        let r = SharedRing::<u64>::create(
            temp_path("early"),
            RingConfig::new(2).with_poll(short_timeout()),
        )
        .unwrap();
        let pending = r.claim_write().unwrap();
        let other = r.claim_write().unwrap();
        r.publish(other, 9).unwrap();

        let read = r.claim_read().unwrap();
        let err = r.consume(read).unwrap_err();
        assert!(matches!(&err, RingError::NotReady { claim } if claim.cursor() == 0));
        let read = err.into_claim().unwrap();

        r.publish(pending, 8).unwrap();
        assert_eq!(r.consume(read).unwrap(), 8);
        assert_eq!(r.pop().unwrap(), 9);

        // Both slots went back to writers; the ring keeps cycling.
        assert_eq!(r.available_to_write().unwrap(), 2);
        for v in 10..16 {
            r.push(v).unwrap();
            assert_eq!(r.pop().unwrap(), v);
        }
        assert_eq!(r.read_cursor(), r.write_cursor());
    }

    #[test]
    fn timed_out_pop_can_be_finished_later() {
        let r = SharedRing::<u64>::create(
            temp_path("pop_timeout"),
            RingConfig::new(2).with_poll(short_timeout()),
        )
        .unwrap();
        let slow = r.claim_write().unwrap();
        r.push(5).unwrap();

        let read = r.pop().unwrap_err().into_claim().expect("timeout carries the claim");
        r.publish(slow, 4).unwrap();
        let read = r.wait_ready(read).unwrap();
        assert_eq!(r.consume(read).unwrap(), 4);
        assert_eq!(r.pop().unwrap(), 5);

        r.push(6).unwrap();
        assert_eq!(r.pop().unwrap(), 6);
    }

    #[test]
    fn vacancy_timeout_can_be_retried() {
        let r = SharedRing::<u64>::create(
            temp_path("vacancy"),
            RingConfig::new(2).with_poll(short_timeout()),
        )
        .unwrap();

        let w0 = r.claim_write().unwrap();
        let w1 = r.claim_write().unwrap();
        r.publish(w1, 101).unwrap();
        let r0 = r.claim_read().unwrap();
        r.publish(w0, 100).unwrap();
        assert_eq!(r.pop().unwrap(), 101);

        // Slot 0 still holds cursor 0's value.
        let w2 = r.claim_write().unwrap();
        let err = r.publish(w2, 102).unwrap_err();
        assert!(matches!(&err, RingError::VacancyTimeout { claim, .. } if claim.index() == 0));
        let w2 = err.into_claim().unwrap();

        let r0 = r.wait_ready(r0).unwrap();
        assert_eq!(r.consume(r0).unwrap(), 100);
        r.publish(w2, 102).unwrap();
        assert_eq!(r.pop().unwrap(), 102);
    }

    #[test]
    fn ring_errors_without_a_claim_give_none() {
        let err = SharedRing::<u64>::open(temp_path("none"), ReadyPoll::default())
            .err()
            .unwrap();
        assert!(err.into_claim().is_none());
    }

    #[test]
    fn slots_are_not_touched_at_creation() {
        use std::os::unix::fs::MetadataExt;

        let r = ring::<u64>("sparse", 1 << 20);
        let meta = std::fs::metadata(r.path()).unwrap();
        assert!(meta.len() > 64 << 20);
        assert!(meta.blocks() * 512 < meta.len() / 2, "slots were faulted in");

        r.push(3).unwrap();
        assert_eq!(r.pop().unwrap(), 3);
    }

    #[test]
    fn lapping_writer_waits_for_previous_reader() {
        let r = ring::<u64>("lap", 2);

        let w0 = r.claim_write().unwrap();
        let w1 = r.claim_write().unwrap();
        r.publish(w1, 101).unwrap();
        let r0 = r.claim_read().unwrap(); // cursor 0, not yet written
        r.publish(w0, 100).unwrap();
        assert_eq!(r.pop().unwrap(), 101); // cursor 1 frees a permit early

        // Cursor 2 maps onto slot 0, which still holds cursor 0's value.
        let w2 = r.claim_write().unwrap();
        assert_eq!(w2.index(), 0);

        std::thread::scope(|s| {
            let writer = s.spawn(|| r.publish(w2, 102));
            std::thread::sleep(Duration::from_millis(20));
            let r0 = r.wait_ready(r0).unwrap();
            assert_eq!(r.consume(r0).unwrap(), 100);
            writer.join().unwrap().unwrap();
        });

        assert_eq!(r.pop().unwrap(), 102);
    }

    #[test]
    fn capacity_one_alternates() {
        let r = ring::<u64>("alt", 1);
        const N: u64 = 2_000;

        std::thread::scope(|s| {
            s.spawn(|| {
                for v in 0..N {
                    r.push(v).unwrap();
                }
            });
            for expected in 0..N {
                assert_eq!(r.pop().unwrap(), expected);
                assert!(r.available_to_read().unwrap() + r.available_to_write().unwrap() <= 1);
            }
        });
    }

    #[test]
    fn every_value_consumed_exactly_once() {
        const PRODUCERS: i32 = 4;
        const PER_PRODUCER: i32 = 2_500;
        const CONSUMERS: usize = 3;
        let r = ring::<Task>("mpmc", 8);

        let consumed: Vec<Vec<i32>> = std::thread::scope(|s| {
            let consumers: Vec<_> = (0..CONSUMERS)
                .map(|_| {
                    s.spawn(|| {
                        let mut seen = Vec::new();
                        loop {
                            let t = r.pop().unwrap();
                            if t.is_sentinel() {
                                return seen;
                            }
                            seen.push(t.payload);
                        }
                    })
                })
                .collect();

            let producers: Vec<_> = (0..PRODUCERS)
                .map(|p| {
                    let r = &r;
                    s.spawn(move || {
                        for i in 0..PER_PRODUCER {
                            r.push(Task::new(ProcessId(p as u32), p * 100_000 + i)).unwrap();
                        }
                    })
                })
                .collect();
            for p in producers {
                p.join().unwrap();
            }

            for _ in 0..CONSUMERS {
                r.push(Task::sentinel(ProcessId(0))).unwrap();
            }
            consumers.into_iter().map(|c| c.join().unwrap()).collect()
        });

        let mut all: Vec<i32> = consumed.into_iter().flatten().collect();
        all.sort_unstable();
        let mut expected: Vec<i32> = (0..PRODUCERS)
            .flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 100_000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(all, expected);

        // Every sentinel was taken by exactly one consumer and nothing is left.
        assert_eq!(r.available_to_read().unwrap(), 0);
        assert_eq!(r.read_cursor(), r.write_cursor());
    }
}
