//! Shared memory layout of a ring.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ RingHeader                                                     │
//! │   magic │ version │ capacity │ elem_size        (4 × 8B)       │
//! │   write_cursor (AtomicU64, own cache line)                     │
//! │   read_cursor  (AtomicU64, own cache line)                     │
//! │   empty: sem_t (pshared)  │  full: sem_t (pshared)             │
//! ├────────────────────────────────────────────────────────────────┤
//! │ ReadySlot[0]   turn (AtomicU64) │ data: T     (64B aligned)    │
//! │ ReadySlot[1]                                                   │
//! │ ...                                                            │
//! │ ReadySlot[capacity-1]                                          │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use crate::semaphore::SharedSemaphore;
use crate::slot::ReadySlot;
use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicU64;

/// ASCII "RELAYRNG".
pub const RING_MAGIC: u64 = u64::from_be_bytes(*b"RELAYRNG");

/// Bump on any incompatible layout change.
pub const RING_VERSION: u64 = 1;

/// Largest capacity a semaphore can count.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

/// A cursor on its own cache line so producers and consumers do not
/// false-share.
#[repr(C, align(64))]
pub struct Cursor(pub AtomicU64);

impl Cursor {
    pub fn new(v: u64) -> Self {
        Cursor(AtomicU64::new(v))
    }
}

#[repr(C)]
pub struct RingHeader {
    pub magic: u64,
    pub version: u64,
    pub capacity: u64,
    pub elem_size: u64,

    /// Next cursor to hand out to a writer. Only ever incremented.
    pub write_cursor: Cursor,

    /// Next cursor to hand out to a reader. Only ever incremented.
    pub read_cursor: Cursor,

    /// Slots available to write. Starts at `capacity`.
    pub empty: SharedSemaphore,

    /// Slots available to read. Starts at 0.
    pub full: SharedSemaphore,
}

impl RingHeader {
    pub fn validate<T: Copy>(&self) -> Result<(), &'static str> {
        if self.magic != RING_MAGIC {
            return Err("bad magic");
        }
        if self.version != RING_VERSION {
            return Err("wrong version");
        }
        if self.capacity == 0 || self.capacity as usize > MAX_CAPACITY {
            return Err("capacity out of range");
        }
        if self.elem_size as usize != size_of::<T>() {
            return Err("element size mismatch");
        }

        Ok(())
    }
}

/// Byte offset of slot 0 from the start of the mapping.
pub fn slots_offset<T: Copy>() -> usize {
    size_of::<RingHeader>().next_multiple_of(align_of::<ReadySlot<T>>())
}

/// Total bytes needed to map a ring of `capacity` slots of `T`.
pub fn bytes_for_ring<T: Copy>(capacity: usize) -> usize {
    slots_offset::<T>() + capacity * size_of::<ReadySlot<T>>()
}
