//! Ring slot guarded by a lap-stamped readiness flag.
//!
//! Each slot carries a `turn` word. For a claim on lap `l`:
//!
//! ```text
//! turn == 2l      vacant: the writer of lap l may fill it   (ready = false)
//! turn == 2l + 1  published: the reader of lap l may take it (ready = true)
//! turn == 2l + 2  consumed: vacant for lap l + 1
//! ```
//!
//! All-zero memory is a slot vacant for lap 0, so a freshly sized ring file
//! needs no per-slot initialisation.
//!
//! Writers and readers wait for the exact turn of *their* claim, so a slot is
//! never read before its payload is visible, and a writer that lapped the
//! ring never overwrites a value the previous lap has not consumed.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering, fence};

#[repr(C, align(64))]
pub struct ReadySlot<T: Copy> {
    turn: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

#[inline(always)]
fn vacant_turn(lap: u64) -> u64 {
    lap.wrapping_mul(2)
}

#[inline(always)]
fn ready_turn(lap: u64) -> u64 {
    lap.wrapping_mul(2).wrapping_add(1)
}

impl<T: Copy> ReadySlot<T> {
    /// The boolean `ready` flag: a published value is waiting in the slot.
    #[inline(always)]
    pub fn is_ready(&self) -> bool {
        self.turn.load(Ordering::Acquire) & 1 == 1
    }

    #[inline(always)]
    pub fn is_ready_for(&self, lap: u64) -> bool {
        self.turn.load(Ordering::Acquire) == ready_turn(lap)
    }

    #[inline(always)]
    pub fn is_vacant_for(&self, lap: u64) -> bool {
        self.turn.load(Ordering::Acquire) == vacant_turn(lap)
    }

    /// Store `value`, fence, then flag the slot ready for `lap`.
    ///
    /// # Safety
    /// The caller must hold the write claim for this slot on `lap` and must
    /// have observed `is_vacant_for(lap)`.
    #[inline(always)]
    pub unsafe fn write(&self, lap: u64, value: T) {
        unsafe { (*self.data.get()).write(value) };
        // Payload must be globally visible before anyone can see the flag.
        fence(Ordering::SeqCst);
        self.turn.store(ready_turn(lap), Ordering::Release);
    }

    /// Copy the value out, fence, then hand the slot to the next lap.
    ///
    /// # Safety
    /// The caller must hold the read claim for this slot on `lap` and must
    /// have observed `is_ready_for(lap)`.
    #[inline(always)]
    pub unsafe fn take(&self, lap: u64) -> T {
        let value = unsafe { (*self.data.get()).assume_init_read() };
        fence(Ordering::SeqCst);
        self.turn.store(vacant_turn(lap.wrapping_add(1)), Ordering::Release);
        value
    }
}
