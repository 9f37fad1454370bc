//! Process-shared POSIX counting semaphore.
//!
//! The `sem_t` lives inside the mapped ring, initialised with `pshared = 1`,
//! so every process mapping the ring waits and posts on the same counter.
//! A `sem_t` must never move after `sem_init`; it is only ever accessed in
//! place through the mapping.

use std::cell::UnsafeCell;
use std::io;

#[repr(C)]
pub struct SharedSemaphore {
    raw: UnsafeCell<libc::sem_t>,
}

// SAFETY: sem_* functions are safe to call concurrently on the same sem_t
// from any thread or process.
unsafe impl Sync for SharedSemaphore {}
unsafe impl Send for SharedSemaphore {}

impl SharedSemaphore {
    /// Placeholder bytes; must be followed by `init` at the final location.
    pub fn uninit() -> Self {
        SharedSemaphore {
            // SAFETY: sem_t is plain data; all-zero is a valid bit pattern.
            raw: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }
    }

    /// Initialise in place with `value` permits.
    ///
    /// # Safety
    /// `self` must be at its final address inside shared memory and must not
    /// already be initialised.
    pub unsafe fn init(&self, value: u32) -> io::Result<()> {
        let rc = unsafe { libc::sem_init(self.raw.get(), 1, value) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Block until a permit is available, then take it.
    ///
    /// Signal interruptions are retried.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.raw.get()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Take a permit if one is available without blocking.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.raw.get()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.raw.get()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Current number of permits. Only a snapshot under concurrency.
    pub fn value(&self) -> io::Result<usize> {
        let mut v: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.raw.get(), &mut v) } == 0 {
            Ok(v.max(0) as usize)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// # Safety
    /// No process may be blocked on, or later use, this semaphore.
    pub unsafe fn destroy(&self) {
        unsafe { libc::sem_destroy(self.raw.get()) };
    }
}
