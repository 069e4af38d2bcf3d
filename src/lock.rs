//! The in-region spinlock word.
//!
//! The accounting block embeds a single 32-bit atomic word that serializes
//! alloc/free/commit-mem. It is a raw compare-and-swap spin rather than an OS
//! mutex so the word stays meaningful after a crash: `reopen` simply resets it
//! to unlocked, which would be unsound for a pthread-style mutex that encodes
//! owner/waiter state.

use core::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A raw spinlock word, valid for the lifetime of the mapped region.
#[repr(transparent)]
pub struct SpinLock {
    state: AtomicU32,
}

impl SpinLock {
    /// Constructs an unlocked word. Used only when writing a fresh accounting
    /// block during `create_new`; `reopen` resets an existing word in place
    /// via [`SpinLock::reset`].
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) {
        while self
            .state
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.state.load(Ordering::Relaxed) == LOCKED {
                core::hint::spin_loop();
            }
        }
    }

    /// Releases the lock.
    pub fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }

    /// Forces the word back to unlocked. Called by `reopen` to recover from a
    /// holder that crashed mid-operation; sound only when the caller knows no
    /// other process is mid-operation at reopen time.
    pub fn reset(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn lock_guard(&self) -> LockGuard<'_> {
        self.lock();
        LockGuard { lock: self }
    }
}

/// RAII guard releasing a [`SpinLock`] when dropped.
pub struct LockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_eq_size!(SpinLock, u32);
