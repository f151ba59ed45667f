//! A payload-less spinlock for serializing console output. Distinct from
//! `SpinMutex<T>` only in that it guards nothing in particular — callers
//! hold the guard purely for its `Drop`.

use super::spinlock::{Spinlock, SpinlockGuard};

pub struct Lock(Spinlock);

impl Lock {
    pub const fn new() -> Lock {
        Lock(Spinlock::new())
    }

    pub fn lock_spinning(&self) -> SpinlockGuard<'_> {
        self.0.lock()
    }
}

impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}
