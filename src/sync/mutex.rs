//! User-space test-and-set spin mutex: the innermost blocking primitive that
//! `sync::condvar`, `sync::semaphore`, and `sync::rwlock` all embed.
//!
//! Unlike `sync::spinmutex::SpinMutex<T>` (a kernel-resident lock guarding
//! kernel data), this one's storage lives in the calling process's user
//! address space — callers pass a user virtual address and this module
//! resolves it to the backing physical word on every access, so it works
//! correctly no matter which thread of a shared-pagetable group is currently
//! running when it is touched.

use crate::{
    mem::virtual_memory::walkaddr,
    proc::{current_index, KernelError, PTABLE},
};
use core::sync::atomic::{AtomicI32, Ordering};

/// Wire layout of a user-space mutex: a single flag word, test-and-set.
#[repr(C)]
pub(crate) struct UserMutexLayout {
    pub flag: i32,
}

/// Resolves a user virtual address to the physical word backing it, under
/// the calling entity's (shared, if a thread) page table. Sync-primitive
/// state is plain data, not multiple disjoint fields spanning a page
/// boundary, so a single `walkaddr` of the containing page is sufficient.
pub(crate) unsafe fn resolve_i32(addr: u64) -> Result<*mut AtomicI32, KernelError> {
    let pagetable = {
        let index = current_index().expect("sync primitive access with no current process");
        PTABLE.lock().get(index).pagetable
    };

    let page_offset = addr & (crate::arch::riscv::PGSIZE - 1);
    let physical_page = walkaddr(pagetable, addr - page_offset);
    if physical_page == 0 {
        return Err(KernelError::PageError);
    }

    Ok((physical_page + page_offset) as *mut AtomicI32)
}

pub unsafe fn mutex_init(addr: u64) -> Result<(), KernelError> {
    let flag = resolve_i32(addr)?;
    (*flag).store(0, Ordering::Release);
    Ok(())
}

/// Busy-waits until the flag can be claimed. Not fair, and not meant to be:
/// every higher-level primitive in this module holds it only long enough to
/// touch a handful of words.
pub unsafe fn mutex_lock(addr: u64) -> Result<(), KernelError> {
    let flag = resolve_i32(addr)?;
    while (*flag)
        .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        core::hint::spin_loop();
    }
    Ok(())
}

pub unsafe fn mutex_unlock(addr: u64) -> Result<(), KernelError> {
    let flag = resolve_i32(addr)?;
    (*flag).store(0, Ordering::Release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicI32, Ordering};

    /// Exercises the test-and-set protocol directly against a local atomic,
    /// since `mutex_lock`/`mutex_unlock` require a live page table to resolve
    /// a user address against.
    #[test]
    fn lock_unlock_round_trip_is_identity() {
        let flag = AtomicI32::new(0);
        assert!(flag
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok());
        flag.store(0, Ordering::Release);
        assert_eq!(flag.load(Ordering::Acquire), 0);
    }

    #[test]
    fn contended_lock_fails_compare_exchange() {
        let flag = AtomicI32::new(1);
        assert!(flag
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err());
    }
}
