//! Condition variables layered on `sync::mutex`: a waiting-thread counter
//! protected by its own embedded mutex, with the kernel's sleep/wakeup
//! providing the actual blocking.

use super::mutex::{self, UserMutexLayout};
use crate::proc::{
    scheduler::{sleep_holding_table, wakeup_one},
    table::PTABLE,
    KernelError,
};
use core::{ffi::c_void, mem::offset_of, sync::atomic::Ordering};

#[repr(C)]
pub(crate) struct UserCondLayout {
    pub waiting_threads: i32,
    pub mutex: UserMutexLayout,
}

const MUTEX_OFFSET: u64 = offset_of!(UserCondLayout, mutex) as u64;

pub unsafe fn cond_init(addr: u64) -> Result<(), KernelError> {
    let count = mutex::resolve_i32(addr)?;
    (*count).store(0, Ordering::Release);
    mutex::mutex_init(addr + MUTEX_OFFSET)
}

/// Registers as a waiter, releases `lock_addr`, sleeps until signaled, and
/// reacquires `lock_addr` before returning — the same contract as the
/// pthread-style `cond_wait` this facility imitates.
///
/// Per the kernel's `sleep(chan, lk)` contract, the ptable lock is taken
/// *before* `lock_addr` is released and the caller's state moves to
/// SLEEPING under that same lock, so a concurrent `cond_signal` cannot slip
/// its `wakeup_one` into the gap between the release and the sleep.
pub unsafe fn cond_wait(cond_addr: u64, lock_addr: u64) -> Result<(), KernelError> {
    mutex::mutex_lock(cond_addr + MUTEX_OFFSET)?;
    let count = mutex::resolve_i32(cond_addr)?;
    (*count).fetch_add(1, Ordering::AcqRel);
    mutex::mutex_unlock(cond_addr + MUTEX_OFFSET)?;

    // Resolved ahead of taking the ptable lock: resolving a user address
    // itself needs to read the current process's pagetable under that same
    // lock, which would deadlock if done while already holding it.
    let lock_flag = mutex::resolve_i32(lock_addr)?;
    let chan = channel_for(cond_addr)?;

    let guard = PTABLE.lock();
    (*lock_flag).store(0, Ordering::Release);
    let _ = sleep_holding_table(guard, chan);

    mutex::mutex_lock(lock_addr)
}

/// Wakes at most one waiter. A no-op if nobody is currently waiting.
pub unsafe fn cond_signal(cond_addr: u64) -> Result<(), KernelError> {
    mutex::mutex_lock(cond_addr + MUTEX_OFFSET)?;
    let count = mutex::resolve_i32(cond_addr)?;
    if (*count).load(Ordering::Acquire) == 0 {
        mutex::mutex_unlock(cond_addr + MUTEX_OFFSET)?;
        return Ok(());
    }
    (*count).fetch_sub(1, Ordering::AcqRel);
    mutex::mutex_unlock(cond_addr + MUTEX_OFFSET)?;

    wakeup_one(channel_for(cond_addr)?);
    Ok(())
}

/// The sleep/wakeup channel for a condition variable: the physical address
/// backing its counter word. Using the physical rather than the virtual
/// address disambiguates waiters across thread groups whose address spaces
/// happen to place a condition variable at the same user virtual address.
unsafe fn channel_for(cond_addr: u64) -> Result<*mut c_void, KernelError> {
    Ok(mutex::resolve_i32(cond_addr)? as *mut c_void)
}
