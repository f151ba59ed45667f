//! Counting semaphore: a value guarded by an embedded mutex, with waiters
//! parked on an embedded condition variable when the count is exhausted.

use super::{
    condvar::{self, UserCondLayout},
    mutex::{self, UserMutexLayout},
};
use crate::proc::KernelError;
use core::{mem::offset_of, sync::atomic::Ordering};

#[repr(C)]
pub(crate) struct UserSemaphoreLayout {
    pub value: i32,
    pub cond: UserCondLayout,
    pub mutex: UserMutexLayout,
}

const COND_OFFSET: u64 = offset_of!(UserSemaphoreLayout, cond) as u64;
const MUTEX_OFFSET: u64 = offset_of!(UserSemaphoreLayout, mutex) as u64;

/// Initializes the semaphore with a count of one, matching this facility's
/// original use as a mutual-exclusion primitive built on top of a counting
/// semaphore rather than the other way around.
pub unsafe fn xem_init(addr: u64) -> Result<(), KernelError> {
    let value = mutex::resolve_i32(addr)?;
    (*value).store(1, Ordering::Release);
    condvar::cond_init(addr + COND_OFFSET)?;
    mutex::mutex_init(addr + MUTEX_OFFSET)
}

pub unsafe fn xem_wait(addr: u64) -> Result<(), KernelError> {
    mutex::mutex_lock(addr + MUTEX_OFFSET)?;
    let value = mutex::resolve_i32(addr)?;
    while (*value).load(Ordering::Acquire) <= 0 {
        condvar::cond_wait(addr + COND_OFFSET, addr + MUTEX_OFFSET)?;
    }
    (*value).fetch_sub(1, Ordering::AcqRel);
    mutex::mutex_unlock(addr + MUTEX_OFFSET)
}

pub unsafe fn xem_unlock(addr: u64) -> Result<(), KernelError> {
    mutex::mutex_lock(addr + MUTEX_OFFSET)?;
    let value = mutex::resolve_i32(addr)?;
    (*value).fetch_add(1, Ordering::AcqRel);
    condvar::cond_signal(addr + COND_OFFSET)?;
    mutex::mutex_unlock(addr + MUTEX_OFFSET)
}
