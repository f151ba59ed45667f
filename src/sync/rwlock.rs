//! Reader/writer lock built from two counting semaphores: readers hold a
//! shared entry semaphore just long enough to bump a counter, and the first
//! reader in also claims the write semaphore on behalf of the group.

use super::semaphore::{self, UserSemaphoreLayout};
use crate::proc::KernelError;
use core::{
    mem::offset_of,
    sync::atomic::Ordering::{AcqRel, Release},
};

#[repr(C)]
pub(crate) struct UserRwLockLayout {
    pub read_lock: UserSemaphoreLayout,
    pub write_lock: UserSemaphoreLayout,
    pub readers: i32,
}

const WRITE_LOCK_OFFSET: u64 = offset_of!(UserRwLockLayout, write_lock) as u64;
const READERS_OFFSET: u64 = offset_of!(UserRwLockLayout, readers) as u64;

pub unsafe fn rwlock_init(addr: u64) -> Result<(), KernelError> {
    let readers = super::mutex::resolve_i32(addr + READERS_OFFSET)?;
    (*readers).store(0, Release);
    semaphore::xem_init(addr)?;
    semaphore::xem_init(addr + WRITE_LOCK_OFFSET)
}

pub unsafe fn acquire_readlock(addr: u64) -> Result<(), KernelError> {
    semaphore::xem_wait(addr)?;
    let readers = super::mutex::resolve_i32(addr + READERS_OFFSET)?;
    let count = (*readers).fetch_add(1, AcqRel) + 1;
    if count == 1 {
        semaphore::xem_wait(addr + WRITE_LOCK_OFFSET)?;
    }
    semaphore::xem_unlock(addr)
}

pub unsafe fn acquire_writelock(addr: u64) -> Result<(), KernelError> {
    semaphore::xem_wait(addr + WRITE_LOCK_OFFSET)
}

pub unsafe fn release_readlock(addr: u64) -> Result<(), KernelError> {
    semaphore::xem_wait(addr)?;
    let readers = super::mutex::resolve_i32(addr + READERS_OFFSET)?;
    let count = (*readers).fetch_sub(1, AcqRel) - 1;
    if count == 0 {
        semaphore::xem_unlock(addr + WRITE_LOCK_OFFSET)?;
    }
    semaphore::xem_unlock(addr)
}

pub unsafe fn release_writelock(addr: u64) -> Result<(), KernelError> {
    semaphore::xem_unlock(addr + WRITE_LOCK_OFFSET)
}
