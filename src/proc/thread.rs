//! Light-weight threads (LWPs): multiple schedulable entities sharing one
//! manager's page table, distinguished by `tid` and reaped through
//! `thread_join` rather than `wait`.

use super::{
    lifecycle::{alloc, free_locked},
    pcb::{KernelError, ProcIndex, ProcessState},
    scheduler::{current_index, sleep_holding_table},
    table::PTABLE,
};
use crate::{
    arch::riscv::{PGSIZE, PTE_W},
    fs::{file::filedup, idup},
    mem::virtual_memory::{copyout, uvmalloc, uvmclear},
};
use core::{mem::size_of, ptr::addr_of_mut};

/// Marker pushed at the fake return address of a freshly created thread's
/// stack, matching the convention the kernel this assignment descends from
/// used to detect "this thread returned instead of calling thread_exit".
const FAKE_RETURN_PC: u64 = 0xffff_ffff;

/// Creates a new thread in the calling entity's group, running
/// `start_routine(arg)` on a freshly assigned (or recycled) user stack, and
/// copies its tid out to `out_tid_ptr` in the caller's (shared) address
/// space.
pub unsafe fn thread_create(
    out_tid_ptr: u64,
    start_routine: u64,
    arg: u64,
) -> Result<(), KernelError> {
    let caller = current_index().expect("thread_create with no current process");
    let manager_index = PTABLE.lock().get(caller).manager.unwrap_or(caller);

    let new_index = alloc()?;

    let (pagetable, manager_size, manager_trapframe, open_files, current_dir, tid, recycled_base) = {
        let mut guard = PTABLE.lock();
        let tid = guard.get(manager_index).nexttid;
        guard.get_mut(manager_index).nexttid += 1;
        let recycled_base = guard.get_mut(manager_index).stack.pop_front();
        let m = guard.get(manager_index);
        (
            m.pagetable,
            m.size,
            *m.trapframe,
            m.open_files,
            m.current_dir,
            tid,
            recycled_base,
        )
    };

    // First page of the pair is a guard page (left unmapped for the user),
    // second is the usable stack; both already exist in the shared page
    // table once either freshly grown here or reused from the recycle list.
    let base = match recycled_base {
        Some(base) => base,
        None => {
            let new_top = manager_size + crate::param::USER_STACK_PAGES * PGSIZE;
            let grown = uvmalloc(pagetable, manager_size, new_top, PTE_W);
            if grown == 0 {
                let mut guard = PTABLE.lock();
                free_locked(&mut guard, new_index);
                return Err(KernelError::Allocation);
            }
            PTABLE.lock().get_mut(manager_index).size = grown;
            manager_size
        }
    };
    // The guard page must never be user-accessible; clearing it is
    // idempotent, so this runs whether base is freshly grown or recycled.
    uvmclear(pagetable, base);
    let stack_top = base + PGSIZE * crate::param::USER_STACK_PAGES;

    let mut guard = PTABLE.lock();
    let child = guard.get_mut(new_index);
    *child.trapframe = manager_trapframe;
    child.pagetable = pagetable;
    child.manager = Some(manager_index);
    child.tid = tid;
    child.size = 0; // threads do not track address-space size independently
    child.current_dir = idup(current_dir);
    for (i, file) in open_files.iter().enumerate() {
        if !file.is_null() {
            child.open_files[i] = filedup(*file);
        }
    }

    // Fake return PC followed by the argument word, mirroring the stack
    // layout this LWP facility is modeled on.
    let sp = stack_top - 16;
    core::ptr::write(sp as *mut u64, FAKE_RETURN_PC);
    core::ptr::write((sp + 8) as *mut u64, arg);

    (*child.trapframe).sp = sp;
    (*child.trapframe).epc = start_routine;
    (*child.trapframe).a0 = arg;

    // Deliver the tid before the thread becomes runnable: if the caller
    // handed us a bad pointer, fail cleanly instead of leaving an
    // uncommunicated thread running.
    let mut tid_out = tid;
    if copyout(
        pagetable,
        out_tid_ptr,
        addr_of_mut!(tid_out).cast(),
        size_of::<i32>() as u64,
    ) < 0
    {
        free_locked(&mut guard, new_index);
        return Err(KernelError::PageError);
    }

    guard.get_mut(new_index).state = ProcessState::Runnable;

    Ok(())
}

/// Exits the calling thread, storing `retval` for a future `thread_join`.
/// Calling this from a manager (a `tid == 0` entity) is a domain error:
/// managers exit via `lifecycle::exit`, not `thread_exit`, and this returns
/// without tearing anything down in that case.
pub unsafe fn thread_exit(retval: u64) -> KernelError {
    let index = current_index().expect("thread_exit with no current process");
    {
        let guard = PTABLE.lock();
        if guard.get(index).is_manager() {
            return KernelError::NotThread;
        }
    }

    // Open files and cwd are each this thread's own reference (duplicated in
    // `thread_create`, same as `fork`), so they are released the same way any
    // exiting entity's are: by `lifecycle::exit`, not here.
    PTABLE.lock().get_mut(index).retval = retval;

    super::lifecycle::exit(0)
}

/// Blocks until the named thread in the calling manager's group becomes a
/// zombie, reaps it (kernel stack, user-stack pages recycled into the
/// manager's stack list), and copies its retval out to `out_retval_ptr` in
/// the manager's (shared) address space.
pub unsafe fn thread_join(tid: i32, out_retval_ptr: u64) -> Result<(), KernelError> {
    let manager_index = current_index().expect("thread_join with no current process");
    let mut guard = PTABLE.lock();

    if !guard.get(manager_index).is_manager() {
        return Err(KernelError::NotManager);
    }

    loop {
        let mut found = false;
        for i in 0..guard.slots.len() {
            if guard.slots[i].manager != Some(manager_index) || guard.slots[i].tid != tid {
                continue;
            }
            found = true;

            if guard.slots[i].state == ProcessState::Zombie {
                let mut retval = guard.slots[i].retval;
                let kernel_stack = guard.slots[i].kernel_stack;
                if kernel_stack != 0 {
                    crate::mem::kalloc::kfree(kernel_stack as *mut u8);
                }
                // Recycle this thread's stack base so a later thread_create
                // can reuse it without growing the address space again.
                let tf = guard.slots[i].trapframe;
                if !tf.is_null() {
                    let base = (*tf).sp - (*tf).sp % PGSIZE - PGSIZE;
                    let _ = guard.slots[manager_index].stack.push_back(base);
                    crate::mem::kalloc::kfree(tf.cast());
                }
                guard.get_mut(manager_index).nexttid -= 1;
                guard.slots[i].reset_to_unused();

                let self_pagetable = guard.slots[manager_index].pagetable;
                if copyout(
                    self_pagetable,
                    out_retval_ptr,
                    addr_of_mut!(retval).cast(),
                    size_of::<u64>() as u64,
                ) < 0
                {
                    return Err(KernelError::PageError);
                }
                return Ok(());
            }
        }

        if !found {
            return Err(KernelError::NoSuchThread);
        }
        if guard.slots[manager_index].killed {
            return Err(KernelError::Killed);
        }

        let chan = manager_index as *mut core::ffi::c_void;
        guard = sleep_holding_table(guard, chan);
    }
}
