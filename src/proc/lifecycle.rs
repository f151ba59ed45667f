//! Process allocation, fork, exit, wait, and kill.
//!
//! Page-table and memory operations are genuine external collaborators
//! (`mem::kalloc`, `mem::virtual_memory`) invoked while the table lock is
//! *not* held — a freshly allocated `Embryo` slot is not visible to any
//! other scan (nothing else dispatches, reaps, or reparents a non-`Runnable`
//! slot), so releasing the lock around the heavier VM calls does not race.
//! Every bookkeeping transition (state, pid, parent, thread-group fields)
//! still happens only while the table lock is held.

use super::{
    cpu::Cpu,
    pcb::{KernelError, Pcb, ProcIndex, ProcessState},
    scheduler::{current_index, sched, sleep_holding_table, wakeup_locked},
    table::{ProcessTable, PTABLE},
};
use crate::{
    arch::riscv::{
        memlayout::{TRAMPOLINE, TRAPFRAME},
        Pagetable, PGSIZE, PTE_R, PTE_W, PTE_X,
    },
    fs::{
        file::{fileclose, filedup},
        idup, iput,
        log::LogOperation,
    },
    mem::{
        kalloc::{kalloc, kfree},
        memset,
        virtual_memory::{
            copyout, mappages, uvmalloc, uvmcopy, uvmcreate, uvmdealloc, uvmfirst, uvmfree,
            uvmunmap,
        },
    },
    uprintln,
};
use core::ptr::{addr_of, addr_of_mut, null_mut};

extern "C" {
    pub fn forkret();

    /// The first user program's machine code and its length, provided by the
    /// linker the same way `mem::kalloc::end` marks the end of kernel data.
    /// Assembling and embedding that first program is a build-system concern
    /// outside this subsystem.
    static INITCODE: [u8; 0];
    static INITCODE_SIZE: u32;
}

/// Looks in the table for an `Unused` slot, reserves it, and initializes it
/// enough to run in the kernel: trapframe page, empty page table, a forkret
/// trampoline as its saved context. Returns the slot index with its pid and
/// manager-of-self bookkeeping already set (a freshly allocated process is
/// its own manager until `thread_create` says otherwise).
pub unsafe fn alloc() -> Result<ProcIndex, KernelError> {
    let index = {
        let mut guard = PTABLE.lock();
        guard.alloc_slot()?
    };

    let ok = (|| -> Result<(), KernelError> {
        let kernel_stack = kalloc();
        if kernel_stack.is_null() {
            return Err(KernelError::Allocation);
        }

        let trapframe = kalloc() as *mut super::trapframe::Trapframe;
        if trapframe.is_null() {
            kfree(kernel_stack);
            return Err(KernelError::Allocation);
        }

        let mut guard = PTABLE.lock();
        let p = guard.get_mut(index);
        p.kernel_stack = kernel_stack as usize as u64;
        p.trapframe = trapframe;
        p.manager = Some(index);
        p.nexttid = 1;
        drop(guard);

        let pagetable = alloc_pagetable(index)?;

        let mut guard = PTABLE.lock();
        let p = guard.get_mut(index);
        p.pagetable = pagetable;

        memset(
            addr_of_mut!(p.context).cast(),
            0,
            core::mem::size_of::<super::context::Context>() as u32,
        );
        p.context.ra = forkret as usize as u64;
        p.context.sp = p.kernel_stack + PGSIZE;
        Ok(())
    })();

    if let Err(e) = ok {
        let mut guard = PTABLE.lock();
        free_locked(&mut guard, index);
        return Err(e);
    }

    Ok(index)
}

/// Tears down everything `alloc` built, returning the slot to `Unused`.
/// Caller holds the table lock.
pub unsafe fn free_locked(table: &mut ProcessTable, index: ProcIndex) {
    let p = table.get_mut(index);
    if !p.trapframe.is_null() {
        kfree(p.trapframe.cast());
    }
    if p.kernel_stack != 0 {
        kfree(p.kernel_stack as *mut u8);
    }
    let pagetable = p.pagetable;
    let size = p.size;
    p.reset_to_unused();

    if !pagetable.is_null() {
        free_pagetable(pagetable, size);
    }
}

pub unsafe fn alloc_pagetable(index: ProcIndex) -> Result<Pagetable, KernelError> {
    let pagetable: Pagetable = uvmcreate();
    if pagetable.is_null() {
        return Err(KernelError::Allocation);
    }

    let trapframe = PTABLE.lock().get(index).trapframe;

    extern "C" {
        static mut trampoline: *mut core::ffi::c_char;
    }

    if mappages(
        pagetable,
        TRAMPOLINE,
        PGSIZE,
        addr_of!(trampoline) as usize as u64,
        PTE_R | PTE_X,
    ) < 0
    {
        uvmfree(pagetable, 0);
        return Err(KernelError::Allocation);
    }

    if mappages(pagetable, TRAPFRAME, PGSIZE, trapframe as usize as u64, PTE_R | PTE_W) < 0 {
        uvmunmap(pagetable, TRAMPOLINE, 1, 0);
        uvmfree(pagetable, 0);
        return Err(KernelError::Allocation);
    }

    Ok(pagetable)
}

pub unsafe fn free_pagetable(pagetable: Pagetable, size: u64) {
    uvmunmap(pagetable, TRAMPOLINE, 1, 0);
    uvmunmap(pagetable, TRAPFRAME, 1, 0);
    uvmfree(pagetable, size);
}

/// Grows or shrinks the *manager's* address space by `n` bytes. Threads have
/// no address space of their own; calling this from a thread operates on its
/// manager, matching the shared-page-table design.
pub unsafe fn growproc(n: i32) -> Result<(), KernelError> {
    let index = current_index().expect("growproc with no current process");
    let manager_index = {
        let guard = PTABLE.lock();
        guard.get(index).manager.unwrap_or(index)
    };

    let (pagetable, mut size) = {
        let guard = PTABLE.lock();
        let m = guard.get(manager_index);
        (m.pagetable, m.size)
    };

    if n > 0 {
        size = uvmalloc(pagetable, size, size.wrapping_add(n as u64), PTE_W);
        if size == 0 {
            return Err(KernelError::Allocation);
        }
    } else if n < 0 {
        size = uvmdealloc(pagetable, size, size.wrapping_add(n as u64));
    }

    PTABLE.lock().get_mut(manager_index).size = size;
    Ok(())
}

/// Forks the calling process (or, if called by a thread, its manager — a
/// forked child is always a fresh single-thread process). Returns the
/// child's pid to the parent; the child itself resumes via `forkret` with
/// trapframe `a0 == 0`.
pub unsafe fn fork() -> Result<i32, KernelError> {
    let parent_index = {
        let guard = PTABLE.lock();
        let me = current_index().expect("fork with no current process");
        guard.get(me).manager.unwrap_or(me)
    };

    let child_index = alloc()?;

    let (parent_pagetable, parent_size) = {
        let guard = PTABLE.lock();
        let p = guard.get(parent_index);
        (p.pagetable, p.size)
    };
    let child_pagetable = PTABLE.lock().get(child_index).pagetable;

    if uvmcopy(parent_pagetable, child_pagetable, parent_size) < 0 {
        let mut guard = PTABLE.lock();
        free_locked(&mut guard, child_index);
        return Err(KernelError::Allocation);
    }

    {
        let mut guard = PTABLE.lock();
        let (parent, child) = guard.get_two_mut(parent_index, child_index);
        child.size = parent_size;
        *child.trapframe = *parent.trapframe;
        (*child.trapframe).a0 = 0;

        for (i, file) in parent.open_files.iter().enumerate() {
            if !file.is_null() {
                child.open_files[i] = filedup(parent.open_files[i]);
            }
        }
        child.current_dir = idup(parent.current_dir);
        child.name = parent.name;
    }

    let pid = {
        let mut guard = PTABLE.lock();
        guard.get_mut(child_index).parent = Some(parent_index);
        guard.get_mut(child_index).state = ProcessState::Runnable;
        guard.get(child_index).pid
    };

    Ok(pid)
}

/// Gives every process parented to `index` to `init`, waking it if any of
/// them are already zombies. Caller holds the table lock.
fn reparent_locked(table: &mut ProcessTable, index: ProcIndex) {
    let initproc = table.initproc;
    for i in 0..table.slots.len() {
        if table.slots[i].parent == Some(index) {
            table.slots[i].parent = initproc;
        }
    }
    if let Some(init) = initproc {
        let chan = init as *mut core::ffi::c_void;
        wakeup_locked(table, chan);
    }
}

/// Exits the calling entity, which may be a thread-group manager or a
/// thread. See the module-level notes on thread groups: a thread's exit
/// kills its whole group; a manager's exit also kills any surviving
/// siblings and reaps whichever are already zombies before becoming a
/// zombie itself.
pub unsafe fn exit(status: i32) -> ! {
    let index = current_index().expect("exit with no current process");

    {
        let guard = PTABLE.lock();
        if guard.initproc == Some(index) {
            panic!("init exiting");
        }
    }

    {
        let mut guard = PTABLE.lock();
        for file in guard.get_mut(index).open_files.iter_mut() {
            if !file.is_null() {
                fileclose(*file);
                *file = null_mut();
            }
        }
    }

    {
        let _operation = LogOperation::new();
        let dir = PTABLE.lock().get(index).current_dir;
        iput(dir);
    }
    PTABLE.lock().get_mut(index).current_dir = null_mut();

    let mut guard = PTABLE.lock();

    // If this was a stride manager, return its ticket share to the pool.
    if guard.get(index).is_manager() && guard.get(index).under_stride() {
        guard.heap.pop();
        let portion = guard.get(index).portion;
        guard.stride_tickets -= portion;
    }

    let manager_index = guard.get(index).manager.unwrap_or(index);

    // Tear down the rest of the thread group: kill any surviving peer, reap
    // any peer already zombie, recycling its user-stack base for reuse.
    for i in 0..guard.slots.len() {
        if i == index || i == manager_index || guard.slots[i].manager != Some(manager_index) {
            continue;
        }
        if guard.slots[i].state == ProcessState::Zombie {
            reap_thread_locked(&mut guard, manager_index, i);
        } else {
            guard.slots[i].killed = true;
            if guard.slots[i].state == ProcessState::Sleeping {
                guard.slots[i].state = ProcessState::Runnable;
            }
        }
    }

    if index == manager_index {
        // Manager exiting: wake the parent (who may be in wait_for_child).
        reparent_locked(&mut guard, index);
        if let Some(parent) = guard.get(index).parent {
            let chan = parent as *mut core::ffi::c_void;
            wakeup_locked(&mut guard, chan);
        }
    } else {
        // Thread exiting: force the whole group down with it.
        guard.slots[manager_index].killed = true;
        let chan = manager_index as *mut core::ffi::c_void;
        wakeup_locked(&mut guard, chan);
    }

    guard.slots[index].exit_status = status;
    guard.slots[index].state = ProcessState::Zombie;

    let _ = sched(guard, index);
    unreachable!("exited process was rescheduled");
}

/// Reaps a zombie group member other than the manager: frees its kernel
/// stack and user-stack pages, recycles the base address, and zeroes its
/// slot. The manager's page table and address-space size survive (they are
/// freed once, by `wait_for_child`, when the whole group is finally gone).
fn reap_thread_locked(table: &mut ProcessTable, manager_index: ProcIndex, thread_index: ProcIndex) {
    let kernel_stack = table.slots[thread_index].kernel_stack;
    if kernel_stack != 0 {
        unsafe { kfree(kernel_stack as *mut u8) };
    }
    let trapframe = table.slots[thread_index].trapframe;
    if !trapframe.is_null() {
        unsafe { kfree(trapframe.cast()) };
    }
    // User-stack pages are reclaimed from the shared page table by the
    // out-of-scope VM layer; this subsystem only recycles the base address
    // bookkeeping and decrements the manager's live-thread counter.
    let _ = table.slots[manager_index]
        .stack
        .push_back(thread_base_hint(table, thread_index));
    table.slots[manager_index].nexttid -= 1;
    table.slots[thread_index].reset_to_unused();
}

/// Best-effort recovery of a reaped thread's stack base for recycling. The
/// trapframe's saved stack pointer was set up by `thread::thread_create` to
/// point partway down that thread's two-page (guard + usable) stack; walking
/// back to the containing page pair recovers the base `thread_create` handed
/// out, matching the computation `thread::thread_join` does on its own reap
/// path so either one recycles the same address.
fn thread_base_hint(table: &ProcessTable, thread_index: ProcIndex) -> u64 {
    let tf = table.slots[thread_index].trapframe;
    if tf.is_null() {
        0
    } else {
        unsafe { (*tf).sp - (*tf).sp % PGSIZE - PGSIZE }
    }
}

/// Blocks until a child of the calling manager becomes a zombie, reaps it,
/// and returns its pid. `addr`, if non-zero, is a user address to copy the
/// child's exit status into.
pub unsafe fn wait_for_child(addr: u64) -> Result<i32, KernelError> {
    let index = current_index().expect("wait with no current process");
    let mut guard = PTABLE.lock();

    loop {
        let mut has_children = false;

        for i in 0..guard.slots.len() {
            if guard.slots[i].parent != Some(index) {
                continue;
            }
            has_children = true;

            if guard.slots[i].state == ProcessState::Zombie {
                let pid = guard.slots[i].pid;
                let exit_status = guard.slots[i].exit_status;
                let child_pagetable = guard.slots[i].pagetable;
                let child_size = guard.slots[i].size;
                let self_pagetable = guard.slots[index].pagetable;

                if addr != 0 {
                    let mut status = exit_status;
                    if copyout(
                        self_pagetable,
                        addr,
                        addr_of_mut!(status).cast(),
                        core::mem::size_of::<i32>() as u64,
                    ) < 0
                    {
                        return Err(KernelError::PageError);
                    }
                }

                let kernel_stack = guard.slots[i].kernel_stack;
                if kernel_stack != 0 {
                    kfree(kernel_stack as *mut u8);
                }
                let trapframe = guard.slots[i].trapframe;
                if !trapframe.is_null() {
                    kfree(trapframe.cast());
                }
                guard.slots[i].reset_to_unused();
                free_pagetable(child_pagetable, child_size);

                return Ok(pid);
            }
        }

        if !has_children {
            return Err(KernelError::NoChildren);
        }
        if guard.slots[index].killed {
            return Err(KernelError::Killed);
        }

        let chan = index as *mut core::ffi::c_void;
        guard = sleep_holding_table(guard, chan);
    }
}

/// Finds the process with the given pid and marks it killed, waking it if
/// it is sleeping. Returns `true` if a matching process was found.
pub unsafe fn kill(pid: i32) -> bool {
    let mut guard = PTABLE.lock();
    for p in guard.slots.iter_mut() {
        if p.pid == pid {
            p.killed = true;
            if p.state == ProcessState::Sleeping {
                p.state = ProcessState::Runnable;
            }
            return true;
        }
    }
    false
}

/// Allocates `set_cpu_share(percent)` to the calling manager, rejecting
/// non-positive shares and anything that would push the pool past the cap.
pub unsafe fn set_cpu_share(percent: i32) -> Result<(), KernelError> {
    if percent <= 0 {
        return Err(KernelError::InvalidShare);
    }

    let index = current_index().expect("set_cpu_share with no current process");
    let mut guard = PTABLE.lock();

    if !guard.get(index).is_manager() {
        return Err(KernelError::NotManager);
    }
    if percent + guard.stride_tickets > crate::param::MAX_STRIDE_TICKETS {
        return Err(KernelError::InvalidShare);
    }

    guard.stride_tickets += percent;
    let pass = guard.heap.peek().unwrap_or(0);
    guard.heap.push(pass);

    let p = guard.get_mut(index);
    p.pass_value = pass;
    p.stride = crate::param::STRIDE_NUMERATOR / percent;
    p.portion = percent;

    Ok(())
}

/// Returns the calling process's MLFQ level, or `None` if it is under stride.
pub unsafe fn getlev() -> Option<usize> {
    let index = current_index().expect("getlev with no current process");
    let guard = PTABLE.lock();
    let p = guard.get(index);
    if p.under_stride() {
        None
    } else {
        Some(p.level)
    }
}

/// Builds the very first process: a single-thread manager running the
/// embedded init program, installed as `PTABLE.initproc` so every orphan
/// eventually reparents to it. Called once, from kernel bring-up, before the
/// scheduler starts on any hart.
pub unsafe fn userinit() {
    let index = alloc().expect("userinit: alloc");

    let pagetable = PTABLE.lock().get(index).pagetable;
    uvmfirst(pagetable, addr_of!(INITCODE).cast_mut().cast(), INITCODE_SIZE);

    let mut guard = PTABLE.lock();
    let p = guard.get_mut(index);
    p.size = PGSIZE;
    (*p.trapframe).epc = 0;
    (*p.trapframe).sp = PGSIZE;

    let name = b"initcode\0";
    for (slot, byte) in p.name.iter_mut().zip(name.iter()) {
        *slot = *byte as core::ffi::c_char;
    }

    drop(guard);
    let current_dir = crate::fs::namei(b"/\0".as_ptr().cast_mut());
    let mut guard = PTABLE.lock();
    let p = guard.get_mut(index);
    p.current_dir = current_dir;
    p.state = ProcessState::Runnable;

    guard.initproc = Some(index);
}

/// Debug dump of every non-`Unused` process, printed to the UART directly
/// (no lock taken, so it still works on a wedged machine).
pub unsafe fn procdump() {
    uprintln!("\nprocdump:");
    let guard = PTABLE.lock();
    for p in guard.slots.iter() {
        if p.state != ProcessState::Unused {
            uprintln!("    {} tid={}: {:?} level={}", p.pid, p.tid, p.state, p.level);
        }
    }
}
