//! System-call ABI: argument fetching from a trapframe, the syscall number
//! table, and dispatch. `sys_*` externs are file-system and process-exec
//! syscalls whose C implementations are out of this subsystem's scope;
//! everything scheduling/LWP/sync-related is implemented directly here.

use crate::{
    arch::riscv::memlayout::QEMU_POWER,
    fs::{
        self,
        file::{self, File},
        log::LogOperation,
        stat::StatType,
    },
    mem::virtual_memory::{copyin, copyinstr},
    param::{MAXPATH, NOFILE},
    println,
    proc::{
        self, current_pid,
        lifecycle::{exit, fork, getlev, growproc, kill, set_cpu_share, wait_for_child},
        scheduler::r#yield,
        thread::{thread_create, thread_exit, thread_join},
        with_current,
    },
    string::strlen,
    sync::{condvar, mutex, rwlock, semaphore},
    trap::CLOCK_TICKS,
};
use core::{
    mem::size_of,
    ptr::{addr_of, addr_of_mut, null_mut},
};

extern "C" {
    fn sys_pipe() -> u64;
    fn sys_exec() -> u64;
    fn sys_fstat() -> u64;
    fn sys_chdir() -> u64;
    fn sys_open() -> u64;
    fn sys_mknod() -> u64;
    fn sys_unlink() -> u64;
    fn sys_link() -> u64;
    fn sys_mkdir() -> u64;
}

pub enum Syscall {
    Fork,
    Exit,
    Wait,
    Pipe,
    Read,
    Kill,
    Exec,
    Fstat,
    Chdir,
    Dup,
    Getpid,
    Sbrk,
    Sleep,
    Uptime,
    Open,
    Write,
    Mknod,
    Unlink,
    Link,
    Mkdir,
    Close,
    Shutdown,
    Getppid,
    Yield,
    Getlev,
    SetCpuShare,
    ThreadCreate,
    ThreadExit,
    ThreadJoin,
    MutexInit,
    MutexLock,
    MutexUnlock,
    CondInit,
    CondWait,
    CondSignal,
    XemInit,
    XemWait,
    XemUnlock,
    RwlockInit,
    AcquireReadlock,
    AcquireWritelock,
    ReleaseReadlock,
    ReleaseWritelock,
}
impl Syscall {
    pub unsafe fn call(&self) -> u64 {
        match self {
            Syscall::Fork => match fork() {
                Ok(pid) => pid as u64,
                Err(_) => -1i64 as u64,
            },
            Syscall::Exit => {
                let mut n = 0i32;
                argint(0, addr_of_mut!(n));
                exit(n)
            }
            Syscall::Wait => {
                let mut p = 0u64;
                argaddr(0, addr_of_mut!(p));
                match wait_for_child(p) {
                    Ok(pid) => pid as u64,
                    Err(_) => -1i64 as u64,
                }
            }
            Syscall::Pipe => sys_pipe(),
            Syscall::Read => {
                let mut file: *mut File = null_mut();
                let mut num_bytes: i32 = 0;
                let mut ptr: u64 = 0;

                if argfd(0, null_mut(), addr_of_mut!(file)) >= 0 {
                    argaddr(1, addr_of_mut!(ptr));
                    argint(2, addr_of_mut!(num_bytes));
                    file::fileread(file, ptr, num_bytes) as i64 as u64
                } else {
                    -1i64 as u64
                }
            }
            Syscall::Kill => {
                let mut pid = 0i32;
                argint(0, addr_of_mut!(pid));
                kill(pid) as u64
            }
            Syscall::Exec => sys_exec(),
            Syscall::Fstat => {
                let mut file: *mut File = null_mut();
                // User pointer to struct stat.
                let mut stat: u64 = 0;

                if argfd(0, null_mut(), addr_of_mut!(file)) >= 0 {
                    argaddr(1, addr_of_mut!(stat));
                    file::filestat(file, stat) as i64 as u64
                } else {
                    -1i64 as u64
                }
            }
            Syscall::Chdir => {
                let mut path = [0u8; MAXPATH];

                let _operation = LogOperation::new();

                if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
                    return -1i64 as u64;
                }
                let inode = fs::namei(addr_of_mut!(path).cast());
                if inode.is_null() {
                    return -1i64 as u64;
                }
                fs::ilock(inode);
                if (*inode).kind != StatType::Directory as i16 {
                    fs::iunlock(inode);
                    fs::iput(inode);
                    return -1i64 as u64;
                }
                fs::iunlock(inode);

                with_current(|p| {
                    fs::iput(p.current_dir);
                    p.current_dir = inode;
                });
                0
            }
            Syscall::Dup => {
                let mut file: *mut File = null_mut();

                if argfd(0, null_mut(), addr_of_mut!(file)) < 0 {
                    return -1i64 as u64;
                }

                let Ok(file_descriptor) = fdalloc(file) else {
                    return -1i64 as u64;
                };

                file::filedup(file);
                file_descriptor as u64
            }
            Syscall::Getpid => current_pid() as u64,
            Syscall::Sbrk => {
                let mut n = 0i32;
                argint(0, addr_of_mut!(n));
                let addr = with_current(|p| p.size);

                match growproc(n) {
                    Ok(()) => addr,
                    Err(_) => -1i64 as u64,
                }
            }
            Syscall::Sleep => {
                let mut n = 0i32;
                argint(0, addr_of_mut!(n));

                let target = {
                    let ticks = CLOCK_TICKS.lock();
                    *ticks + n as usize
                };

                while *CLOCK_TICKS.lock() < target {
                    if with_current(|p| p.killed) {
                        return -1i64 as u64;
                    }
                    crate::proc::scheduler::sleep(addr_of!(CLOCK_TICKS).cast_mut().cast());
                }
                0
            }
            // Returns how many clock tick interrupts have occured since start.
            Syscall::Uptime => *CLOCK_TICKS.lock() as u64,
            Syscall::Open => sys_open(),
            Syscall::Write => {
                let mut file: *mut File = null_mut();
                let mut num_bytes: i32 = 0;
                let mut ptr: u64 = 0;

                if argfd(0, null_mut(), addr_of_mut!(file)) >= 0 {
                    argaddr(1, addr_of_mut!(ptr));
                    argint(2, addr_of_mut!(num_bytes));
                    file::filewrite(file, ptr, num_bytes) as i64 as u64
                } else {
                    -1i64 as u64
                }
            }

            Syscall::Mknod => sys_mknod(),
            Syscall::Unlink => sys_unlink(),
            Syscall::Link => sys_link(),
            Syscall::Mkdir => sys_mkdir(),
            Syscall::Close => {
                let mut file_descriptor: i32 = 0;
                let mut file: *mut File = null_mut();

                if argfd(0, addr_of_mut!(file_descriptor), addr_of_mut!(file)) >= 0 {
                    with_current(|p| p.open_files[file_descriptor as usize] = null_mut());
                    file::fileclose(file);
                    0
                } else {
                    -1i64 as u64
                }
            }
            Syscall::Shutdown => {
                let qemu_power = QEMU_POWER as *mut u32;
                qemu_power.write_volatile(0x5555u32);
                panic!("shutdown");
            }

            // --- Scheduling, threads, and user-space synchronization ---
            Syscall::Getppid => with_current(|p| p.parent)
                .map(|parent_index| {
                    let table = proc::PTABLE.lock();
                    table.get(parent_index).pid
                })
                .unwrap_or(-1) as u64,
            Syscall::Yield => {
                r#yield();
                0
            }
            Syscall::Getlev => getlev().map(|l| l as i64).unwrap_or(-1) as u64,
            Syscall::SetCpuShare => {
                let mut percent = 0i32;
                argint(0, addr_of_mut!(percent));
                match set_cpu_share(percent) {
                    Ok(()) => 0,
                    Err(_) => -1i64 as u64,
                }
            }
            Syscall::ThreadCreate => {
                let mut out_tid_ptr = 0u64;
                let mut start_routine = 0u64;
                let mut arg = 0u64;
                argaddr(0, addr_of_mut!(out_tid_ptr));
                argaddr(1, addr_of_mut!(start_routine));
                argaddr(2, addr_of_mut!(arg));
                result_code(thread_create(out_tid_ptr, start_routine, arg))
            }
            Syscall::ThreadExit => {
                let mut retval = 0u64;
                argaddr(0, addr_of_mut!(retval));
                let _ = thread_exit(retval);
                0
            }
            Syscall::ThreadJoin => {
                let mut tid = 0i32;
                let mut out_retval_ptr = 0u64;
                argint(0, addr_of_mut!(tid));
                argaddr(1, addr_of_mut!(out_retval_ptr));
                result_code(thread_join(tid, out_retval_ptr))
            }
            Syscall::MutexInit => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(mutex::mutex_init(addr))
            }
            Syscall::MutexLock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(mutex::mutex_lock(addr))
            }
            Syscall::MutexUnlock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(mutex::mutex_unlock(addr))
            }
            Syscall::CondInit => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(condvar::cond_init(addr))
            }
            Syscall::CondWait => {
                let mut cond_addr = 0u64;
                let mut lock_addr = 0u64;
                argaddr(0, addr_of_mut!(cond_addr));
                argaddr(1, addr_of_mut!(lock_addr));
                result_code(condvar::cond_wait(cond_addr, lock_addr))
            }
            Syscall::CondSignal => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(condvar::cond_signal(addr))
            }
            Syscall::XemInit => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(semaphore::xem_init(addr))
            }
            Syscall::XemWait => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(semaphore::xem_wait(addr))
            }
            Syscall::XemUnlock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(semaphore::xem_unlock(addr))
            }
            Syscall::RwlockInit => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(rwlock::rwlock_init(addr))
            }
            Syscall::AcquireReadlock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(rwlock::acquire_readlock(addr))
            }
            Syscall::AcquireWritelock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(rwlock::acquire_writelock(addr))
            }
            Syscall::ReleaseReadlock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(rwlock::release_readlock(addr))
            }
            Syscall::ReleaseWritelock => {
                let mut addr = 0u64;
                argaddr(0, addr_of_mut!(addr));
                result_code(rwlock::release_writelock(addr))
            }
        }
    }
}

/// Collapses a `Result<(), KernelError>` to the raw 0/-1 ABI every syscall
/// returns across the trapframe's a0.
fn result_code(result: Result<(), crate::proc::KernelError>) -> u64 {
    match result {
        Ok(()) => 0,
        Err(_) => -1i64 as u64,
    }
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> core::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Syscall::Fork),
            2 => Ok(Syscall::Exit),
            3 => Ok(Syscall::Wait),
            4 => Ok(Syscall::Pipe),
            5 => Ok(Syscall::Read),
            6 => Ok(Syscall::Kill),
            7 => Ok(Syscall::Exec),
            8 => Ok(Syscall::Fstat),
            9 => Ok(Syscall::Chdir),
            10 => Ok(Syscall::Dup),
            11 => Ok(Syscall::Getpid),
            12 => Ok(Syscall::Sbrk),
            13 => Ok(Syscall::Sleep),
            14 => Ok(Syscall::Uptime),
            15 => Ok(Syscall::Open),
            16 => Ok(Syscall::Write),
            17 => Ok(Syscall::Mknod),
            18 => Ok(Syscall::Unlink),
            19 => Ok(Syscall::Link),
            20 => Ok(Syscall::Mkdir),
            21 => Ok(Syscall::Close),
            22 => Ok(Syscall::Shutdown),
            23 => Ok(Syscall::Getppid),
            24 => Ok(Syscall::Yield),
            25 => Ok(Syscall::Getlev),
            26 => Ok(Syscall::SetCpuShare),
            27 => Ok(Syscall::ThreadCreate),
            28 => Ok(Syscall::ThreadExit),
            29 => Ok(Syscall::ThreadJoin),
            30 => Ok(Syscall::MutexInit),
            31 => Ok(Syscall::MutexLock),
            32 => Ok(Syscall::MutexUnlock),
            33 => Ok(Syscall::CondInit),
            34 => Ok(Syscall::CondWait),
            35 => Ok(Syscall::CondSignal),
            36 => Ok(Syscall::XemInit),
            37 => Ok(Syscall::XemWait),
            38 => Ok(Syscall::XemUnlock),
            39 => Ok(Syscall::RwlockInit),
            40 => Ok(Syscall::AcquireReadlock),
            41 => Ok(Syscall::AcquireWritelock),
            42 => Ok(Syscall::ReleaseReadlock),
            43 => Ok(Syscall::ReleaseWritelock),
            _ => Err(()),
        }
    }
}
impl From<Syscall> for usize {
    fn from(syscall: Syscall) -> usize {
        match syscall {
            Syscall::Fork => 1,
            Syscall::Exit => 2,
            Syscall::Wait => 3,
            Syscall::Pipe => 4,
            Syscall::Read => 5,
            Syscall::Kill => 6,
            Syscall::Exec => 7,
            Syscall::Fstat => 8,
            Syscall::Chdir => 9,
            Syscall::Dup => 10,
            Syscall::Getpid => 11,
            Syscall::Sbrk => 12,
            Syscall::Sleep => 13,
            Syscall::Uptime => 14,
            Syscall::Open => 15,
            Syscall::Write => 16,
            Syscall::Mknod => 17,
            Syscall::Unlink => 18,
            Syscall::Link => 19,
            Syscall::Mkdir => 20,
            Syscall::Close => 21,
            Syscall::Shutdown => 22,
            Syscall::Getppid => 23,
            Syscall::Yield => 24,
            Syscall::Getlev => 25,
            Syscall::SetCpuShare => 26,
            Syscall::ThreadCreate => 27,
            Syscall::ThreadExit => 28,
            Syscall::ThreadJoin => 29,
            Syscall::MutexInit => 30,
            Syscall::MutexLock => 31,
            Syscall::MutexUnlock => 32,
            Syscall::CondInit => 33,
            Syscall::CondWait => 34,
            Syscall::CondSignal => 35,
            Syscall::XemInit => 36,
            Syscall::XemWait => 37,
            Syscall::XemUnlock => 38,
            Syscall::RwlockInit => 39,
            Syscall::AcquireReadlock => 40,
            Syscall::AcquireWritelock => 41,
            Syscall::ReleaseReadlock => 42,
            Syscall::ReleaseWritelock => 43,
        }
    }
}

/// Fetch the u64 at addr from the current process.
#[no_mangle]
pub unsafe extern "C" fn fetchaddr(addr: u64, ip: *mut u64) -> i32 {
    let (pagetable, size) = with_current(|p| (p.pagetable, p.size));

    // Both tests needed, in case of overflow.
    if addr >= size
        || addr + size_of::<u64>() as u64 > size
        || copyin(pagetable, ip.cast(), addr, size_of::<*mut u64>() as u64) != 0
    {
        -1
    } else {
        0
    }
}

/// Fetch the null-terminated string at addr from the current process.
///
/// Returns length of string, not including null, or -1 for error.
#[no_mangle]
pub unsafe extern "C" fn fetchstr(addr: u64, buf: *mut u8, max: i32) -> i32 {
    let pagetable = with_current(|p| p.pagetable);
    if copyinstr(pagetable, buf, addr, max as u64) < 0 {
        -1
    } else {
        strlen(buf.cast())
    }
}

/// Allocate a file descriptor for the given file.
/// Takes over file reference from caller on success.
unsafe fn fdalloc(file: *mut File) -> Result<usize, ()> {
    with_current(|p| {
        for file_descriptor in 0..NOFILE {
            if p.open_files[file_descriptor].is_null() {
                p.open_files[file_descriptor] = file;
                return Ok(file_descriptor);
            }
        }
        Err(())
    })
}

unsafe fn argraw(argument_index: usize) -> u64 {
    let trapframe = with_current(|p| p.trapframe);
    match argument_index {
        0 => (*trapframe).a0,
        1 => (*trapframe).a1,
        2 => (*trapframe).a2,
        3 => (*trapframe).a3,
        4 => (*trapframe).a4,
        5 => (*trapframe).a5,
        _ => panic!("argraw"),
    }
}

/// Fetch the n-th 32-bit syscall argument.
#[no_mangle]
pub unsafe extern "C" fn argint(n: i32, ip: *mut i32) {
    *ip = argraw(n as usize) as i32;
}

/// Retrieve an argument as a pointer.
///
/// Doesn't check for legality, since
/// copyin/copyout will do that.
#[no_mangle]
pub unsafe extern "C" fn argaddr(n: i32, ip: *mut u64) {
    *ip = argraw(n as usize);
}

/// Fetch the n-th word-sized syscall argument as a file descriptor
/// and return both the descriptor and the corresponding struct file.
#[no_mangle]
pub unsafe extern "C" fn argfd(
    n: i32,
    file_descriptor_out: *mut i32,
    file_out: *mut *mut File,
) -> i32 {
    let file_descriptor = argraw(n as usize) as usize;
    if file_descriptor >= NOFILE {
        return -1;
    }

    let file: *mut File = with_current(|p| p.open_files[file_descriptor]);
    if file.is_null() {
        return -1;
    }

    if !file_descriptor_out.is_null() {
        *file_descriptor_out = file_descriptor as i32;
    }
    if !file_out.is_null() {
        *file_out = file;
    }
    0
}

/// Fetch the n-th word-sized syscall argument as a null-terminated string.
///
/// Copies into buf, at most max.
/// Returns string length if ok (including null), -1 if error.
#[no_mangle]
pub unsafe extern "C" fn argstr(n: i32, buf: *mut u8, max: i32) -> i32 {
    let mut addr = 0u64;
    argaddr(n, addr_of_mut!(addr));
    fetchstr(addr, buf, max)
}

pub unsafe fn syscall() {
    let (trapframe, pid) = with_current(|p| (p.trapframe, p.pid));
    let num = (*trapframe).a7;

    (*trapframe).a0 = match TryInto::<Syscall>::try_into(num as usize) {
        Ok(syscall) => syscall.call(),
        Err(_) => {
            println!("{} unknown syscall {}", pid, num);
            -1i64 as u64
        }
    };
}
