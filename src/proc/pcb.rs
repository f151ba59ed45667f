//! The process control block and the states/errors it moves through.

use super::{context::Context, trapframe::Trapframe};
use crate::{arch::riscv::Pagetable, fs::file::File, fs::inode::Inode, queue::Queue};
use core::ptr::null_mut;

/// Index of a process-table slot. Stable for the lifetime of the slot's
/// occupant; never dereferenced once the slot returns to `Unused`.
pub type ProcIndex = usize;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum ProcessState {
    #[default]
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum KernelError {
    /// No free process-table slot.
    MaxProcesses,
    /// A physical page or kernel stack could not be allocated.
    Allocation,
    /// wait() called with no outstanding children.
    NoChildren,
    /// The calling entity was killed while blocked.
    Killed,
    /// A page-table operation (map/copy) failed.
    PageError,
    /// thread_join named a tid that is not a live member of the caller's group.
    NoSuchThread,
    /// An operation that only a manager may perform was invoked by a thread.
    NotManager,
    /// An operation that only a thread may perform was invoked by a manager.
    NotThread,
    /// set_cpu_share asked for a non-positive share, or one that would push
    /// total stride tickets past the cap.
    InvalidShare,
}

/// One schedulable entity: either the manager of a thread group (`tid == 0`,
/// owns the page table and address-space size) or a light-weight thread
/// within a group (`tid > 0`, shares its manager's page table).
/// All fields below are guarded by the process table lock (`proc::table::PTABLE`);
/// there is no finer-grained per-process lock. Every operation in
/// `proc::lifecycle`/`proc::thread`/`proc::scheduler` takes the table lock for
/// its whole critical section, matching the single-serialization-point design
/// this subsystem requires.
#[repr(C)]
pub struct Pcb {
    pub state: ProcessState,
    pub chan: *mut core::ffi::c_void,
    pub killed: bool,
    pub exit_status: i32,
    pub pid: i32,

    // Guarded by the process table lock.
    pub parent: Option<ProcIndex>,

    // Scheduling fields, guarded by the process table lock (the same lock
    // that guards the stride heap and stride_tickets, since they co-vary).
    /// MLFQ level, 0 (highest) .. MLFQ_LEVELS - 1. Meaningless under stride.
    pub level: usize,
    /// Ticks consumed at the current level since the last quantum reset.
    pub ticks: u32,
    /// Ticks consumed at the current level since the last promotion or boost.
    pub runtime: u32,
    /// -1 when scheduled by MLFQ; otherwise this manager's current stride pass.
    pub pass_value: i32,
    /// 1000 / portion; 0 when not under stride.
    pub stride: i32,
    /// Percent of CPU reserved via set_cpu_share; 0 when not under stride.
    pub portion: i32,

    // Thread-group fields.
    /// 0 for a manager; > 0 for a thread within a group.
    pub tid: i32,
    /// Index of this entity's manager (itself, if this is a manager).
    pub manager: Option<ProcIndex>,
    /// Next tid to hand out; meaningful on managers only.
    pub nexttid: i32,
    /// Recycled user-stack base addresses; meaningful on managers only.
    pub stack: Queue<u64>,
    /// Value passed to thread_exit, read back by thread_join.
    pub retval: u64,

    // Private to the process; `lock` need not be held.
    pub kernel_stack: u64,
    /// Address-space high-water mark. Authoritative only on the manager.
    pub size: u64,
    pub pagetable: Pagetable,
    pub trapframe: *mut Trapframe,
    pub context: Context,
    pub open_files: [*mut File; crate::param::NOFILE],
    pub current_dir: *mut Inode,
    pub name: [core::ffi::c_char; 16],
}

impl Pcb {
    pub const fn new() -> Pcb {
        Pcb {
            state: ProcessState::Unused,
            chan: null_mut(),
            killed: false,
            exit_status: 0,
            pid: 0,
            parent: None,
            level: 0,
            ticks: 0,
            runtime: 0,
            pass_value: -1,
            stride: 0,
            portion: 0,
            tid: 0,
            manager: None,
            nexttid: 1,
            stack: Queue::new(),
            retval: 0,
            kernel_stack: 0,
            size: 0,
            pagetable: null_mut(),
            trapframe: null_mut(),
            context: Context::new(),
            open_files: [null_mut(); crate::param::NOFILE],
            current_dir: null_mut(),
            name: [0; 16],
        }
    }

    pub fn is_manager(&self) -> bool {
        self.tid == 0
    }

    pub fn under_stride(&self) -> bool {
        self.pass_value != -1
    }

    /// Resets every field that must not leak across reuse of this slot.
    /// Caller holds the process table lock.
    pub fn reset_to_unused(&mut self) {
        self.state = ProcessState::Unused;
        self.chan = null_mut();
        self.killed = false;
        self.exit_status = 0;
        self.pid = 0;
        self.parent = None;
        self.level = 0;
        self.ticks = 0;
        self.runtime = 0;
        self.pass_value = -1;
        self.stride = 0;
        self.portion = 0;
        self.tid = 0;
        self.manager = None;
        self.nexttid = 1;
        self.stack = Queue::new();
        self.retval = 0;
        self.kernel_stack = 0;
        self.size = 0;
        self.pagetable = null_mut();
        self.trapframe = null_mut();
        self.name[0] = 0;
    }
}

impl Default for Pcb {
    fn default() -> Pcb {
        Pcb::new()
    }
}
