//! Process and thread management: the hybrid MLFQ/stride scheduler, the
//! process table, and the light-weight thread (LWP) facility built on top of
//! it.
//!
//! Every mutation of process-table state funnels through a single lock,
//! [`table::PTABLE`]; the submodules here are organized around that
//! invariant rather than around one-struct-per-file.

pub mod context;
pub mod cpu;
pub mod lifecycle;
pub mod pcb;
pub mod scheduler;
pub mod stride;
pub mod table;
pub mod thread;
pub mod trapframe;

pub use context::Context;
pub use cpu::Cpu;
pub use pcb::{KernelError, Pcb, ProcIndex, ProcessState};
pub use table::PTABLE;
pub use trapframe::Trapframe;

/// Returns the process-table slot of whatever is running on this hart, if
/// anything.
pub unsafe fn current_index() -> Option<ProcIndex> {
    scheduler::current_index()
}

/// Locks the process table and hands the current hart's PCB to `f`.
///
/// Panics if this hart has nothing scheduled, which should never happen
/// outside of early boot before the scheduler has started a process.
pub unsafe fn with_current<R>(f: impl FnOnce(&mut Pcb) -> R) -> R {
    let index = current_index().expect("with_current: no process scheduled on this hart");
    let mut guard = PTABLE.lock();
    f(guard.get_mut(index))
}

/// The pid of whatever is running on this hart.
pub unsafe fn current_pid() -> i32 {
    with_current(|p| p.pid)
}
