//! The per-CPU dispatch loop and the sleep/wakeup primitives it rests on.
//!
//! Every scheduling decision — MLFQ accounting, stride pass updates, the
//! 100-slot hybrid wheel, priority_boost — happens here, under the single
//! process table lock (`PTABLE`). `sched()` is the only place that actually
//! gives up the CPU; everything else (yield, sleep, exit) arranges state and
//! calls into it.

use super::{
    cpu::Cpu,
    pcb::{Pcb, ProcIndex, ProcessState},
    table::{ProcessTable, PTABLE},
};
use crate::{
    arch::riscv::{intr_get, intr_on},
    param::{ALLOTMENT, MLFQ_LEVELS, PRIORITY_BOOST_INTERVAL_TICKS, QUANTUM, SCHEDULE_WHEEL_SIZE},
    sync::spinmutex::SpinMutexGuard,
};
use core::ffi::c_void;
use core::ptr::{addr_of_mut, null_mut};

extern "C" {
    fn swtch(a: *mut super::context::Context, b: *mut super::context::Context);
}

pub fn current_index() -> Option<ProcIndex> {
    Cpu::current().proc
}

/// Switches from the calling kernel thread back into this hart's scheduler
/// loop. Caller must already hold `guard` (the process table lock), must have
/// already moved `index` out of `Running`, and this hart's interrupt-disable
/// depth must be exactly 1 (held only by `guard`'s acquisition).
///
/// The lock is intentionally not released here: by the time `swtch` returns
/// control to this call, the scheduler loop has reacquired it on this
/// kernel thread's behalf, exactly as it held it when dispatching. The
/// `mem::forget` mirrors that handoff instead of fighting it.
pub unsafe fn sched(
    guard: SpinMutexGuard<'static, ProcessTable>,
    index: ProcIndex,
) -> SpinMutexGuard<'static, ProcessTable> {
    let cpu = Cpu::current();

    if cpu.interrupt_disable_layers != 1 {
        panic!("sched locks");
    } else if guard.slots[index].state == ProcessState::Running {
        panic!("sched running");
    } else if intr_get() > 0 {
        panic!("sched interruptible");
    }

    let previous_interrupts_enabled = cpu.previous_interrupts_enabled;
    let table_ptr = &*guard as *const ProcessTable as *mut ProcessTable;
    core::mem::forget(guard);

    swtch(
        addr_of_mut!((*table_ptr).slots[index].context),
        addr_of_mut!(cpu.context),
    );

    cpu.previous_interrupts_enabled = previous_interrupts_enabled;
    SpinMutexGuard { mutex: &PTABLE }
}

/// Gives up the CPU for one scheduling round without blocking.
pub unsafe fn r#yield() {
    let index = current_index().expect("yield with no current process");
    let mut guard = PTABLE.lock();
    guard.slots[index].state = ProcessState::Runnable;
    let _ = sched(guard, index);
}

/// Sleeps on `chan` until a matching `wakeup(chan)`. Must be called with the
/// process table lock held; releases it for the duration of the sleep and
/// reacquires it before returning, so the caller's critical section resumes
/// uninterrupted.
pub unsafe fn sleep_holding_table(
    mut guard: SpinMutexGuard<'static, ProcessTable>,
    chan: *mut c_void,
) -> SpinMutexGuard<'static, ProcessTable> {
    let index = current_index().expect("sleep with no current process");

    guard.slots[index].chan = chan;
    guard.slots[index].state = ProcessState::Sleeping;

    guard = sched(guard, index);

    guard.slots[index].chan = null_mut();
    guard
}

/// Convenience wrapper: acquires the table lock, sleeps, and releases it
/// again. For callers with no other lock to juggle.
pub unsafe fn sleep(chan: *mut c_void) {
    let guard = PTABLE.lock();
    let _ = sleep_holding_table(guard, chan);
}

/// Wakes every `Sleeping` process waiting on `chan`. Caller holds the table lock.
pub fn wakeup_locked(table: &mut ProcessTable, chan: *mut c_void) {
    for p in table.slots.iter_mut() {
        if p.state == ProcessState::Sleeping && p.chan == chan {
            p.state = ProcessState::Runnable;
        }
    }
}

pub unsafe fn wakeup(chan: *mut c_void) {
    let mut guard = PTABLE.lock();
    wakeup_locked(&mut guard, chan);
}

/// Wakes at most one `Sleeping` process waiting on `chan`. Caller holds the
/// table lock. Used where broadcast semantics would be wrong, such as
/// `Cond::signal`.
pub fn wakeup_one_locked(table: &mut ProcessTable, chan: *mut c_void) -> bool {
    match table
        .slots
        .iter_mut()
        .find(|p| p.state == ProcessState::Sleeping && p.chan == chan)
    {
        Some(p) => {
            p.state = ProcessState::Runnable;
            true
        }
        None => false,
    }
}

pub unsafe fn wakeup_one(chan: *mut c_void) {
    let mut guard = PTABLE.lock();
    wakeup_one_locked(&mut guard, chan);
}

/// Per-tick MLFQ bookkeeping for the process currently running on this hart.
/// Called from the clock interrupt handler before it decides whether to
/// preempt. Only processes scheduled by MLFQ (not under stride) participate.
/// Returns true if the quantum at the current level has been exhausted and
/// this process should yield.
pub fn account_tick(p: &mut Pcb) -> bool {
    if p.under_stride() {
        return false;
    }

    p.ticks += 1;
    p.runtime += 1;

    if p.level + 1 < MLFQ_LEVELS && p.runtime >= ALLOTMENT[p.level] {
        p.level += 1;
        p.ticks = 0;
        p.runtime = 0;
    }

    p.ticks >= QUANTUM[p.level]
}

/// Resets every process to MLFQ level 0 with a clean tick/runtime budget,
/// regardless of state. Run periodically from the clock interrupt so that
/// long-running high-level load cannot starve processes stuck at level 2.
pub fn priority_boost(table: &mut ProcessTable) {
    for p in table.slots.iter_mut() {
        p.level = 0;
        p.ticks = 0;
        p.runtime = 0;
    }
}

/// Called once per clock tick (on CPU 0, by convention — see `trap::clockintr`)
/// to decide whether a boost sweep is due.
pub fn maybe_priority_boost(table: &mut ProcessTable, ticks: u32) {
    if ticks % PRIORITY_BOOST_INTERVAL_TICKS == 0 {
        priority_boost(table);
    }
}

/// Finds the manager PCB whose `pass_value` equals the stride heap's current
/// minimum. Several managers may share a pass value; any one of them is an
/// acceptable pick under work-conserving proportional share.
fn find_stride_minimum(table: &ProcessTable, min_pass: i32) -> Option<ProcIndex> {
    table.slots.iter().position(|p| {
        p.state == ProcessState::Runnable && p.is_manager() && p.pass_value == min_pass
    })
}

/// Finds the Runnable MLFQ candidate at the lowest level (strict priority).
/// Scanning starts at `start` and wraps, which gives round-robin behavior
/// within a level across repeated calls since the cursor advances.
fn find_mlfq_candidate(table: &ProcessTable, start: usize) -> Option<ProcIndex> {
    let n = table.slots.len();
    let mut best: Option<ProcIndex> = None;

    for offset in 0..n {
        let i = (start + offset) % n;
        let p = &table.slots[i];
        if p.state != ProcessState::Runnable || p.under_stride() {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) if p.level < table.slots[b].level => best = Some(i),
            _ => {}
        }
    }
    best
}

/// The per-CPU scheduler loop: never returns. Alternates `stride_tickets` of
/// every 100 dispatch slots to stride scheduling and the rest to MLFQ, with
/// an escape hatch after `STARVATION_LIMIT` fruitless scans (see `param.rs`).
pub unsafe fn scheduler() -> ! {
    let cpu = Cpu::current();
    cpu.proc = None;
    let mut wheel_slot: u32 = 0;
    let mut rr_cursor: usize = 0;
    let mut sched_ticks: u32 = 0;

    loop {
        intr_on();

        let mut guard = PTABLE.lock();
        wheel_slot = (wheel_slot % SCHEDULE_WHEEL_SIZE) + 1;

        let mut dispatch = if wheel_slot <= guard.stride_tickets as u32 {
            guard
                .heap
                .peek()
                .and_then(|min_pass| find_stride_minimum(&guard, min_pass))
        } else {
            find_mlfq_candidate(&guard, rr_cursor)
        };

        if dispatch.is_none() {
            sched_ticks += 1;
            // The slot this round of the wheel belongs to has no eligible
            // candidate (e.g. an MLFQ slot while only stride managers are
            // runnable). Rather than spin the hart idle while other work is
            // ready, fall back to any runnable process once that has
            // persisted long enough to look like starvation rather than a
            // momentary policy mismatch.
            if sched_ticks > crate::param::STARVATION_LIMIT {
                dispatch = guard
                    .slots
                    .iter()
                    .position(|p| p.state == ProcessState::Runnable);
            }
        } else {
            sched_ticks = 0;
        }

        let Some(index) = dispatch else {
            drop(guard);
            continue;
        };

        // Only advance the stride heap when the dispatched candidate is
        // actually the entry at its minimum: the starvation fallback below
        // can hand back a stride manager that is runnable but *not* at
        // heap.peek() (or a plain MLFQ candidate), and popping here would
        // remove a different manager's entry, corrupting invariant §8.4
        // (heap == multiset of manager pass values).
        if guard.slots[index].is_manager()
            && guard.slots[index].under_stride()
            && guard.heap.peek() == Some(guard.slots[index].pass_value)
        {
            let popped = guard.heap.pop();
            debug_assert_eq!(popped, Some(guard.slots[index].pass_value));
            let stride = guard.slots[index].stride;
            guard.slots[index].pass_value += stride;
            let new_pass = guard.slots[index].pass_value;
            guard.heap.push(new_pass);
        }

        rr_cursor = (index + 1) % guard.slots.len();

        guard.slots[index].state = ProcessState::Running;
        cpu.proc = Some(index);

        let table_ptr = &*guard as *const ProcessTable as *mut ProcessTable;
        core::mem::forget(guard);

        swtch(
            addr_of_mut!(cpu.context),
            addr_of_mut!((*table_ptr).slots[index].context),
        );

        cpu.proc = None;
        // The thread we switched to left the table lock logically held (see
        // `sched`); reclaim the guard now that this hart owns it again.
        drop(SpinMutexGuard::<'static, ProcessTable> { mutex: &PTABLE });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::pcb::Pcb;

    /// Scenario: one process spins at level 0 with allotment[0] == 20. After
    /// exactly 20 scheduled ticks its level becomes 1 and ticks/runtime reset;
    /// after 40 more it reaches level 2 and stays there.
    #[test]
    fn account_tick_promotes_on_allotment_exhaustion() {
        let mut p = Pcb::new();
        p.state = ProcessState::Running;

        for _ in 0..19 {
            account_tick(&mut p);
        }
        assert_eq!(p.level, 0);
        assert_eq!(p.runtime, 19);

        account_tick(&mut p);
        assert_eq!(p.level, 1);
        assert_eq!(p.ticks, 0);
        assert_eq!(p.runtime, 0);

        for _ in 0..39 {
            account_tick(&mut p);
        }
        assert_eq!(p.level, 1);

        account_tick(&mut p);
        assert_eq!(p.level, 2);
        assert_eq!(p.runtime, 0);

        // Level 2 has no allotment; further ticks never promote further.
        for _ in 0..1000 {
            account_tick(&mut p);
        }
        assert_eq!(p.level, 2);
    }

    #[test]
    fn account_tick_signals_yield_at_quantum() {
        let mut p = Pcb::new();
        for i in 1..=QUANTUM[0] {
            let should_yield = account_tick(&mut p);
            assert_eq!(should_yield, i == QUANTUM[0]);
        }
    }

    #[test]
    fn account_tick_is_noop_under_stride() {
        let mut p = Pcb::new();
        p.pass_value = 0;
        assert!(!account_tick(&mut p));
        assert_eq!(p.ticks, 0);
        assert_eq!(p.runtime, 0);
    }

    /// Scenario: levels {2,2,2} with runtime {18,30,40} all reset to level 0,
    /// ticks == 0, runtime == 0 after a boost sweep, regardless of state.
    #[test]
    fn priority_boost_resets_every_slot() {
        let mut table = ProcessTable::new();
        for (i, runtime) in [18u32, 30, 40].into_iter().enumerate() {
            table.slots[i].level = 2;
            table.slots[i].runtime = runtime;
            table.slots[i].ticks = 3;
        }
        table.slots[0].state = ProcessState::Sleeping;

        priority_boost(&mut table);

        for p in table.slots.iter() {
            assert_eq!(p.level, 0);
            assert_eq!(p.ticks, 0);
            assert_eq!(p.runtime, 0);
        }
        assert_eq!(table.slots[0].state, ProcessState::Sleeping);
    }

    #[test]
    fn maybe_priority_boost_only_fires_on_cadence() {
        let mut table = ProcessTable::new();
        table.slots[0].level = 2;

        maybe_priority_boost(&mut table, PRIORITY_BOOST_INTERVAL_TICKS - 1);
        assert_eq!(table.slots[0].level, 2);

        maybe_priority_boost(&mut table, PRIORITY_BOOST_INTERVAL_TICKS);
        assert_eq!(table.slots[0].level, 0);
    }

    #[test]
    fn find_mlfq_candidate_prefers_strictly_lower_level() {
        let mut table = ProcessTable::new();
        table.slots[0].state = ProcessState::Runnable;
        table.slots[0].level = 2;
        table.slots[1].state = ProcessState::Runnable;
        table.slots[1].level = 0;
        table.slots[2].state = ProcessState::Runnable;
        table.slots[2].level = 1;

        assert_eq!(find_mlfq_candidate(&table, 0), Some(1));
    }

    #[test]
    fn find_mlfq_candidate_skips_stride_managers() {
        let mut table = ProcessTable::new();
        table.slots[0].state = ProcessState::Runnable;
        table.slots[0].pass_value = 0;
        table.slots[1].state = ProcessState::Runnable;
        table.slots[1].level = 1;

        assert_eq!(find_mlfq_candidate(&table, 0), Some(1));
    }

    #[test]
    fn find_stride_minimum_matches_by_pass_value_equality() {
        let mut table = ProcessTable::new();
        table.slots[0].state = ProcessState::Runnable;
        table.slots[0].tid = 0;
        table.slots[0].pass_value = 40;
        table.slots[1].state = ProcessState::Runnable;
        table.slots[1].tid = 0;
        table.slots[1].pass_value = 10;

        assert_eq!(find_stride_minimum(&table, 10), Some(1));
        assert_eq!(find_stride_minimum(&table, 999), None);
    }

    #[test]
    fn wakeup_locked_runs_only_matching_sleepers() {
        let mut table = ProcessTable::new();
        let chan = 0x1000 as *mut c_void;
        table.slots[0].state = ProcessState::Sleeping;
        table.slots[0].chan = chan;
        table.slots[1].state = ProcessState::Sleeping;
        table.slots[1].chan = 0x2000 as *mut c_void;

        wakeup_locked(&mut table, chan);

        assert_eq!(table.slots[0].state, ProcessState::Runnable);
        assert_eq!(table.slots[1].state, ProcessState::Sleeping);
    }

    #[test]
    fn wakeup_one_locked_wakes_at_most_one() {
        let mut table = ProcessTable::new();
        let chan = 0x1000 as *mut c_void;
        table.slots[0].state = ProcessState::Sleeping;
        table.slots[0].chan = chan;
        table.slots[1].state = ProcessState::Sleeping;
        table.slots[1].chan = chan;

        assert!(wakeup_one_locked(&mut table, chan));
        let woken = table
            .slots
            .iter()
            .filter(|p| p.state == ProcessState::Runnable)
            .count();
        assert_eq!(woken, 1);
        assert!(!wakeup_one_locked(&mut table, 0x3000 as *mut c_void));
    }
}
