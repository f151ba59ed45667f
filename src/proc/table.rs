//! The process table: the single lock that serializes every scheduling
//! mutation (process-table membership, the stride heap, and `stride_tickets`
//! all co-vary and are guarded together, per the subsystem's design notes).

use super::{pcb::Pcb, pcb::ProcIndex, pcb::ProcessState, stride::StrideHeap};
use crate::{param::NPROC, sync::spinmutex::SpinMutex};

pub struct ProcessTable {
    pub slots: [Pcb; NPROC],
    pub stride_tickets: i32,
    pub heap: StrideHeap,
    next_pid: i32,
    pub initproc: Option<ProcIndex>,
}

impl ProcessTable {
    pub(crate) const fn new() -> ProcessTable {
        // MaybeUninit-free array init: Pcb::new() is const and has no Drop,
        // so a const array literal works directly.
        ProcessTable {
            slots: [const { Pcb::new() }; NPROC],
            stride_tickets: 0,
            heap: StrideHeap::new(),
            next_pid: 1,
            initproc: None,
        }
    }

    fn alloc_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Finds a free slot, reserves it (state -> Embryo, fresh pid), and
    /// returns its index. Scheduling fields are already zeroed by
    /// `Pcb::reset_to_unused`/`Pcb::new`; only pid/state change here.
    pub fn alloc_slot(&mut self) -> Result<ProcIndex, super::pcb::KernelError> {
        let index = self
            .slots
            .iter()
            .position(|p| p.state == ProcessState::Unused)
            .ok_or(super::pcb::KernelError::MaxProcesses)?;

        let pid = self.alloc_pid();
        let p = &mut self.slots[index];
        p.state = ProcessState::Embryo;
        p.pid = pid;
        Ok(index)
    }

    pub fn get(&self, index: ProcIndex) -> &Pcb {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: ProcIndex) -> &mut Pcb {
        &mut self.slots[index]
    }

    /// Splits a mutable borrow of two distinct slots. Panics if `a == b`.
    pub fn get_two_mut(&mut self, a: ProcIndex, b: ProcIndex) -> (&mut Pcb, &mut Pcb) {
        assert_ne!(a, b, "get_two_mut called with equal indices");
        if a < b {
            let (left, right) = self.slots.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.slots.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }
}

pub static PTABLE: SpinMutex<ProcessTable> = SpinMutex::new(ProcessTable::new());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_slot_assigns_ascending_pids_and_embryo_state() {
        let mut table = ProcessTable::new();
        let a = table.alloc_slot().unwrap();
        let b = table.alloc_slot().unwrap();
        assert_ne!(a, b);
        assert_eq!(table.slots[a].state, ProcessState::Embryo);
        assert!(table.slots[b].pid > table.slots[a].pid);
    }

    #[test]
    fn alloc_slot_reuses_freed_slots() {
        let mut table = ProcessTable::new();
        let a = table.alloc_slot().unwrap();
        table.slots[a].state = ProcessState::Unused;
        let b = table.alloc_slot().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_slot_fails_when_table_is_full() {
        let mut table = ProcessTable::new();
        for _ in 0..NPROC {
            table.alloc_slot().unwrap();
        }
        assert_eq!(
            table.alloc_slot(),
            Err(super::super::pcb::KernelError::MaxProcesses)
        );
    }

    #[test]
    fn get_two_mut_returns_distinct_slots_either_order() {
        let mut table = ProcessTable::new();
        table.slots[2].pid = 20;
        table.slots[5].pid = 50;

        let (a, b) = table.get_two_mut(2, 5);
        assert_eq!(a.pid, 20);
        assert_eq!(b.pid, 50);

        let (b2, a2) = table.get_two_mut(5, 2);
        assert_eq!(a2.pid, 20);
        assert_eq!(b2.pid, 50);
    }

    #[test]
    #[should_panic(expected = "get_two_mut called with equal indices")]
    fn get_two_mut_panics_on_equal_indices() {
        let mut table = ProcessTable::new();
        table.get_two_mut(3, 3);
    }
}
