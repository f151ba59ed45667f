use super::{context::Context, pcb::ProcIndex};
use crate::arch::riscv::asm::r_tp;

extern "C" {
    pub static mut cpus: [Cpu; crate::param::NCPU];
}

/// Per-CPU scheduler state.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct Cpu {
    /// Index of the process table slot currently running on this CPU, if any.
    pub proc: Option<ProcIndex>,
    /// swtch() here to enter scheduler()
    pub context: Context,
    /// Depth of push_intr_off() nesting.
    pub interrupt_disable_layers: i32,
    /// Were interrupts enabled before the first push_intr_off()?
    pub previous_interrupts_enabled: i32,
}
impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            proc: None,
            context: Context::new(),
            interrupt_disable_layers: 0,
            previous_interrupts_enabled: 0,
        }
    }
}
impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}

/// Must be called with interrupts disabled to prevent a race with this
/// kernel thread being moved to a different CPU mid-read.
pub unsafe fn cpuid() -> i32 {
    r_tp() as i32
}

/// Returns a pointer to this hart's `Cpu` struct. Interrupts must be disabled.
#[no_mangle]
pub unsafe extern "C" fn mycpu() -> *mut Cpu {
    let id = cpuid();
    core::ptr::addr_of_mut!(cpus[id as usize])
}

impl Cpu {
    /// Safe accessor equivalent to `mycpu()`, for use from the rest of the
    /// new-generation `proc` module.
    pub fn current() -> &'static mut Cpu {
        unsafe { &mut *mycpu() }
    }

    pub fn current_id() -> i32 {
        unsafe { cpuid() }
    }
}
