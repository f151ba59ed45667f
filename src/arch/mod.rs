//! Architecture-specific glue. Everything above this module reaches
//! hardware through `arch::riscv` directly; there is only one target this
//! kernel builds for today, so no indirection layer sits in front of it.

pub mod riscv;
