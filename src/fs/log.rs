use crate::{fs::Superblock, io::buf::Buffer, sync::spinlock::Spinlock};

#[repr(C)]
pub struct LogHeader {
    pub n: i32,
    pub blocks: [i32; crate::param::LOGSIZE],
}
#[repr(C)]
pub struct Log {
    lock: Spinlock,
    start: i32,
    size: i32,
    /// How many FS syscalls are executing.
    outstanding: i32,
    /// In commit(), please wait.
    committing: i32,
    dev: i32,
    header: LogHeader,
}

extern "C" {
    pub static mut log: Log;
    pub fn initlog(dev: i32, superblock: *mut Superblock);
    pub fn begin_op();
    pub fn end_op();
    pub fn log_write(buffer: *mut Buffer);
}

/// RAII bracket around a filesystem transaction. Replaces the old
/// `begin_op(); ...; end_op();` pairing with a guard that calls `end_op` on
/// every exit path, including early returns and panics while unwinding.
pub struct LogOperation;

impl LogOperation {
    pub fn new() -> LogOperation {
        unsafe { begin_op() };
        LogOperation
    }
}

impl Default for LogOperation {
    fn default() -> LogOperation {
        LogOperation::new()
    }
}

impl Drop for LogOperation {
    fn drop(&mut self) {
        unsafe { end_op() };
    }
}
