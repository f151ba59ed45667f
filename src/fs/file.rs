//! In-memory open file objects: the per-fd reference counted handle table
//! entries a process's `open_files` array points into, and the inode/device
//! switch layer underneath `read`/`write`.

use crate::fs::inode::Inode;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct Devsw {
    pub read: Option<fn(user_dst: i32, dst: u64, n: i32) -> i32>,
    pub write: Option<fn(user_src: i32, src: u64, n: i32) -> i32>,
}

extern "C" {
    pub static mut devsw: [Devsw; crate::param::NDEV];
    pub fn fileinit();
}

pub const CONSOLE: usize = 1;

#[repr(C)]
#[derive(Copy, Clone, PartialEq)]
pub enum FileKind {
    None,
    Pipe,
    Inode,
    Device,
}

/// A reference-counted open file. Several file descriptors, possibly across
/// several processes sharing a group's `open_files` table, may point at the
/// same `File` via `filedup`; the underlying inode or pipe is torn down only
/// once the last reference is closed.
#[repr(C)]
pub struct File {
    pub kind: FileKind,
    pub reference_count: i32,
    pub readable: u8,
    pub writable: u8,
    /// Non-null when `kind == Pipe`.
    pub pipe: *mut core::ffi::c_void,
    /// Non-null when `kind == Inode` or `kind == Device`.
    pub inode: *mut Inode,
    pub offset: u32,
    /// Device major number, meaningful when `kind == Device`.
    pub major: i16,
}

extern "C" {
    /// Allocates a fresh `File` with `reference_count == 1`. Returns null if
    /// the system-wide open file table is full.
    pub fn filealloc() -> *mut File;
    /// Increments `f`'s reference count and returns `f`.
    pub fn filedup(f: *mut File) -> *mut File;
    /// Decrements `f`'s reference count, releasing the underlying inode or
    /// pipe once it reaches zero.
    pub fn fileclose(f: *mut File);
    pub fn filestat(f: *mut File, addr: u64) -> i32;
    pub fn fileread(f: *mut File, addr: u64, n: i32) -> i32;
    pub fn filewrite(f: *mut File, addr: u64, n: i32) -> i32;
}
