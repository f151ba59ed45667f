//! Block buffer cache entries and pipes: the two kinds of in-memory state a
//! `fs::file::File` can point at besides a plain inode.

pub mod buf;
pub mod pipe;
