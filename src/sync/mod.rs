pub mod condvar;
pub mod lock;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod spinmutex;

// These have to stick around until the entire program is in rust =(
pub mod sleeplock;
pub mod spinlock;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum LockStrategy {
    #[default]
    Spin,
    Sleep,
}
