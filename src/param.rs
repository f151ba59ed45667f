/// Maximum number of processes
pub const NPROC: usize = 64;
/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Maximum number of open files per process
pub const NOFILE: usize = 16;
/// Maximum number of open files per system
pub const NFILE: usize = 100;
/// Maximum number of active inodes
pub const NINODE: usize = 50;
/// Maximum major device number
pub const NDEV: usize = 10;
/// Device number of file system root disk
pub const ROOTDEV: usize = 1;
/// Max exec arguments
pub const MAXARG: usize = 32;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Max data blocks in on-disk log
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Size of file system in blocks
pub const FSSIZE: usize = 2000;
/// Maximum file path size
pub const MAXPATH: usize = 128;

/// Number of MLFQ priority levels (0 is highest priority).
pub const MLFQ_LEVELS: usize = 3;
/// Ticks of runtime a process may accumulate at each level before promotion.
/// The top level has no allotment; it never promotes further.
pub const ALLOTMENT: [u32; MLFQ_LEVELS] = [20, 40, u32::MAX];
/// Round-robin quantum, in ticks, at each level.
pub const QUANTUM: [u32; MLFQ_LEVELS] = [5, 10, 20];
/// Upper bound, in percent, on the total tickets stride scheduling may claim.
/// The remainder is always reserved for MLFQ.
pub const MAX_STRIDE_TICKETS: i32 = 80;
/// Width of the scheduler's round-robin dispatch wheel. `stride_tickets` of
/// every 100 slots go to stride; the rest go to MLFQ.
pub const SCHEDULE_WHEEL_SIZE: u32 = 100;
/// Number of full scans of the process table without a dispatch before the
/// scheduler gives up on policy and runs whatever it is looking at.
pub const STARVATION_LIMIT: u32 = 1000;
/// Ticks between priority_boost sweeps.
pub const PRIORITY_BOOST_INTERVAL_TICKS: u32 = 100;
/// User stack pages handed out per thread (one guard page, one usable page).
pub const USER_STACK_PAGES: u64 = 2;
/// Fixed-point numerator used to derive a manager's stride from its ticket share.
pub const STRIDE_NUMERATOR: i32 = 1000;
