/*
 * Kernel Configuration Constants
 *
 * Every tunable limit of the kernel lives here, shared by the scheduler,
 * the memory subsystem and the IO module. Values can be changed within
 * reasonable limits; the constants in the "fixed relations" section are
 * derived and must not be edited independently.
 */

/// Maximum number of processes (process ids are table indices)
pub const MAX_PROC: usize = 1024;

/// Maximum process id
pub const MAX_PROC_ID: u16 = (MAX_PROC - 1) as u16;

/// Maximum number of semaphores per privilege level
pub const MAX_SEM: usize = 1024;

/// Maximum number of barriers
pub const MAX_BARRIERS: usize = 100;

/// Number of interrupt-request pins on the I/O APIC
pub const MAX_IRQ: usize = 24;

/// Total physical memory driven by the kernel
pub const MEM_TOT: u64 = 32 * 1024 * 1024;

/// Page size (4 KiB, the only size the kernel maps)
pub const PAGE_SIZE: u64 = 4096;

/// Size of a system (kernel) stack
pub const SYS_STACK_SIZE: u64 = 4 * 1024;

/// Size of a user stack
pub const USR_STACK_SIZE: u64 = 64 * 1024;

/// Size of the user-module heap, mapped after the user image
pub const USR_HEAP_SIZE: u64 = 1024 * 1024;

/// Size of the IO-module heap
pub const IO_HEAP_SIZE: usize = 1024 * 1024;

/// Maximum number of physical-region descriptors for one DMA transfer
pub const MAX_PRD: usize = 16;

/// Bytes in one disk sector
pub const SECTOR_SIZE: usize = 512;

/// Divisor programmed into channel 0 of the interval timer (~50 ms tick)
pub const TIMER_COUNT: u16 = 59659;

// Priority bands. The bands do not overlap, so the priority ordering of the
// ready queue is total: dummy < normal processes < external processes.

/// Priority of the dummy process
pub const DUMMY_PRIORITY: u32 = 0;

/// Minimum priority of normal processes
pub const MIN_PRIORITY: u32 = 1;

/// Minimum priority of external processes
pub const MIN_EXT_PRIO: u32 = 1024;

/// Maximum priority of normal (non-external) processes
pub const MAX_PRIORITY: u32 = MIN_EXT_PRIO - 1;

/// Maximum priority of external processes
pub const MAX_EXT_PRIO: u32 = MIN_EXT_PRIO + 0xFE;

/// Interleave step of the free-frame list. With a step of 2 the list
/// alternates between even and odd frames, so virtually contiguous
/// mappings land on physically non-contiguous frames.
#[cfg(feature = "frame-stride")]
pub const N_STEP: usize = 2;
#[cfg(not(feature = "frame-stride"))]
pub const N_STEP: usize = 1;

/// Most severe message level accepted by `do_log` (inclusive)
pub const MAX_LOG: u32 = 5;
