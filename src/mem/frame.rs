/*
 * Physical Frame Allocator
 *
 * Physical memory is split in two at the first page boundary past the
 * kernel image: M1 (the image itself plus everything below it) and M2,
 * the general-purpose frame pool. M2 frames are kept in a free list
 * threaded through the per-frame descriptors; allocation pops the head
 * and release pushes it, so both are O(1). Releasing an M1 frame is a
 * kernel bug and panics.
 *
 * When a frame holds a translation table its descriptor counts the
 * table's valid entries instead; a table frame can only go back to the
 * free list once that counter has dropped to zero.
 *
 * With the `frame-stride` feature the initial list interleaves the frames
 * in N_STEP chains threaded back to back, so consecutive allocations are
 * physically non-contiguous. Some paging exercises use this to flush out
 * code that silently assumes contiguity.
 */

use alloc::vec::Vec;
use spin::Mutex;

use crate::config::{MEM_TOT, N_STEP, PAGE_SIZE};

/// Per-frame descriptor: the free-list link while the frame is free, the
/// valid-entry counter while it holds a translation table.
#[derive(Clone, Copy)]
struct FrameDesc {
    next_free: u32,
    valid_entries: u16,
}

pub struct FramePool {
    descs: Vec<FrameDesc>,
    /// Frames in M1 (never allocatable, never releasable)
    n_m1: usize,
    /// Head of the free list; frame 0 belongs to M1, so 0 terminates it
    first_free: usize,
    free_count: u64,
}

impl FramePool {
    /// Build the pool for `mem_total` bytes of physical memory, with M2
    /// starting at the first page boundary past `kernel_end`.
    pub fn new(mem_total: u64, kernel_end: u64) -> FramePool {
        let n_frames = (mem_total / PAGE_SIZE) as usize;
        let m1_limit = (kernel_end + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let n_m1 = (m1_limit / PAGE_SIZE) as usize;

        let mut pool = FramePool {
            descs: alloc::vec![FrameDesc { next_free: 0, valid_entries: 0 }; n_frames],
            n_m1,
            first_free: 0,
            free_count: 0,
        };

        let n_m2 = n_frames.saturating_sub(n_m1);
        if n_m2 == 0 {
            return pool;
        }

        pool.first_free = n_m1;
        let mut last = 0;
        for j in 0..N_STEP {
            for i in (j..n_m2).step_by(N_STEP) {
                pool.descs[n_m1 + i].next_free = (n_m1 + i + N_STEP) as u32;
                pool.free_count += 1;
                last = i;
            }
            // The tail of this chain continues into the head of the next.
            pool.descs[n_m1 + last].next_free = (n_m1 + j + 1) as u32;
        }
        pool.descs[n_m1 + last].next_free = 0;
        pool
    }

    /// Pop a frame from the free list.
    /// Returns its physical address, or `None` when memory is exhausted.
    pub fn alloc(&mut self) -> Option<u64> {
        if self.free_count == 0 {
            log::error!("out of physical frames");
            return None;
        }
        let j = self.first_free;
        self.first_free = self.descs[j].next_free as usize;
        self.descs[j].next_free = 0;
        self.free_count -= 1;
        Some(j as u64 * PAGE_SIZE)
    }

    /// Push a frame back onto the free list. M2 frames are all
    /// equivalent, so the head is as good a place as any.
    pub fn free(&mut self, frame: u64) {
        let j = (frame / PAGE_SIZE) as usize;
        if j < self.n_m1 {
            panic!("release of M1 frame {:#x}", frame);
        }
        self.descs[j].next_free = self.first_free as u32;
        self.first_free = j;
        self.free_count += 1;
    }

    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    pub fn n_m1(&self) -> usize {
        self.n_m1
    }

    pub fn n_m2(&self) -> usize {
        self.descs.len() - self.n_m1
    }

    // Valid-entry accounting for frames holding translation tables.

    pub fn inc_ref(&mut self, table: u64) {
        self.descs[(table / PAGE_SIZE) as usize].valid_entries += 1;
    }

    pub fn dec_ref(&mut self, table: u64) {
        self.descs[(table / PAGE_SIZE) as usize].valid_entries -= 1;
    }

    pub fn ref_count(&self, table: u64) -> u16 {
        self.descs[(table / PAGE_SIZE) as usize].valid_entries
    }

    /// Release a frame that held a translation table. Fatal if the table
    /// still has valid entries: some sub-tree would be leaked or, worse,
    /// aliased by the next owner of the frame.
    pub fn free_table(&mut self, table: u64) {
        let n = self.ref_count(table);
        if n != 0 {
            panic!("release of table {:#x} with {} valid entries", table, n);
        }
        self.free(table);
    }
}

/// The global pool over [0, MEM_TOT)
pub static FRAMES: Mutex<Option<FramePool>> = Mutex::new(None);

/// Initialize the global pool. `kernel_end` is the first byte past the
/// kernel image (the linker provides it).
pub fn init(kernel_end: u64) {
    let pool = FramePool::new(MEM_TOT, kernel_end);
    log::info!(
        "frames: {} (M1) {} (M2), {} free",
        pool.n_m1(),
        pool.n_m2(),
        pool.free_count()
    );
    *FRAMES.lock() = Some(pool);
}

pub fn with_frames<R>(f: impl FnOnce(&mut FramePool) -> R) -> R {
    let mut guard = FRAMES.lock();
    f(guard.as_mut().expect("frame allocator not initialized"))
}

/// Number of frames currently in the free list (for `getmeminfo`).
pub fn free_frames() -> u64 {
    with_frames(|p| p.free_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: u64 = PAGE_SIZE;

    #[test]
    fn m2_starts_past_the_kernel_image() {
        let p = FramePool::new(16 * PG, 3 * PG + 123);
        assert_eq!(p.n_m1(), 4);
        assert_eq!(p.n_m2(), 12);
        assert_eq!(p.free_count(), 12);
    }

    #[cfg(not(feature = "frame-stride"))]
    #[test]
    fn allocation_pops_in_list_order() {
        let mut p = FramePool::new(8 * PG, 2 * PG);
        assert_eq!(p.alloc(), Some(2 * PG));
        assert_eq!(p.alloc(), Some(3 * PG));
        p.free(2 * PG);
        // Release pushes the head, so the freed frame comes right back.
        assert_eq!(p.alloc(), Some(2 * PG));
    }

    #[test]
    fn alloc_free_balance() {
        let mut p = FramePool::new(8 * PG, 2 * PG);
        let before = p.free_count();
        let a = p.alloc().unwrap();
        let b = p.alloc().unwrap();
        assert_eq!(p.free_count(), before - 2);
        p.free(a);
        p.free(b);
        assert_eq!(p.free_count(), before);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut p = FramePool::new(4 * PG, 2 * PG);
        assert!(p.alloc().is_some());
        assert!(p.alloc().is_some());
        assert!(p.alloc().is_none());
    }

    #[test]
    #[should_panic]
    fn releasing_an_m1_frame_is_fatal() {
        let mut p = FramePool::new(8 * PG, 2 * PG);
        p.free(0);
    }

    #[test]
    #[should_panic]
    fn releasing_a_live_table_is_fatal() {
        let mut p = FramePool::new(8 * PG, 2 * PG);
        let t = p.alloc().unwrap();
        p.inc_ref(t);
        p.free_table(t);
    }

    #[test]
    fn table_refcounts_track_valid_entries() {
        let mut p = FramePool::new(8 * PG, 2 * PG);
        let t = p.alloc().unwrap();
        p.inc_ref(t);
        p.inc_ref(t);
        p.dec_ref(t);
        assert_eq!(p.ref_count(t), 1);
        p.dec_ref(t);
        let before = p.free_count();
        p.free_table(t);
        assert_eq!(p.free_count(), before + 1);
    }
}
