/*
 * Kernel Heap
 *
 * The kernel heap backs the process descriptors and the timer request
 * nodes. It lives in the low memory the boot loader left free below the
 * video hole and is served by `linked_list_allocator`.
 *
 * Kernel code only runs with external interrupts masked, so the spin
 * lock around the heap is uncontended; the IO module, which runs with
 * interrupts enabled, has its own heap behind a mutex semaphore.
 */

use linked_list_allocator::LockedHeap;

#[cfg_attr(not(test), global_allocator)]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// First address the allocator may not reach (the video memory and the
/// ROM shadows live in [640 KiB, 1 MiB))
const HEAP_LIMIT: u64 = 640 * 1024;

/// Hand `[start, 640 KiB)` to the allocator. `start` is the first byte
/// the boot loader left free.
pub fn init(start: u64) {
    let size = (HEAP_LIMIT - start) as usize;
    unsafe {
        ALLOCATOR.lock().init(start as *mut u8, size);
    }
    log::info!("kernel heap: [{:#x}, {:#x})", start, HEAP_LIMIT);
}

/// Free bytes left in the kernel heap (for `getmeminfo`).
pub fn free_bytes() -> usize {
    ALLOCATOR.lock().free()
}
