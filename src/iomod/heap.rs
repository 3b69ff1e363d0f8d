/*
 * IO-Module Heap
 *
 * The IO module runs with external interrupts enabled, so its heap
 * cannot rely on the "interrupts off in the kernel" discipline: every
 * allocate/release is bracketed by a mutex semaphore instead. The heap
 * region itself is the stretch of the IO/shared part reserved for it at
 * boot.
 */

use core::alloc::Layout;

use linked_list_allocator::Heap;
use spin::Mutex;

use crate::syscall::invoke::{sem_ini, sem_signal, sem_wait};

static IO_HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

/// Mutex semaphore guarding the heap (allocated at module init)
static HEAP_MUTEX: Mutex<u32> = Mutex::new(u32::MAX);

/// Take ownership of `[start, start + size)`. Called once, from the
/// IO-module main process.
pub fn init(start: u64, size: usize) -> bool {
    let mutex = sem_ini(1);
    if mutex == crate::sched::NO_PROC {
        return false;
    }
    *HEAP_MUTEX.lock() = mutex;
    unsafe {
        IO_HEAP.lock().init(start as *mut u8, size);
    }
    log::info!("IO heap: {} bytes at [{:#x}, {:#x})", size, start, start + size as u64);
    true
}

fn mutex() -> u32 {
    *HEAP_MUTEX.lock()
}

/// Allocate from the IO heap. Null when exhausted.
pub fn alloc(layout: Layout) -> *mut u8 {
    let m = mutex();
    sem_wait(m);
    let p = IO_HEAP
        .lock()
        .allocate_first_fit(layout)
        .map(|nn| nn.as_ptr())
        .unwrap_or(core::ptr::null_mut());
    sem_signal(m);
    p
}

pub fn free(ptr: *mut u8, layout: Layout) {
    let m = mutex();
    sem_wait(m);
    unsafe {
        IO_HEAP
            .lock()
            .deallocate(core::ptr::NonNull::new_unchecked(ptr), layout);
    }
    sem_signal(m);
}

/// Free bytes left (the `getiomeminfo` primitive).
pub fn free_bytes() -> u64 {
    let m = mutex();
    sem_wait(m);
    let n = IO_HEAP.lock().free() as u64;
    sem_signal(m);
    n
}
