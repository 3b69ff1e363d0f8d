/*
 * TERN Kernel Entry Point
 *
 * A three-ring teaching kernel for a single-CPU x86_64 machine:
 * processes multiplexed over one processor, counting semaphores, a
 * timer-driven delay queue, page-table managed virtual memory with
 * copy-on-load of ELF module images, disk and keyboard drivers run as
 * external processes bound to interrupt requests, and a timed barrier
 * rendezvous primitive.
 *
 * Initialization happens in two stages:
 *
 * 1. `kstart` runs on the boot loader's stack with interrupts masked:
 *    it brings up logging, descriptor tables, memory, the shared parts
 *    of the address space (loading the boot modules into them), creates
 *    the dummy process and the system init process, and dispatches.
 *
 * 2. The system init process runs as a real process (so it can block):
 *    it starts the timer, raises the IO module and waits for it, then
 *    activates the user program and terminates.
 *
 * The crate builds as a host binary under `cargo test`; everything that
 * touches hardware is compiled out there and the kernel state machine
 * is driven directly by the unit tests.
 */

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![allow(dead_code)]

extern crate alloc;
#[cfg(not(test))]
extern crate rlibc;

mod arch;
mod bootinfo;
mod config;
mod iomod;
mod logger;
mod mem;
mod sched;
mod syscall;
mod userland;

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::boxed::Box;

use config::{
    DUMMY_PRIORITY, IO_HEAP_SIZE, MAX_EXT_PRIO, MAX_PRIORITY, TIMER_COUNT, USR_HEAP_SIZE,
};
use sched::proc::{Level, ProcDesc};
use sched::{NO_PROC, lifecycle, with_core};
use syscall::invoke;
use syscall::numbers::INTR_TYPE_TIMER;

/// I/O APIC pin wired to the interval timer
const TIMER_IRQ: usize = 2;

/// Entry point of the user module, when the boot loader provided one
static USER_ENTRY: AtomicU64 = AtomicU64::new(0);

/// Entered by the boot loader with interrupts masked, on its stack.
#[cfg(not(test))]
#[unsafe(no_mangle)]
pub extern "C" fn _start(info: *const bootinfo::BootInfo) -> ! {
    kstart(unsafe { &*info })
}

fn kstart(info: &bootinfo::BootInfo) -> ! {
    logger::init();
    log::info!("TERN kernel v0.2");

    arch::gdt::init();
    arch::idt::init();

    // The heap feeds on what the loader left free below the video hole.
    mem::heap::init(info.free_start);

    let (_, kernel_end) = sched::dump::kernel_image_range();
    mem::frame::init(kernel_end);

    log::info!("virtual memory parts:");
    log::info!(
        "- sys/shared  [{:#18x}, {:#18x})",
        mem::layout::SYS_SHARED_BASE,
        mem::layout::SYS_SHARED_END
    );
    log::info!(
        "- sys/private [{:#18x}, {:#18x})",
        mem::layout::SYS_PRIVATE_BASE,
        mem::layout::SYS_PRIVATE_END
    );
    log::info!(
        "- io /shared  [{:#18x}, {:#18x})",
        mem::layout::IO_SHARED_BASE,
        mem::layout::IO_SHARED_END
    );
    log::info!(
        "- usr/shared  [{:#18x}, {:#18x})",
        mem::layout::USR_SHARED_BASE,
        mem::layout::USR_SHARED_END
    );
    log::info!(
        "- usr/private [{:#18x}, {:#18x})",
        mem::layout::USR_PRIVATE_BASE,
        mem::layout::USR_PRIVATE_END
    );

    // The bootstrap "process": the flow running right now. It gets a
    // descriptor so the primitives' bookkeeping has something to point
    // at, but it is never scheduled again after the first dispatch.
    let mut bootstrap = Box::new(ProcDesc::new(MAX_PRIORITY, Level::System));
    bootstrap.root_tab = current_root();
    sched::init(bootstrap);

    // Shared parts of the initial address space: the IO heap region and
    // the module images. Every process inherits these by root-entry
    // copy, so they are built exactly once, here.
    build_shared_parts(info);
    log::info!("free frames after module load: {}", mem::frame::free_frames());

    with_core(|core| {
        let dummy = lifecycle::create_process(
            core,
            dummy_body as usize as u64,
            0,
            DUMMY_PRIORITY,
            Level::System,
        )
        .expect("cannot create the dummy process");
        let sched::Core { ready, procs, .. } = core;
        ready.insert(procs, dummy);
        log::info!("dummy process created (id={})", dummy);

        let init = lifecycle::create_process(
            core,
            main_system as usize as u64,
            0,
            MAX_EXT_PRIO,
            Level::System,
        )
        .expect("cannot create the system init process");
        let sched::Core { ready, procs, .. } = core;
        ready.insert(procs, init);
        core.live_count += 1;
        log::info!("system init process created (id={})", init);
    });

    arch::peripheral::pic::init();
    arch::peripheral::apic::init();

    log::info!("handing the processor to the system init process");
    with_core(|core| core.schedule());
    arch::entry::dispatch_current()
}

fn current_root() -> u64 {
    #[cfg(not(test))]
    {
        use x86_64::registers::control::Cr3;
        Cr3::read().0.start_address().as_u64()
    }
    #[cfg(test)]
    {
        0
    }
}

/// Map the IO-module heap into IO/shared and copy-load the module
/// images the boot loader handed over.
fn build_shared_parts(info: &bootinfo::BootInfo) {
    let root = current_root();

    // The IO module is linked into this kernel; an IO image from the
    // loader has nothing to add.
    if info.module(1).is_some() {
        log::info!("ignoring the loader's IO module image (IO module is built in)");
    }

    let io_heap_end = mem::layout::IO_SHARED_BASE + IO_HEAP_SIZE as u64;
    let reached = mem::paging::map(
        root,
        mem::layout::IO_SHARED_BASE,
        io_heap_end,
        mem::paging::PteFlags::WRITE,
        |_| mem::frame::with_frames(|p| p.alloc()).unwrap_or(0),
    );
    if reached != io_heap_end {
        panic!("cannot map the IO heap");
    }

    if let Some(user) = info.module(2) {
        log::info!("loading the user module:");
        match mem::elf::load_module(root, user.start, user.size, true, USR_HEAP_SIZE) {
            Some(entry) => USER_ENTRY.store(entry, Ordering::SeqCst),
            None => panic!("cannot load the user module"),
        }
    } else {
        log::info!("no user module: the built-in exercise suite will run");
    }
}

/// Body of the dummy process: keep the processor parked until the last
/// activated process is gone, then shut the machine down.
extern "C" fn dummy_body(_arg: u64) {
    while sched::live_process_count() > 0 {
        arch::interrupts::halt();
    }
    log::info!("shutdown");
    arch::power_off();
}

/// Body of the system init process (stage two of initialization).
extern "C" fn main_system(_arg: u64) {
    // The timer: pin claimed for the in-kernel driver, then started.
    log::info!("starting the timer (count={})", TIMER_COUNT);
    sched::ext::claim_driver(TIMER_IRQ, INTR_TYPE_TIMER);
    arch::peripheral::pit::start(TIMER_COUNT);

    // Raise the IO module and wait until it reports ready.
    let sync_io = invoke::sem_ini(0);
    if sync_io == NO_PROC {
        panic!("cannot allocate the IO synchronization semaphore");
    }
    log::info!("creating the IO-module main process");
    if invoke::activate_p(iomod::main_io, sync_io as u64, MAX_EXT_PRIO, 0) == NO_PROC {
        panic!("cannot create the IO-module main process");
    }
    log::info!("waiting for the IO module...");
    invoke::sem_wait(sync_io);

    // The user program: the loaded module if there is one, the built-in
    // exercise suite otherwise.
    let user_entry = USER_ENTRY.load(Ordering::SeqCst);
    let id = if user_entry != 0 {
        log::info!("creating the user main process");
        let f: extern "C" fn(u64) = unsafe { core::mem::transmute(user_entry) };
        invoke::activate_p(f, 0, MAX_PRIORITY, 3)
    } else {
        log::info!("activating the built-in exercise suite");
        invoke::activate_p(userland::main_user, 0, MAX_PRIORITY, 0)
    };
    if id == NO_PROC {
        panic!("cannot create the user main process");
    }

    log::info!("handing the processor to the user program");
    invoke::terminate_p();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::interrupts::disable();
    let mut msg: heapless::String<256> = heapless::String::new();
    let _ = core::fmt::write(&mut msg, format_args!("{}", info));
    sched::dump::panic_stop(&msg)
}
