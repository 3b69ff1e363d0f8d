/*
 * The IO Module
 *
 * Runs as ordinary system-level code with external interrupts enabled:
 * its primitives are reached through trap gates it installs itself (via
 * `fill_gate`), may block on semaphores, and guard their shared state
 * with mutex semaphores rather than interrupt masking. Its drivers are
 * external processes.
 *
 * The gate bodies below are bare trampolines: the caller's arguments
 * are still in the argument registers, so each gate just calls its
 * primitive and returns from the interrupt — whatever the primitive
 * left in RAX rides back to the caller.
 */

pub mod console;
pub mod heap;
pub mod hd;

use crate::config::IO_HEAP_SIZE;
use crate::syscall::invoke::{fill_gate, io_panic, sem_signal, terminate_p};

/// Non-saving trampoline for an IO-module primitive.
macro_rules! io_gate {
    ($name:ident, $handler:path) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            core::arch::naked_asm!(
                "call {handler}",
                "iretq",
                handler = sym $handler,
            )
        }
    };
}

io_gate!(gate_readhd_n, hd::c_readhd_n);
io_gate!(gate_writehd_n, hd::c_writehd_n);
io_gate!(gate_dmareadhd_n, hd::c_dmareadhd_n);
io_gate!(gate_dmawritehd_n, hd::c_dmawritehd_n);
io_gate!(gate_readconsole, console::c_readconsole);
io_gate!(gate_writeconsole, console::c_writeconsole);
io_gate!(gate_iniconsole, console::c_iniconsole);
io_gate!(gate_getiomeminfo, c_getiomeminfo);

extern "C" fn c_getiomeminfo() -> u64 {
    heap::free_bytes()
}

/// Install every IO primitive gate (types 0x40-0x47).
fn fill_io_gates() -> bool {
    fill_gate(0x40, gate_readhd_n)
        && fill_gate(0x41, gate_writehd_n)
        && fill_gate(0x42, gate_dmareadhd_n)
        && fill_gate(0x43, gate_dmawritehd_n)
        && fill_gate(0x44, gate_readconsole)
        && fill_gate(0x45, gate_writeconsole)
        && fill_gate(0x46, gate_iniconsole)
        && fill_gate(0x47, gate_getiomeminfo)
}

/// Body of the IO-module main process. The system init process hands it
/// the index of a synchronization semaphore and waits; the signal means
/// every gate is filled and every driver is live.
pub extern "C" fn main_io(sync_sem: u64) {
    if !fill_io_gates() {
        log::error!("IO module: cannot fill the primitive gates");
        io_panic();
    }

    let heap_base = crate::mem::layout::IO_SHARED_BASE;
    if !heap::init(heap_base, IO_HEAP_SIZE) {
        log::error!("IO module: cannot set up the heap");
        io_panic();
    }

    log::info!("initializing the console (kbd + video)");
    if !console::init() {
        log::error!("IO module: console initialization failed");
        io_panic();
    }

    log::info!("initializing the hard-disk driver");
    if !hd::init() {
        log::error!("IO module: hard-disk initialization failed");
        io_panic();
    }

    sem_signal(sync_sem as u32);
    terminate_p();
}
