/*
 * Fault Handling, Process Dumps and Panic
 *
 * Three tiers of trouble:
 *
 * - caller faults (bad primitive argument, unmapped buffer, privilege
 *   overreach): warn, dump the offender, abort it; the system carries on
 * - system faults (exception blamed on the kernel itself, reserved bits
 *   in a page-fault error code, a fault raised from kernel text):
 *   panic — log at ERROR, dump every live process, stop the machine
 * - an explicit distress call from the IO module (`io_panic`): as above
 *
 * A process dump prints the saved registers, decodes RFLAGS, and walks
 * the frame-pointer chain for a backtrace. All stack reads go through a
 * callback that translates through the *target* process's root table,
 * so any process can be dumped from any context. Panics are guarded
 * against reentry: a second panic during the dump skips straight to the
 * stop.
 */

use core::sync::atomic::{AtomicBool, Ordering};

use super::proc::{Level, Pid, ctx};
use super::{Core, with_core};
use crate::mem::layout;

/// Page-fault error code: reserved bit set in a translation entry
const PF_RESERVED: u64 = 1 << 3;
/// Exception error code: the event was external to the faulting flow
const ERR_EXTERNAL: u64 = 1;

static IN_PANIC: AtomicBool = AtomicBool::new(false);

/// Read one word of `pid`'s memory through its translation tree.
fn read_mem(core: &Core, pid: Pid, v: u64) -> u64 {
    #[cfg(not(test))]
    {
        let root = core.procs.desc(pid).root_tab;
        crate::mem::paging::read_word(root, v).unwrap_or(0)
    }
    #[cfg(test)]
    {
        let _ = (core, pid, v);
        0
    }
}

fn in_any_module(v: u64) -> bool {
    (v >= layout::SYS_SHARED_BASE && v < layout::SYS_SHARED_END)
        || (v >= layout::IO_SHARED_BASE && v < layout::IO_SHARED_END)
        || layout::in_user_shared(v)
}

/// Log the frame-pointer chain of `pid`, reading its stack through its
/// own translation tree.
fn backtrace(core: &Core, pid: Pid, level: log::Level) {
    let d = core.procs.desc(pid);
    // Return address of the innermost frame: top of the interrupt frame.
    let mut rip = read_mem(core, pid, d.context[ctx::RSP]);
    let mut rbp = d.context[ctx::RBP];
    for _ in 0..32 {
        if rip == 0 || !in_any_module(rip) {
            break;
        }
        log::log!(level, "  > {:#x}", rip - 1);
        if rbp == 0 {
            break;
        }
        rip = read_mem(core, pid, rbp + 8);
        rbp = read_mem(core, pid, rbp);
    }
}

/// Log the complete state of one process.
pub fn process_dump(core: &Core, pid: Pid, level: log::Level) {
    let d = core.procs.desc(pid);
    log::log!(
        level,
        "proc {}: body {:#x}({}), level {}, priority {}",
        pid,
        d.entry,
        d.arg,
        if d.level == Level::User { "USER" } else { "SYSTEM" },
        d.priority
    );

    // The interrupt frame the process will resume from.
    let rsp = d.context[ctx::RSP];
    let rip = read_mem(core, pid, rsp);
    let cs = read_mem(core, pid, rsp + 8);
    let rflags = read_mem(core, pid, rsp + 16);
    let user_rsp = read_mem(core, pid, rsp + 24);
    log::log!(
        level,
        "  RIP={:#x} CPL={}",
        rip,
        if cs == crate::arch::gdt::SEL_SYS_CODE {
            "SYSTEM"
        } else {
            "USER"
        }
    );
    log::log!(
        level,
        "  RFLAGS={:#x} [{} {} {} {} {} {} {}]",
        rflags,
        if rflags & (1 << 11) != 0 { "OF" } else { "--" },
        if rflags & (1 << 10) != 0 { "DF" } else { "--" },
        if rflags & (1 << 9) != 0 { "IF" } else { "--" },
        if rflags & (1 << 7) != 0 { "SF" } else { "--" },
        if rflags & (1 << 6) != 0 { "ZF" } else { "--" },
        if rflags & (1 << 2) != 0 { "PF" } else { "--" },
        if rflags & 1 != 0 { "CF" } else { "--" },
    );
    log::log!(
        level,
        "  RAX={:016x} RBX={:016x} RCX={:016x} RDX={:016x}",
        d.context[ctx::RAX],
        d.context[ctx::RBX],
        d.context[ctx::RCX],
        d.context[ctx::RDX]
    );
    log::log!(
        level,
        "  RDI={:016x} RSI={:016x} RBP={:016x} RSP={:016x}",
        d.context[ctx::RDI],
        d.context[ctx::RSI],
        d.context[ctx::RBP],
        user_rsp
    );
    log::log!(
        level,
        "  R8 ={:016x} R9 ={:016x} R10={:016x} R11={:016x}",
        d.context[ctx::R8],
        d.context[ctx::R9],
        d.context[ctx::R10],
        d.context[ctx::R11]
    );
    log::log!(
        level,
        "  R12={:016x} R13={:016x} R14={:016x} R15={:016x}",
        d.context[ctx::R12],
        d.context[ctx::R13],
        d.context[ctx::R14],
        d.context[ctx::R15]
    );
    log::log!(level, "  backtrace:");
    backtrace(core, pid, level);
}

/// Stop everything: log the message, dump the running process first and
/// then every other live one, power the machine down.
pub fn panic_stop(msg: &str) -> ! {
    if IN_PANIC.swap(true, Ordering::SeqCst) {
        log::error!("recursive panic. STOP");
        crate::arch::power_off();
    }

    log::error!("PANIC: {}", msg);
    // The CORE lock may be held by the flow that just died. Single CPU,
    // and this path never returns: breaking the lock is sound here.
    unsafe {
        super::CORE.force_unlock();
    }
    let mut guard = super::CORE.lock();
    if let Some(core) = guard.as_mut() {
        log::error!("  live processes: {}", core.live_count);
        let running = core.prev_running;
        log::error!("---------------- RUNNING PROCESS ----------------");
        process_dump(core, running, log::Level::Error);
        log::error!("---------------- OTHER PROCESSES ----------------");
        let ids: alloc::vec::Vec<Pid> = core.procs.iter().map(|d| d.id).collect();
        for id in ids {
            if id != running {
                process_dump(core, id, log::Level::Error);
            }
        }
    }
    crate::arch::power_off();
}

/// Common exception handler. Decide who is to blame: the kernel
/// (panic) or the interrupted module (dump + abort).
pub extern "C" fn exception_entry(vec: u64, error: u64, rip: u64) {
    log::warn!(
        "exception {:#04x} error={:#x} rip={:#x}",
        vec,
        error,
        rip
    );

    if vec != 14 && (error & ERR_EXTERNAL) != 0 {
        panic_stop("SYSTEM ERROR (external event)");
    }
    if vec == 14 && (error & PF_RESERVED) != 0 {
        panic_stop("CORRUPTED TRANSLATION TABLES");
    }
    let (text_start, text_end) = kernel_image_range();
    if rip >= text_start && rip < text_end {
        panic_stop("SYSTEM ERROR (fault in kernel text)");
    }

    // The fault belongs to the IO or user module: dump the state as
    // saved at the exception and kill the process (no second dump).
    with_core(|core| {
        core.note_entry();
        let pid = core.current;
        process_dump(core, pid, log::Level::Warn);
        super::lifecycle::abort_current(core, false);
    })
}

/// Non-maskable interrupt: the world outside wants the machine stopped
/// and explained (the autograder fires one on a hung test).
pub extern "C" fn nmi_entry() {
    panic_stop("FORCED INTERRUPT");
}

/// The physical span of the kernel image, from the linker's symbols
/// (also where M2 starts).
pub fn kernel_image_range() -> (u64, u64) {
    #[cfg(not(test))]
    {
        unsafe extern "C" {
            static __text_start: u8;
            static __bss_end: u8;
        }
        unsafe {
            (
                core::ptr::addr_of!(__text_start) as u64,
                core::ptr::addr_of!(__bss_end) as u64,
            )
        }
    }
    #[cfg(test)]
    {
        (0, 0)
    }
}
