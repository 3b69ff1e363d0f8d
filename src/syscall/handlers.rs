/*
 * Primitive Handlers
 *
 * The Rust side of every gate: arguments arrive in the C ABI registers
 * exactly as the caller loaded them (the stubs save state without
 * touching them), results leave through the caller's saved RAX.
 *
 * A primitive never trusts its parameters. A caller fault ends with the
 * caller aborted; the primitive then simply returns into the dispatcher,
 * which hands the processor to whoever the scheduler picked.
 */

use crate::config::MAX_LOG;
use crate::mem;
use crate::sched::access::access_ok;
use crate::sched::proc::ctx;
use crate::sched::{Fault, Level, lifecycle, with_core, Core};

/// Log a caller fault and abort the offender.
fn fault(core: &mut Core, f: Fault) {
    match f {
        Fault::BadSemaphore(s) => log::warn!("invalid semaphore: {}", s),
        Fault::BadBarrier(b) => log::warn!("invalid barrier id: {}", b),
        Fault::BadBarrierParams => log::warn!("invalid barrier parameters"),
        Fault::BadPriority(p) => log::warn!("invalid priority: {}", p),
        Fault::BadLevel(l) => log::warn!("invalid level: {}", l),
        Fault::Protection => log::warn!("protection violation"),
        Fault::BadBuffer => log::warn!("invalid buffer"),
        Fault::BadLogSeverity(s) => log::warn!("invalid log severity: {}", s),
    }
    lifecycle::abort_current(core, true);
}

pub extern "C" fn h_activate_p(f: u64, a: u64, prio: u64, liv: u64) {
    with_core(|core| {
        core.note_entry();
        match lifecycle::activate_p(core, f, a, prio as u32, liv) {
            Ok(id) => {
                let cur = core.current;
                core.set_retval(cur, id as u64);
            }
            Err(e) => fault(core, e),
        }
    })
}

pub extern "C" fn h_terminate_p() {
    with_core(|core| {
        core.note_entry();
        lifecycle::terminate_current(core, true);
    })
}

pub extern "C" fn h_sem_ini(val: u64) {
    with_core(|core| {
        core.note_entry();
        let id = core.sem_ini(val as i32);
        let cur = core.current;
        core.set_retval(cur, id as u64);
    })
}

pub extern "C" fn h_sem_wait(sem: u64) {
    with_core(|core| {
        core.note_entry();
        if let Err(e) = core.sem_wait(sem as u32) {
            fault(core, e);
        }
    })
}

pub extern "C" fn h_sem_signal(sem: u64) {
    with_core(|core| {
        core.note_entry();
        if let Err(e) = core.sem_signal(sem as u32) {
            fault(core, e);
        }
    })
}

pub extern "C" fn h_delay(ticks: u64) {
    with_core(|core| {
        core.note_entry();
        core.delay(ticks as u32);
    })
}

pub extern "C" fn h_do_log(sev: u64, buf: u64, len: u64) {
    with_core(|core| {
        core.note_entry();
        if core.caller_level() == Level::User && !access_ok(core, buf, len, false, false) {
            fault(core, Fault::BadBuffer);
            return;
        }
        if sev > MAX_LOG as u64 {
            fault(core, Fault::BadLogSeverity(sev as u32));
            return;
        }
        // The caller's tree is still the active one: the checked buffer
        // is directly readable.
        let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, len as usize) };
        let text = core::str::from_utf8(bytes).unwrap_or("<non-utf8 message>");
        match sev {
            0 => log::debug!("{}", text),
            1 => log::info!("{}", text),
            2 => log::warn!("{}", text),
            3 => log::error!("{}", text),
            _ => log::info!(target: "user", "{}", text),
        }
    })
}

pub extern "C" fn h_getmeminfo() {
    with_core(|core| {
        core.note_entry();
        let heap_free = mem::heap::free_bytes() as u64 & 0xFFFF_FFFF;
        let frames = mem::frame::free_frames();
        let cur = core.current;
        // Two-register reply: heap and frame counts packed in RAX, the
        // caller's id in RDX (the wrapper unpacks).
        core.procs.desc_mut(cur).context[ctx::RAX] = heap_free | (frames << 32);
        core.procs.desc_mut(cur).context[ctx::RDX] = cur.0 as u64;
    })
}

pub extern "C" fn h_barrier_create(nproc: u64, timeout: u64) {
    with_core(|core| {
        core.note_entry();
        match core.barrier_create(nproc as u32, timeout as u32) {
            Ok(id) => {
                let cur = core.current;
                core.set_retval(cur, id as u64);
            }
            Err(e) => fault(core, e),
        }
    })
}

pub extern "C" fn h_barrier(id: u64) {
    with_core(|core| {
        core.note_entry();
        if let Err(e) = core.barrier_enter(id as u32) {
            fault(core, e);
        }
    })
}

pub extern "C" fn h_activate_pe(f: u64, a: u64, prio: u64, liv: u64, irq: u64) {
    with_core(|core| {
        core.note_entry();
        let id = crate::sched::ext::activate_pe(core, f, a, prio as u32, liv, irq);
        let cur = core.current;
        core.set_retval(cur, id as u64);
    })
}

pub extern "C" fn h_wfi() {
    // The interrupt the external process was servicing is over now.
    crate::arch::peripheral::apic::send_eoi();
    with_core(|core| {
        core.note_entry();
        core.wfi_block();
    })
}

pub extern "C" fn h_fill_gate(gate_type: u64, routine: u64) {
    with_core(|core| {
        core.note_entry();
        let cur = core.current;
        if gate_type & 0xF0 != 0x40 {
            log::warn!("invalid gate type {:#04x} (must be 0x4*)", gate_type);
            core.set_retval(cur, 0);
            return;
        }
        let vector = gate_type as u8;
        if crate::arch::idt::gate_present(vector) {
            log::warn!("gate {:#04x} already in use", vector);
            core.set_retval(cur, 0);
            return;
        }
        // Trap gate: the IO-module body behind it runs with external
        // interrupts enabled and may block on semaphores.
        let handler: extern "C" fn() = unsafe { core::mem::transmute(routine) };
        crate::arch::idt::set_gate(vector, handler, true, true);
        core.set_retval(cur, 1);
    })
}

pub extern "C" fn h_abort_p() {
    with_core(|core| {
        core.note_entry();
        lifecycle::abort_current(core, true);
    })
}

pub extern "C" fn h_io_panic() {
    crate::sched::dump::panic_stop("fatal error in the IO module");
}

pub extern "C" fn h_translate(vaddr: u64) {
    with_core(|core| {
        core.note_entry();
        let root = core.procs.desc(core.current).root_tab;
        let pa = translate_for(root, vaddr);
        let cur = core.current;
        core.set_retval(cur, pa);
    })
}

fn translate_for(root: u64, vaddr: u64) -> u64 {
    #[cfg(not(test))]
    {
        mem::paging::translate(root, vaddr).unwrap_or(0)
    }
    #[cfg(test)]
    {
        let _ = (root, vaddr);
        0
    }
}

pub extern "C" fn h_access(begin: u64, size: u64, writeable: u64, shared: u64) {
    with_core(|core| {
        core.note_entry();
        let ok = access_ok(core, begin, size, writeable != 0, shared != 0);
        let cur = core.current;
        core.set_retval(cur, ok as u64);
    })
}

/// The timer driver, entered from the tick gate.
pub extern "C" fn timer_entry() {
    crate::arch::peripheral::apic::send_eoi();
    with_core(|core| {
        core.note_entry();
        core.timer_tick();
    })
}
