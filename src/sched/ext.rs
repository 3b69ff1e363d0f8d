/*
 * External Processes and IRQ Binding
 *
 * An external process is a system-level process whose priority encodes
 * the interrupt vector it serves (priority - MIN_EXT_PRIO). Its life is
 * a loop: mask its own device, service it, possibly signal a
 * synchronization semaphore, then `wfi()` until the next request.
 *
 * The binding table has one slot per I/O APIC pin: free, claimed by an
 * in-kernel driver (only the timer in the base kernel), or bound to an
 * external process. A slot write, the redirection-entry program, the
 * gate install and the unmask happen under a single masked section, so
 * no request can be delivered into a half-built binding.
 */

use super::proc::{Level, NO_PROC, Pid};
use super::{Core, with_core};
use crate::config::{MAX_EXT_PRIO, MAX_IRQ, MIN_EXT_PRIO};

/// One I/O APIC pin's binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtSlot {
    Free,
    /// Claimed by an in-kernel driver; activation must never rebind it
    DriverBusy,
    Bound(Pid),
}

/// Entered from the per-IRQ gate stubs: the interrupted process goes
/// back to ready and the bound external process takes the processor
/// (its priority band sits above every normal process).
pub extern "C" fn extern_irq_entry(irq: u64) {
    with_core(|core| {
        core.note_entry();
        core.irq_ready(irq as usize);
    })
}

/// The activation primitive for external processes. Unlike normal
/// activation, a bad argument only fails the call (warn + `NO_PROC`):
/// the caller is the IO module setting up its drivers, not an arbitrary
/// user program.
pub fn activate_pe(core: &mut Core, f: u64, a: u64, prio: u32, liv: u64, irq: u64) -> u32 {
    if !(MIN_EXT_PRIO..=MAX_EXT_PRIO).contains(&prio) {
        log::warn!("invalid external priority: {}", prio);
        return NO_PROC;
    }
    let level = match liv {
        3 => Level::User,
        0 => Level::System,
        _ => {
            log::warn!("invalid level: {}", liv);
            return NO_PROC;
        }
    };
    if irq >= MAX_IRQ as u64 {
        log::warn!("invalid irq {} (max {})", irq, MAX_IRQ);
        return NO_PROC;
    }
    let irq = irq as usize;
    if core.ext[irq] != ExtSlot::Free {
        log::warn!("irq {} already bound", irq);
        return NO_PROC;
    }
    // The vector is encoded in the priority; its gate must be free too.
    let vector = (prio - MIN_EXT_PRIO) as u8;
    if crate::arch::idt::gate_present(vector) {
        log::warn!("vector {:#04x} already in use", vector);
        return NO_PROC;
    }

    let Some(id) = super::lifecycle::create_process(core, f, a, prio, level) else {
        return NO_PROC;
    };

    // Wire irq -> vector -> stub -> process, then open the pin.
    crate::arch::peripheral::apic::set_vector(irq, vector);
    crate::arch::idt::load_handler(vector, irq);
    core.ext[irq] = ExtSlot::Bound(id);
    crate::arch::peripheral::apic::set_masked(irq, false);

    log::info!(
        "extern={} entry={:#x}({}) prio={} (vector={:#04x}) irq={}",
        id,
        f,
        a,
        prio,
        vector,
        irq
    );
    id.0 as u32
}

/// Claim a pin for an in-kernel driver and route it to `vector`. Used
/// once, by the timer at initialization; runs in process context, so it
/// masks interrupts itself.
pub fn claim_driver(irq: usize, vector: u8) {
    crate::arch::interrupts::without_interrupts(|| {
        with_core(|core| {
            assert_eq!(core.ext[irq], ExtSlot::Free, "irq {} already bound", irq);
            core.ext[irq] = ExtSlot::DriverBusy;
        });
        crate::arch::peripheral::apic::set_vector(irq, vector);
        crate::arch::peripheral::apic::set_masked(irq, false);
    });
}
