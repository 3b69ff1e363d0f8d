/*
 * I/O APIC and Local APIC
 *
 * External interrupt requests reach the processor through the I/O APIC:
 * one redirection entry per pin, each programmable with a vector and a
 * mask bit. The kernel uses exactly that much of it — program a vector,
 * mask/unmask a pin, acknowledge at the local APIC — and both units are
 * reached through the physical-memory window at their standard MMIO
 * addresses.
 *
 * Binding an IRQ to an external process must be atomic with the unmask:
 * activation writes vector, handler and binding slot with interrupts
 * masked and unmasks the pin only as its last step, so a request can
 * never be delivered into a half-built binding.
 */

use core::ptr::NonNull;

use volatile::VolatilePtr;

use crate::config::MAX_IRQ;

const IOAPIC_BASE: u64 = 0xFEC0_0000;
const IOREGSEL: u64 = IOAPIC_BASE;
const IOWIN: u64 = IOAPIC_BASE + 0x10;

const LAPIC_BASE: u64 = 0xFEE0_0000;
const LAPIC_EOI: u64 = LAPIC_BASE + 0xB0;

/// Redirection-entry bits (low dword)
const RTE_MASKED: u32 = 1 << 16;

fn reg32(addr: u64) -> VolatilePtr<'static, u32> {
    unsafe { VolatilePtr::new(NonNull::new_unchecked(addr as *mut u32)) }
}

fn ioapic_read(reg: u32) -> u32 {
    reg32(IOREGSEL).write(reg);
    reg32(IOWIN).read()
}

fn ioapic_write(reg: u32, value: u32) {
    reg32(IOREGSEL).write(reg);
    reg32(IOWIN).write(value);
}

/// Low dword of the redirection entry for `irq`
fn rte_low(irq: usize) -> u32 {
    0x10 + 2 * irq as u32
}

/// Program the vector delivered when `irq` fires.
pub fn set_vector(irq: usize, vector: u8) {
    let low = ioapic_read(rte_low(irq));
    ioapic_write(rte_low(irq), (low & !0xFF) | vector as u32);
}

/// Mask (`true`) or unmask (`false`) the pin of `irq`.
pub fn set_masked(irq: usize, masked: bool) {
    let low = ioapic_read(rte_low(irq));
    let low = if masked { low | RTE_MASKED } else { low & !RTE_MASKED };
    ioapic_write(rte_low(irq), low);
}

/// Signal end-of-interrupt to the local APIC.
pub fn send_eoi() {
    reg32(LAPIC_EOI).write(0);
}

/// Mask every pin and route everything to the boot processor. Pins are
/// unmasked one by one as drivers and external processes claim them.
pub fn init() {
    for irq in 0..MAX_IRQ {
        let low = ioapic_read(rte_low(irq));
        ioapic_write(rte_low(irq), low | RTE_MASKED);
        // Destination: physical mode, APIC id 0 (high dword).
        ioapic_write(rte_low(irq) + 1, 0);
    }
    log::info!("I/O APIC: {} pins masked", MAX_IRQ);
}
