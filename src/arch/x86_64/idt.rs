/*
 * Interrupt Descriptor Table
 *
 * The IDT is mutated at runtime — external-process activation installs a
 * per-IRQ stub, and the IO module fills its own primitive gates — so it
 * lives in a raw static touched only through raw pointers, always with
 * interrupts masked. A side bitmap tracks which vectors are occupied:
 * the activation and gate-filling primitives must refuse a vector that
 * is already in use.
 *
 * Gate map:
 *   0x00–0x15  CPU exceptions
 *   0x20–0x2C  common primitives (user-invocable interrupt gates)
 *   0x30–0x36  IO-module-reserved primitives (system-only interrupt gates)
 *   0x40–0x4F  gates installed by the IO module through `fill_gate`
 *   0x50/0x60  keyboard / disk external processes
 *   0xFE       timer (highest external priority)
 */

use core::ptr::addr_of_mut;

use x86_64::VirtAddr;
use x86_64::structures::idt::InterruptDescriptorTable;

use super::entry;
use crate::syscall::numbers as nr;

static mut IDT: InterruptDescriptorTable = InterruptDescriptorTable::new();

/// One bit per vector: set when the gate is marked present.
static mut GATE_USED: [u64; 4] = [0; 4];

pub fn gate_present(vector: u8) -> bool {
    let used = unsafe { &*addr_of_mut!(GATE_USED) };
    used[(vector >> 6) as usize] & (1 << (vector & 63)) != 0
}

fn mark_present(vector: u8) {
    let used = unsafe { &mut *addr_of_mut!(GATE_USED) };
    used[(vector >> 6) as usize] |= 1 << (vector & 63);
}

/// Install a gate. `user` lets ring 3 invoke it; `trap` leaves external
/// interrupts enabled in the handler (only the IO-module gates want
/// that: their bodies are ordinary interruptible code).
pub fn set_gate(vector: u8, handler: extern "C" fn(), user: bool, trap: bool) {
    use x86_64::PrivilegeLevel;

    let idt = unsafe { &mut *addr_of_mut!(IDT) };
    let opts = unsafe { idt[vector].set_handler_addr(VirtAddr::new(handler as u64)) };
    if user {
        opts.set_privilege_level(PrivilegeLevel::Ring3);
    }
    if trap {
        opts.disable_interrupts(false);
    }
    mark_present(vector);
}

/// Bind the pre-built stub for `irq` to `vector` (external-process
/// activation checked the vector was free).
pub fn load_handler(vector: u8, irq: usize) {
    set_gate(vector, entry::IRQ_STUBS[irq], false, false);
}

/// Build the fixed part of the table and load it.
pub fn init() {
    macro_rules! exc {
        ($field:ident, $stub:path) => {
            unsafe {
                let idt = &mut *addr_of_mut!(IDT);
                idt.$field
                    .set_handler_addr(VirtAddr::new($stub as usize as u64));
            }
        };
    }

    exc!(divide_error, entry::exc_divide);
    exc!(debug, entry::exc_debug);
    exc!(non_maskable_interrupt, entry::nmi_stub);
    exc!(breakpoint, entry::exc_breakpoint);
    exc!(overflow, entry::exc_overflow);
    exc!(bound_range_exceeded, entry::exc_bound);
    exc!(invalid_opcode, entry::exc_invalid_op);
    exc!(device_not_available, entry::exc_no_device);
    exc!(double_fault, entry::exc_double_fault);
    exc!(invalid_tss, entry::exc_invalid_tss);
    exc!(segment_not_present, entry::exc_no_segment);
    exc!(stack_segment_fault, entry::exc_stack_fault);
    exc!(general_protection_fault, entry::exc_gp_fault);
    exc!(page_fault, entry::exc_page_fault);
    exc!(x87_floating_point, entry::exc_x87);
    exc!(alignment_check, entry::exc_alignment);
    exc!(machine_check, entry::exc_machine_check);
    exc!(simd_floating_point, entry::exc_simd);
    exc!(virtualization, entry::exc_virtualization);
    exc!(cp_protection_exception, entry::exc_control_protection);
    for v in 0..32u8 {
        mark_present(v);
    }

    // Common primitives: reachable from user level.
    set_gate(nr::TYPE_ACTIVATE_P, crate::syscall::stubs::g_activate_p, true, false);
    set_gate(nr::TYPE_TERMINATE_P, crate::syscall::stubs::g_terminate_p, true, false);
    set_gate(nr::TYPE_SEM_INI, crate::syscall::stubs::g_sem_ini, true, false);
    set_gate(nr::TYPE_SEM_WAIT, crate::syscall::stubs::g_sem_wait, true, false);
    set_gate(nr::TYPE_SEM_SIGNAL, crate::syscall::stubs::g_sem_signal, true, false);
    set_gate(nr::TYPE_DELAY, crate::syscall::stubs::g_delay, true, false);
    set_gate(nr::TYPE_DO_LOG, crate::syscall::stubs::g_do_log, true, false);
    set_gate(nr::TYPE_GETMEMINFO, crate::syscall::stubs::g_getmeminfo, true, false);
    set_gate(nr::TYPE_BARRIER_CREATE, crate::syscall::stubs::g_barrier_create, true, false);
    set_gate(nr::TYPE_BARRIER, crate::syscall::stubs::g_barrier, true, false);

    // Primitives reserved to the IO module (system level only).
    set_gate(nr::TYPE_ACTIVATE_PE, crate::syscall::stubs::g_activate_pe, false, false);
    set_gate(nr::TYPE_WFI, crate::syscall::stubs::g_wfi, false, false);
    set_gate(nr::TYPE_FILL_GATE, crate::syscall::stubs::g_fill_gate, false, false);
    set_gate(nr::TYPE_ABORT_P, crate::syscall::stubs::g_abort_p, false, false);
    set_gate(nr::TYPE_IO_PANIC, crate::syscall::stubs::g_io_panic, false, false);
    set_gate(nr::TYPE_TRANSLATE, crate::syscall::stubs::g_translate, false, false);
    set_gate(nr::TYPE_ACCESS, crate::syscall::stubs::g_access, false, false);

    // The timer driver's vector.
    set_gate(nr::INTR_TYPE_TIMER, entry::timer_stub, false, false);

    unsafe {
        (*addr_of_mut!(IDT)).load_unsafe();
    }
    log::info!("IDT loaded");
}
