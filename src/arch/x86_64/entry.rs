/*
 * Kernel Entry and Exit Trampolines
 *
 * Every gate that enters the kernel proper goes through the same three
 * steps: save the caller's sixteen general-purpose registers into the
 * running process's descriptor, run the Rust handler, and leave through
 * `dispatch_current`, which reloads the (possibly different) chosen
 * process. The handler side only ever changes *which* descriptor is
 * chosen; the register restore and the address-space reload all happen
 * here, on the way out. Running the scheduler twice within one entry is
 * therefore harmless: only the last choice is acted on.
 *
 * The exit path also settles the one deferred piece of process
 * destruction: a process that destroys itself is still standing on its
 * own kernel stack, so that stack (and the root table mapping it) can
 * only be released after the stack pointer has been swung onto the
 * incoming process's stack. `dispatch_current` does the swing and then
 * asks the scheduler whether a teardown was left pending.
 *
 * The saved RSP always addresses the interrupt frame pushed by the gate,
 * which is also how the kernel recovers the privilege level of the
 * interrupted flow (second word of the frame).
 */

use crate::sched::proc::{CTX_OFFSET, ProcDesc, ROOT_TAB_OFFSET};

/// Descriptor of the process whose state the next kernel entry must
/// save. Written on every kernel exit, read only by the trampolines
/// below (always with interrupts masked).
#[unsafe(no_mangle)]
pub static mut CURRENT_DESC: *mut ProcDesc = core::ptr::null_mut();

/// Save the full register state into `CURRENT_DESC`.
///
/// Called as the first instruction of every saving gate stub: on entry
/// the stack holds our return address on top of the gate's interrupt
/// frame, and no register has been touched yet. The saved RSP is
/// adjusted to address the interrupt frame itself.
#[unsafe(naked)]
pub extern "C" fn save_state() {
    core::arch::naked_asm!(
        "push rax",
        "mov rax, [rip + {cur}]",
        "mov [rax + {ctx} + 8*1], rcx",
        "mov [rax + {ctx} + 8*2], rdx",
        "mov [rax + {ctx} + 8*3], rbx",
        "mov [rax + {ctx} + 8*5], rbp",
        "mov [rax + {ctx} + 8*6], rsi",
        "mov [rax + {ctx} + 8*7], rdi",
        "mov [rax + {ctx} + 8*8], r8",
        "mov [rax + {ctx} + 8*9], r9",
        "mov [rax + {ctx} + 8*10], r10",
        "mov [rax + {ctx} + 8*11], r11",
        "mov [rax + {ctx} + 8*12], r12",
        "mov [rax + {ctx} + 8*13], r13",
        "mov [rax + {ctx} + 8*14], r14",
        "mov [rax + {ctx} + 8*15], r15",
        "pop rcx", // the caller's RAX
        "mov [rax + {ctx} + 8*0], rcx",
        "lea rcx, [rsp + 8]", // skip the return address: the interrupt frame
        "mov [rax + {ctx} + 8*4], rcx",
        "mov rcx, [rax + {ctx} + 8*1]",
        "ret",
        cur = sym CURRENT_DESC,
        ctx = const CTX_OFFSET,
    )
}

/// `save_state` for exception gates that push an error code: the
/// interrupt frame sits one word further down.
#[unsafe(naked)]
pub extern "C" fn save_state_err() {
    core::arch::naked_asm!(
        "push rax",
        "mov rax, [rip + {cur}]",
        "mov [rax + {ctx} + 8*1], rcx",
        "mov [rax + {ctx} + 8*2], rdx",
        "mov [rax + {ctx} + 8*3], rbx",
        "mov [rax + {ctx} + 8*5], rbp",
        "mov [rax + {ctx} + 8*6], rsi",
        "mov [rax + {ctx} + 8*7], rdi",
        "mov [rax + {ctx} + 8*8], r8",
        "mov [rax + {ctx} + 8*9], r9",
        "mov [rax + {ctx} + 8*10], r10",
        "mov [rax + {ctx} + 8*11], r11",
        "mov [rax + {ctx} + 8*12], r12",
        "mov [rax + {ctx} + 8*13], r13",
        "mov [rax + {ctx} + 8*14], r14",
        "mov [rax + {ctx} + 8*15], r15",
        "pop rcx",
        "mov [rax + {ctx} + 8*0], rcx",
        "lea rcx, [rsp + 16]", // return address + error code
        "mov [rax + {ctx} + 8*4], rcx",
        "mov rcx, [rax + {ctx} + 8*1]",
        "ret",
        cur = sym CURRENT_DESC,
        ctx = const CTX_OFFSET,
    )
}

/// Publish the scheduler's choice and return its descriptor (in RAX).
extern "C" fn prepare_exit() -> *mut ProcDesc {
    crate::sched::with_core(|core| {
        let cur = core.current;
        let ptr = core.procs.desc_ptr(cur);
        unsafe {
            CURRENT_DESC = ptr;
        }
        ptr
    })
}

/// Release the kernel stack and root table of the last self-destroyed
/// process, if one is latched. Runs on the incoming process's stack.
extern "C" fn teardown_leftover() {
    let latched = crate::sched::with_core(|core| core.pending_teardown.take());
    if let Some(root) = latched {
        crate::sched::lifecycle::destroy_leftover_stack(root);
    }
}

/// Leave the kernel into the chosen process: reload its address space,
/// swing onto its kernel stack, settle any deferred stack teardown,
/// restore its registers and return from the interrupt.
///
/// Jumped to (never called) by every saving gate stub; also the way the
/// boot flow hands the processor to the first scheduled process.
#[unsafe(naked)]
pub extern "C" fn dispatch_current() -> ! {
    core::arch::naked_asm!(
        "call {prepare}",
        "mov r12, rax",
        "mov rax, [r12 + {root}]",
        "mov cr3, rax",
        "mov rsp, [r12 + {ctx} + 8*4]",
        "call {teardown}",
        "mov rax, [r12 + {ctx} + 8*0]",
        "mov rcx, [r12 + {ctx} + 8*1]",
        "mov rdx, [r12 + {ctx} + 8*2]",
        "mov rbx, [r12 + {ctx} + 8*3]",
        "mov rbp, [r12 + {ctx} + 8*5]",
        "mov rsi, [r12 + {ctx} + 8*6]",
        "mov rdi, [r12 + {ctx} + 8*7]",
        "mov r8, [r12 + {ctx} + 8*8]",
        "mov r9, [r12 + {ctx} + 8*9]",
        "mov r10, [r12 + {ctx} + 8*10]",
        "mov r11, [r12 + {ctx} + 8*11]",
        "mov r13, [r12 + {ctx} + 8*13]",
        "mov r14, [r12 + {ctx} + 8*14]",
        "mov r15, [r12 + {ctx} + 8*15]",
        "mov r12, [r12 + {ctx} + 8*12]",
        "iretq",
        prepare = sym prepare_exit,
        teardown = sym teardown_leftover,
        root = const ROOT_TAB_OFFSET,
        ctx = const CTX_OFFSET,
    )
}

/// One saving stub per primitive gate: save, run the handler with the
/// caller's argument registers untouched, leave through the dispatcher.
macro_rules! prim_stub {
    ($name:ident, $handler:path) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "call {save}",
                "call {handler}",
                "jmp {resume}",
                save = sym $crate::arch::x86_64::entry::save_state,
                handler = sym $handler,
                resume = sym $crate::arch::x86_64::entry::dispatch_current,
            )
        }
    };
}
pub(crate) use prim_stub;

/// One stub per IRQ pin for external processes: the pin number is the
/// handler's argument.
macro_rules! irq_stub {
    ($name:ident, $irq:literal) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "call {save}",
                concat!("mov edi, ", $irq),
                "call {handler}",
                "jmp {resume}",
                save = sym $crate::arch::x86_64::entry::save_state,
                handler = sym $crate::sched::ext::extern_irq_entry,
                resume = sym $crate::arch::x86_64::entry::dispatch_current,
            )
        }
    };
}

irq_stub!(irq_stub_0, 0);
irq_stub!(irq_stub_1, 1);
irq_stub!(irq_stub_2, 2);
irq_stub!(irq_stub_3, 3);
irq_stub!(irq_stub_4, 4);
irq_stub!(irq_stub_5, 5);
irq_stub!(irq_stub_6, 6);
irq_stub!(irq_stub_7, 7);
irq_stub!(irq_stub_8, 8);
irq_stub!(irq_stub_9, 9);
irq_stub!(irq_stub_10, 10);
irq_stub!(irq_stub_11, 11);
irq_stub!(irq_stub_12, 12);
irq_stub!(irq_stub_13, 13);
irq_stub!(irq_stub_14, 14);
irq_stub!(irq_stub_15, 15);
irq_stub!(irq_stub_16, 16);
irq_stub!(irq_stub_17, 17);
irq_stub!(irq_stub_18, 18);
irq_stub!(irq_stub_19, 19);
irq_stub!(irq_stub_20, 20);
irq_stub!(irq_stub_21, 21);
irq_stub!(irq_stub_22, 22);
irq_stub!(irq_stub_23, 23);

/// The pre-built stub for each IRQ pin; `load_handler` installs the one
/// a new external process needs.
pub static IRQ_STUBS: [extern "C" fn(); crate::config::MAX_IRQ] = [
    irq_stub_0,
    irq_stub_1,
    irq_stub_2,
    irq_stub_3,
    irq_stub_4,
    irq_stub_5,
    irq_stub_6,
    irq_stub_7,
    irq_stub_8,
    irq_stub_9,
    irq_stub_10,
    irq_stub_11,
    irq_stub_12,
    irq_stub_13,
    irq_stub_14,
    irq_stub_15,
    irq_stub_16,
    irq_stub_17,
    irq_stub_18,
    irq_stub_19,
    irq_stub_20,
    irq_stub_21,
    irq_stub_22,
    irq_stub_23,
];

/// Exception stub without an error code: vector, 0, saved RIP.
macro_rules! exc_stub {
    ($name:ident, $vec:literal) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "call {save}",
                concat!("mov edi, ", $vec),
                "xor esi, esi",
                "mov rdx, [rsp]",
                "call {handler}",
                "jmp {resume}",
                save = sym $crate::arch::x86_64::entry::save_state,
                handler = sym $crate::sched::dump::exception_entry,
                resume = sym $crate::arch::x86_64::entry::dispatch_current,
            )
        }
    };
}

/// Exception stub with an error code: vector, error, saved RIP. The
/// error code is dropped from the stack so the frame is uniform again.
macro_rules! exc_stub_err {
    ($name:ident, $vec:literal) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "call {save}",
                concat!("mov edi, ", $vec),
                "mov rsi, [rsp]",
                "mov rdx, [rsp + 8]",
                "add rsp, 8",
                "call {handler}",
                "jmp {resume}",
                save = sym $crate::arch::x86_64::entry::save_state_err,
                handler = sym $crate::sched::dump::exception_entry,
                resume = sym $crate::arch::x86_64::entry::dispatch_current,
            )
        }
    };
}

exc_stub!(exc_divide, 0);
exc_stub!(exc_debug, 1);
exc_stub!(exc_breakpoint, 3);
exc_stub!(exc_overflow, 4);
exc_stub!(exc_bound, 5);
exc_stub!(exc_invalid_op, 6);
exc_stub!(exc_no_device, 7);
exc_stub_err!(exc_double_fault, 8);
exc_stub_err!(exc_invalid_tss, 10);
exc_stub_err!(exc_no_segment, 11);
exc_stub_err!(exc_stack_fault, 12);
exc_stub_err!(exc_gp_fault, 13);
exc_stub_err!(exc_page_fault, 14);
exc_stub!(exc_x87, 16);
exc_stub_err!(exc_alignment, 17);
exc_stub!(exc_machine_check, 18);
exc_stub!(exc_simd, 19);
exc_stub!(exc_virtualization, 20);
exc_stub_err!(exc_control_protection, 21);

/// Non-maskable interrupt: the system is stopped and every process
/// dumped (the autograder uses an NMI to flag a test that hung).
#[unsafe(naked)]
pub extern "C" fn nmi_stub() {
    core::arch::naked_asm!(
        "call {save}",
        "call {handler}",
        "jmp {resume}",
        save = sym save_state,
        handler = sym crate::sched::dump::nmi_entry,
        resume = sym dispatch_current,
    )
}

/// Timer tick: the one IRQ handled by an in-kernel driver.
#[unsafe(naked)]
pub extern "C" fn timer_stub() {
    core::arch::naked_asm!(
        "call {save}",
        "call {handler}",
        "jmp {resume}",
        save = sym save_state,
        handler = sym crate::syscall::handlers::timer_entry,
        resume = sym dispatch_current,
    )
}
