/*
 * Process Creation and Destruction
 *
 * Creation builds, in order: a zeroed descriptor, an id, a root table
 * seeded with the shared parts of the current address space (the
 * sub-trees become physically shared), a kernel stack at the top of
 * system/private and, for user-level processes, a user stack at the top
 * of user/private. The kernel stack is pre-loaded with the interrupt
 * frame that makes the first dispatch land on the process body with its
 * argument in the first argument register and interrupts enabled. Any
 * failure unwinds in reverse order.
 *
 * The new stack cannot be touched through its virtual address — that
 * would translate through the *current* process's tree — so it is
 * reached by translating through the new root and writing via the
 * physical-memory window.
 *
 * Destruction frees everything immediately except when a process
 * destroys itself: it is still standing on its own kernel stack, so the
 * root-table address is latched and the stack (plus the root table) is
 * released by the exit path right after the switch onto the incoming
 * process's stack.
 */

use alloc::boxed::Box;

use super::proc::{Level, NO_PROC, Pid, ProcDesc, ctx};
use super::{Core, Fault};
use crate::arch::gdt::{SEL_SYS_CODE, SEL_USR_CODE, SEL_USR_DATA};
use crate::config::{MIN_PRIORITY, PAGE_SIZE, SYS_STACK_SIZE, USR_STACK_SIZE};
use crate::mem::layout::{
    I_IO_SHARED, I_SYS_SHARED, I_USR_SHARED, KSTACK_TOP, N_IO_SHARED, N_SYS_SHARED,
    N_USR_SHARED, USTACK_TOP,
};
use crate::mem::{frame, paging};

/// RFLAGS value for a freshly created process: interrupts enabled.
const INITIAL_RFLAGS: u64 = 0x202;

/// Map a stack of `size` bytes growing down from `top` in the tree
/// rooted at `root`. Unwinds the partial mapping on failure.
fn create_stack(root: u64, top: u64, size: u64, level: Level) -> bool {
    let bottom = top.wrapping_sub(size);
    let mut flags = paging::PteFlags::WRITE;
    if level == Level::User {
        flags |= paging::PteFlags::USER;
    }
    let reached = paging::map(root, bottom, top, flags, |_| {
        frame::with_frames(|p| p.alloc()).unwrap_or(0)
    });
    if reached != top {
        paging::unmap(root, bottom, reached, |_, frame| {
            frame::with_frames(|p| p.free(frame))
        });
        return false;
    }
    true
}

fn destroy_stack(root: u64, top: u64, size: u64) {
    paging::unmap(root, top.wrapping_sub(size), top, |_, frame| {
        frame::with_frames(|p| p.free(frame))
    });
}

/// Common part of the two activation primitives. Returns the id of the
/// new process, or `None` with everything unwound.
pub fn create_process(core: &mut Core, f: u64, a: u64, prio: u32, level: Level) -> Option<Pid> {
    let mut desc = Box::new(ProcDesc::new(prio, level));
    desc.context[ctx::RDI] = a;
    desc.entry = f;
    desc.arg = a;

    let id = match core.procs.insert(desc) {
        Ok(id) => id,
        Err(_) => return None,
    };

    let Some(root) = paging::alloc_table() else {
        core.procs.remove(id);
        return None;
    };

    // Shared parts come from the current root: the sub-trees are shared,
    // which both saves memory and guarantees the kernel and the modules
    // are mapped identically everywhere.
    let current_root = core.procs.desc(core.current).root_tab;
    paging::copy_root_span(current_root, root, I_SYS_SHARED, N_SYS_SHARED);
    paging::copy_root_span(current_root, root, I_IO_SHARED, N_IO_SHARED);
    paging::copy_root_span(current_root, root, I_USR_SHARED, N_USR_SHARED);

    if !create_stack(root, KSTACK_TOP, SYS_STACK_SIZE, Level::System) {
        paging::clear_shared_parts(root);
        frame::with_frames(|p| p.free_table(root));
        core.procs.remove(id);
        return None;
    }

    // The top page of the new kernel stack, through the physical window.
    let stack_top = paging::translate(root, KSTACK_TOP - PAGE_SIZE)
        .expect("kernel stack just mapped but not translatable")
        + PAGE_SIZE;
    let push = |slot: u64, value: u64| unsafe {
        core::ptr::write_volatile((stack_top - 8 * slot) as *mut u64, value);
    };

    let saved_rsp = match level {
        Level::User => {
            // Five words: the first return-from-interrupt drops to user
            // level, on the user stack.
            push(5, f); // RIP
            push(4, SEL_USR_CODE); // CS
            push(3, INITIAL_RFLAGS); // RFLAGS
            push(2, USTACK_TOP.wrapping_sub(8)); // RSP
            push(1, SEL_USR_DATA); // SS

            if !create_stack(root, USTACK_TOP, USR_STACK_SIZE, Level::User) {
                log::warn!("user stack creation failed");
                destroy_stack(root, KSTACK_TOP, SYS_STACK_SIZE);
                paging::clear_shared_parts(root);
                frame::with_frames(|p| p.free_table(root));
                core.procs.remove(id);
                return None;
            }
            KSTACK_TOP - 5 * 8
        }
        Level::System => {
            // Six words: same-level return, plus a dead slot where a
            // return address would sit.
            push(6, f); // RIP
            push(5, SEL_SYS_CODE); // CS
            push(4, INITIAL_RFLAGS); // RFLAGS
            push(3, KSTACK_TOP - 8); // RSP
            push(2, 0); // SS
            push(1, 0); // (unused)
            KSTACK_TOP - 6 * 8
        }
    };

    let d = core.procs.desc_mut(id);
    d.context[ctx::RSP] = saved_rsp;
    d.root_tab = root;
    d.kstack_base = KSTACK_TOP;
    Some(id)
}

/// Release every resource of `pid`. The kernel stack and the root table
/// are deferred when the process is the one whose stack we are standing
/// on (see the module header).
pub fn destroy_process(core: &mut Core, pid: Pid) {
    let desc = core.procs.remove(pid);
    let root = desc.root_tab;
    if desc.level == Level::User {
        destroy_stack(root, USTACK_TOP, USR_STACK_SIZE);
    }
    core.pending_teardown = Some(root);
    if pid != core.prev_running {
        destroy_leftover_stack(root);
        core.pending_teardown = None;
    }
}

/// Release the kernel stack mapped in `root`, then the root table
/// itself. Runs either directly from `destroy_process` or from the exit
/// path after a deferred teardown.
pub fn destroy_leftover_stack(root: u64) {
    destroy_stack(root, KSTACK_TOP, SYS_STACK_SIZE);
    // Clearing the shared parts drops the valid-entry counter back to
    // zero, which is what lets the root frame go.
    paging::clear_shared_parts(root);
    frame::with_frames(|p| p.free_table(root));
}

/// The normal-process activation primitive.
pub fn activate_p(core: &mut Core, f: u64, a: u64, prio: u32, liv: u64) -> Result<u32, Fault> {
    // A new process may not outrank its creator, nor rank below dummy.
    if prio < MIN_PRIORITY || prio > core.procs.desc(core.current).priority {
        return Err(Fault::BadPriority(prio));
    }
    let level = match liv {
        3 => Level::User,
        0 => Level::System,
        _ => return Err(Fault::BadLevel(liv)),
    };
    if level == Level::System && core.caller_level() == Level::User {
        return Err(Fault::Protection);
    }

    match create_process(core, f, a, prio, level) {
        Some(id) => {
            let Core { ready, procs, .. } = core;
            ready.insert(procs, id);
            core.live_count += 1;
            log::info!(
                "proc={} entry={:#x}({}) prio={} liv={:?}",
                id,
                f,
                a,
                prio,
                level
            );
            Ok(id.0 as u32)
        }
        None => Ok(NO_PROC),
    }
}

/// Destroy the current process and hand the processor on.
pub fn terminate_current(core: &mut Core, logmsg: bool) {
    let pid = core.current;
    if logmsg {
        log::info!("process {} terminated", pid);
    }
    destroy_process(core, pid);
    core.live_count -= 1;
    core.schedule();
}

/// Like termination, but the process is being killed for a fault: warn,
/// optionally dump its state (skipped when the dump already happened,
/// e.g. coming from the exception path).
pub fn abort_current(core: &mut Core, selfdump: bool) {
    let pid = core.current;
    if selfdump {
        super::dump::process_dump(core, pid, log::Level::Warn);
    }
    log::warn!("process {} aborted", pid);
    terminate_current(core, false);
}
