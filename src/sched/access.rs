/*
 * User-Pointer Validation
 *
 * The IO module runs with external interrupts enabled and must not page
 * fault on an address a user program handed it (nor be tricked into
 * touching memory the user itself may not touch). Every IO primitive
 * that consumes a user pointer therefore validates the whole range
 * first: each page present, user-accessible, writable when the transfer
 * writes to it, and — for the parameter-passing buffers — contained in
 * the user/shared part.
 */

use super::Core;
use crate::mem::layout::in_user_shared;

/// Validate `[begin, begin + size)` against the current process's
/// translation tree.
pub fn access_ok(core: &Core, begin: u64, size: u64, writeable: bool, shared: bool) -> bool {
    if shared {
        // An empty range touches no pages, but it still has to *be*
        // somewhere: the base address must sit in user/shared.
        if !in_user_shared(begin) {
            return false;
        }
        if size > 0 {
            match begin.checked_add(size - 1) {
                Some(last) if in_user_shared(last) => {}
                _ => return false,
            }
        }
    }

    #[cfg(not(test))]
    {
        let root = core.procs.desc(core.current).root_tab;
        crate::mem::paging::check_user_range(root, begin, size, writeable)
    }
    #[cfg(test)]
    {
        let _ = (core, writeable);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::layout::{USR_SHARED_BASE, USR_SHARED_END};
    use crate::sched::proc::{Level, ProcDesc};
    use alloc::boxed::Box;

    fn core() -> Core {
        Core::new(Box::new(ProcDesc::new(1, Level::User)))
    }

    #[test]
    fn shared_ranges_must_sit_in_user_shared() {
        let c = core();
        assert!(access_ok(&c, USR_SHARED_BASE, 4096, false, true));
        assert!(access_ok(&c, USR_SHARED_END - 4096, 4096, true, true));
        // Straddling the end of the part is rejected.
        assert!(!access_ok(&c, USR_SHARED_END - 8, 16, false, true));
        // So is anything outside it entirely.
        assert!(!access_ok(&c, 0x1000, 16, false, true));
    }

    #[test]
    fn empty_range_still_needs_a_user_shared_base() {
        let c = core();
        assert!(access_ok(&c, USR_SHARED_BASE, 0, false, true));
        assert!(!access_ok(&c, 0x1000, 0, false, true));
        // Without the containment requirement an empty range passes.
        assert!(access_ok(&c, 0x1000, 0, false, false));
    }
}
