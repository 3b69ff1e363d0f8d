/*
 * Four-Level Translation Trees
 *
 * Walks, builds and tears down the per-process translation trees. All
 * physical memory is reachable through the window the boot loader set up
 * in the system/shared part (physical address == virtual address there),
 * so a table can be touched given nothing but its physical address. This
 * also means a *new* process's structures can be initialized while the
 * current process's tree is active: translate through the new root, then
 * access the result through the window.
 *
 * Table frames come from the frame allocator, which also counts each
 * table's valid entries; a table is released the moment its last entry
 * is cleared.
 */

use bitflags::bitflags;

use super::frame::with_frames;
use super::layout;
use crate::config::PAGE_SIZE;

bitflags! {
    /// Translation-entry bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// Large page (in a level 2 or 3 entry)
        const PAGE_SIZE_BIT = 1 << 7;
    }
}

/// Mask selecting the frame address in an entry
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Number of levels in the tree
const LEVELS: usize = 4;

/// Entries per table
const ENTRIES: u64 = 512;

/// Index of `v` in the table at `level` (4 = root)
fn index(v: u64, level: usize) -> usize {
    ((v >> (12 + 9 * (level - 1))) & 0x1FF) as usize
}

/// Pointer to entry `i` of the table at physical address `table`,
/// through the physical-memory window.
fn entry_ptr(table: u64, i: usize) -> *mut u64 {
    (table as *mut u64).wrapping_add(i)
}

fn read_entry(table: u64, i: usize) -> u64 {
    unsafe { core::ptr::read_volatile(entry_ptr(table, i)) }
}

fn write_entry(table: u64, i: usize, e: u64) {
    unsafe { core::ptr::write_volatile(entry_ptr(table, i), e) }
}

/// Allocate a frame destined to hold a table: zeroed, valid-entry
/// counter reset.
pub fn alloc_table() -> Option<u64> {
    let f = with_frames(|p| p.alloc())?;
    unsafe {
        core::ptr::write_bytes(f as *mut u8, 0, PAGE_SIZE as usize);
    }
    Some(f)
}

/// Set entry `i` of `table` to `e`, keeping the valid-entry counter of
/// `table` in step.
fn set_entry(table: u64, i: usize, e: u64) {
    let old = read_entry(table, i);
    if old & PteFlags::PRESENT.bits() != 0 {
        with_frames(|p| p.dec_ref(table));
    }
    if e & PteFlags::PRESENT.bits() != 0 {
        with_frames(|p| p.inc_ref(table));
    }
    write_entry(table, i, e);
}

/// Walk one level down from `table` toward `v`, creating the next-level
/// table if asked to. Returns the physical address of the next table.
fn walk_down(table: u64, v: u64, level: usize, create: bool) -> Option<u64> {
    let i = index(v, level);
    let e = read_entry(table, i);
    if e & PteFlags::PRESENT.bits() != 0 {
        return Some(e & ADDR_MASK);
    }
    if !create {
        return None;
    }
    let fresh = alloc_table()?;
    set_entry(
        table,
        i,
        fresh | (PteFlags::PRESENT | PteFlags::WRITE | PteFlags::USER).bits(),
    );
    Some(fresh)
}

/// Map `[begin, end)` in the tree rooted at `root`. `frame_for` supplies
/// the frame backing each page (returning 0 to signal exhaustion).
///
/// Returns the first virtual address left unmapped: `end` on success,
/// the failure point otherwise (the caller unwinds with `unmap`).
pub fn map(
    root: u64,
    begin: u64,
    end: u64,
    flags: PteFlags,
    mut frame_for: impl FnMut(u64) -> u64,
) -> u64 {
    let mut v = begin;
    while v != end {
        let mut table = root;
        let mut ok = true;
        for level in (2..=LEVELS).rev() {
            match walk_down(table, v, level, true) {
                Some(next) => table = next,
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            return v;
        }
        let frame = frame_for(v);
        if frame == 0 {
            return v;
        }
        set_entry(
            table,
            index(v, 1),
            frame | (flags | PteFlags::PRESENT).bits(),
        );
        v = v.wrapping_add(PAGE_SIZE);
    }
    end
}

/// Unmap `[begin, end)` from the tree rooted at `root`, handing each
/// released frame to `release(vaddr, frame)` and freeing every table
/// that runs out of valid entries on the way.
pub fn unmap(root: u64, begin: u64, end: u64, mut release: impl FnMut(u64, u64)) {
    let mut v = begin;
    while v != end {
        // Record the path so emptied tables can be pruned bottom-up.
        let mut path = [root; LEVELS];
        let mut table = root;
        let mut present = true;
        for level in (2..=LEVELS).rev() {
            match walk_down(table, v, level, false) {
                Some(next) => {
                    table = next;
                    path[level - 2] = next;
                }
                None => {
                    present = false;
                    break;
                }
            }
        }
        if present {
            let i = index(v, 1);
            let e = read_entry(table, i);
            if e & PteFlags::PRESENT.bits() != 0 {
                set_entry(table, i, 0);
                release(v, e & ADDR_MASK);
            }
            // Prune tables that just became empty (never the root).
            for level in 2..=LEVELS {
                let child = path[level - 2];
                if with_frames(|p| p.ref_count(child)) != 0 {
                    break;
                }
                let parent = if level == LEVELS {
                    root
                } else {
                    path[level - 1]
                };
                set_entry(parent, index(v, level), 0);
                with_frames(|p| p.free_table(child));
            }
        }
        v = v.wrapping_add(PAGE_SIZE);
    }
}

/// Translate `v` through the tree rooted at `root`.
pub fn translate(root: u64, v: u64) -> Option<u64> {
    let mut table = root;
    for level in (2..=LEVELS).rev() {
        let e = read_entry(table, index(v, level));
        if e & PteFlags::PRESENT.bits() == 0 {
            return None;
        }
        if e & PteFlags::PAGE_SIZE_BIT.bits() != 0 {
            // Large page: the region below this entry is linear.
            let region = PAGE_SIZE << (9 * (level - 1));
            return Some((e & ADDR_MASK) + (v & (region - 1)));
        }
        table = e & ADDR_MASK;
    }
    let e = read_entry(table, index(v, 1));
    if e & PteFlags::PRESENT.bits() == 0 {
        return None;
    }
    Some((e & ADDR_MASK) + (v & (PAGE_SIZE - 1)))
}

/// Read one 64-bit word of a process's memory, translating `v` through
/// the process's tree and going through the physical window.
pub fn read_word(root: u64, v: u64) -> Option<u64> {
    let pa = translate(root, v)?;
    Some(unsafe { core::ptr::read_volatile(pa as *const u64) })
}

/// Check that every page of `[begin, begin+size)` is present in `root`
/// with the user bit, and the write bit when `writeable` is asked for.
pub fn check_user_range(root: u64, begin: u64, size: u64, writeable: bool) -> bool {
    // Intervals that wrap the top of the address space are not valid.
    let Some(end) = begin.checked_add(size) else {
        return false;
    };
    let mut v = begin & !(PAGE_SIZE - 1);
    while v < end {
        let mut table = root;
        let mut leaf = 0u64;
        let mut ok = false;
        for level in (1..=LEVELS).rev() {
            let e = read_entry(table, index(v, level));
            if e & PteFlags::PRESENT.bits() == 0 || e & PteFlags::USER.bits() == 0 {
                break;
            }
            if level == 1 || e & PteFlags::PAGE_SIZE_BIT.bits() != 0 {
                leaf = e;
                ok = true;
                break;
            }
            table = e & ADDR_MASK;
        }
        if !ok || (writeable && leaf & PteFlags::WRITE.bits() == 0) {
            return false;
        }
        v += PAGE_SIZE;
    }
    true
}

/// Copy `count` root entries starting at `from` out of `src` into `dst`,
/// keeping `dst`'s valid-entry counter right. The copied sub-trees become
/// physically shared.
pub fn copy_root_span(src: u64, dst: u64, from: usize, count: usize) {
    for i in from..from + count {
        set_entry(dst, i, read_entry(src, i));
    }
}

/// Undo `copy_root_span`: zero the entries so the valid-entry counter
/// drops back and the root frame becomes releasable.
pub fn clear_root_span(dst: u64, from: usize, count: usize) {
    for i in from..from + count {
        set_entry(dst, i, 0);
    }
}

/// Clear every shared-part entry of a root table (the inverse of the
/// seeding done at process creation).
pub fn clear_shared_parts(root: u64) {
    clear_root_span(root, layout::I_SYS_SHARED, layout::N_SYS_SHARED);
    clear_root_span(root, layout::I_IO_SHARED, layout::N_IO_SHARED);
    clear_root_span(root, layout::I_USR_SHARED, layout::N_USR_SHARED);
}

/// Debug check used by tests of the walker arithmetic.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_split_the_address() {
        let v: u64 = 0xFFFF_C000_0000_0000u64.wrapping_sub(0x1000);
        // Last page of user/shared: root index 383, everything else 511.
        assert_eq!(index(v, 4), 383);
        assert_eq!(index(v, 3), 511);
        assert_eq!(index(v, 2), 511);
        assert_eq!(index(v, 1), 511);

        let k = crate::mem::layout::KSTACK_TOP - 0x1000;
        assert_eq!(index(k, 4), 1);
        assert_eq!(index(k, 1), 511);
    }
}
