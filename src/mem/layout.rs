/*
 * Virtual Address-Space Layout
 *
 * The virtual memory of every process is split into five parts, each a
 * whole number of root-table entries (so a part is defined purely by an
 * interval of indices in the root table):
 *
 *   index  count  part
 *     0      1    system/shared   (kernel image + physical-memory window)
 *     1      1    system/private  (the per-process kernel stack)
 *     2      1    IO/shared       (the IO-module image and heap)
 *   256    128    user/shared     (the user-module image and heap)
 *   384    128    user/private    (the per-process user stack)
 *
 * Shared parts are installed by copying root-table entries from the
 * initial address space, so their whole translation sub-trees are
 * physically shared by every process; private parts are built per
 * process. Because the system/private part is mapped at the same virtual
 * addresses in every process, the kernel-stack base is one constant.
 */

/// Bytes covered by one root-table entry (level-3 region)
pub const PART_SIZE: u64 = 1 << 39;

pub const I_SYS_SHARED: usize = 0;
pub const N_SYS_SHARED: usize = 1;
pub const I_SYS_PRIVATE: usize = 1;
pub const N_SYS_PRIVATE: usize = 1;
pub const I_IO_SHARED: usize = 2;
pub const N_IO_SHARED: usize = 1;
pub const I_USR_SHARED: usize = 256;
pub const N_USR_SHARED: usize = 128;
pub const I_USR_PRIVATE: usize = 384;
pub const N_USR_PRIVATE: usize = 128;

/// Turn a 48-bit address into its canonical form (sign-extend bit 47).
pub const fn norm(addr: u64) -> u64 {
    if addr & (1 << 47) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    }
}

/// Base of a part given its first root-table index.
pub const fn part_base(index: usize) -> u64 {
    norm(index as u64 * PART_SIZE)
}

pub const SYS_SHARED_BASE: u64 = part_base(I_SYS_SHARED);
pub const SYS_SHARED_END: u64 = SYS_SHARED_BASE + PART_SIZE * N_SYS_SHARED as u64;
pub const SYS_PRIVATE_BASE: u64 = part_base(I_SYS_PRIVATE);
pub const SYS_PRIVATE_END: u64 = SYS_PRIVATE_BASE + PART_SIZE * N_SYS_PRIVATE as u64;
pub const IO_SHARED_BASE: u64 = part_base(I_IO_SHARED);
pub const IO_SHARED_END: u64 = IO_SHARED_BASE + PART_SIZE * N_IO_SHARED as u64;
pub const USR_SHARED_BASE: u64 = part_base(I_USR_SHARED);
pub const USR_SHARED_END: u64 =
    USR_SHARED_BASE.wrapping_add(PART_SIZE * N_USR_SHARED as u64);
pub const USR_PRIVATE_BASE: u64 = part_base(I_USR_PRIVATE);
/// The user/private part reaches the top of the canonical space, so its
/// limit wraps to zero; all arithmetic against it is wrapping.
pub const USR_PRIVATE_END: u64 =
    USR_PRIVATE_BASE.wrapping_add(PART_SIZE * N_USR_PRIVATE as u64);

/// Virtual base of every process's kernel stack (the stack grows down
/// from the top of system/private)
pub const KSTACK_TOP: u64 = SYS_PRIVATE_END;

/// Virtual top of every user-level process's user stack
pub const USTACK_TOP: u64 = USR_PRIVATE_END;

/// Whether `v` lies in the user/shared part
pub const fn in_user_shared(v: u64) -> bool {
    v >= USR_SHARED_BASE && v < USR_SHARED_END
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_canonical_and_disjoint() {
        assert_eq!(SYS_SHARED_BASE, 0);
        assert_eq!(SYS_PRIVATE_BASE, 1 << 39);
        assert_eq!(USR_SHARED_BASE, 0xFFFF_8000_0000_0000);
        assert_eq!(USR_PRIVATE_BASE, 0xFFFF_C000_0000_0000);
        assert_eq!(USR_PRIVATE_END, 0);
        assert!(SYS_SHARED_END <= SYS_PRIVATE_BASE);
        assert!(IO_SHARED_END <= USR_SHARED_BASE);
        assert!(USR_SHARED_END <= USR_PRIVATE_BASE);
    }

    #[test]
    fn user_shared_containment() {
        assert!(in_user_shared(USR_SHARED_BASE));
        assert!(in_user_shared(USR_SHARED_END - 1));
        assert!(!in_user_shared(USR_SHARED_END));
        assert!(!in_user_shared(0));
        assert!(!in_user_shared(KSTACK_TOP - 8));
    }
}
