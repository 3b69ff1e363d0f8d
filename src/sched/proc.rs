/*
 * Process Descriptors and Process Table
 *
 * A process is described by a `ProcDesc`: identity, privilege level,
 * scheduling priority, the saved general-purpose register context, the
 * root of its translation tree and the base of its kernel stack.
 *
 * Descriptors are heap-allocated and owned by the `ProcTable`, which maps
 * 16-bit process ids to them. Queues never store descriptor pointers: they
 * store ids and follow the `link` field, so a descriptor can sit in at
 * most one queue at a time and the property is checkable.
 *
 * Id allocation is cyclic first-fit: the search resumes after the last id
 * handed out, so ids are reused as late as possible. This helps whoever is
 * debugging a multi-process program, because a dangling id keeps naming a
 * dead process for as long as possible.
 */

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::config::{MAX_PROC, MAX_PROC_ID};

/// Value returned by primitives when no process could be named
pub const NO_PROC: u32 = 0xFFFF_FFFF;

/// Marker stored in `ProcDesc::barrier_id` when the process is not the
/// anchor of any pending barrier timeout
pub const NO_BARRIER: u32 = 0xFFFF_FFFF;

/// Number of saved general-purpose registers
pub const N_REG: usize = 16;

/// Indices into the saved register context
pub mod ctx {
    pub const RAX: usize = 0;
    pub const RCX: usize = 1;
    pub const RDX: usize = 2;
    pub const RBX: usize = 3;
    pub const RSP: usize = 4;
    pub const RBP: usize = 5;
    pub const RSI: usize = 6;
    pub const RDI: usize = 7;
    pub const R8: usize = 8;
    pub const R9: usize = 9;
    pub const R10: usize = 10;
    pub const R11: usize = 11;
    pub const R12: usize = 12;
    pub const R13: usize = 13;
    pub const R14: usize = 14;
    pub const R15: usize = 15;
}

/// Process identifier (also the index of the descriptor in the table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u16);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Privilege level of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Level {
    User = 3,
    System = 0,
}

/// Process descriptor
///
/// `#[repr(C)]` because the entry/exit trampolines address the `context`
/// and `root_tab` fields by offset.
#[derive(Debug)]
#[repr(C)]
pub struct ProcDesc {
    /// Saved copies of the general-purpose registers
    pub context: [u64; N_REG],
    /// Physical address of the root of the translation tree
    pub root_tab: u64,
    /// Numeric identifier
    pub id: Pid,
    /// Privilege level
    pub level: Level,
    /// Precedence in the process queues
    pub priority: u32,
    /// Virtual address of the base of the kernel stack
    pub kstack_base: u64,
    /// Barrier this process anchors, `NO_BARRIER` if none.
    ///
    /// When different from `NO_BARRIER` the process was the first to
    /// arrive at that barrier since it last closed, and it owns the
    /// delay-list node that represents the barrier's timeout.
    pub barrier_id: u32,
    /// Next process in whatever queue this descriptor sits in
    pub link: Option<Pid>,

    // Debugging information: the entry point and argument passed to the
    // activation primitive that created this process.
    pub entry: u64,
    pub arg: u64,
}

/// Byte offset of the saved context inside a descriptor (used by the
/// save/restore trampolines)
pub const CTX_OFFSET: usize = core::mem::offset_of!(ProcDesc, context);

/// Byte offset of the translation-tree root inside a descriptor
pub const ROOT_TAB_OFFSET: usize = core::mem::offset_of!(ProcDesc, root_tab);

impl ProcDesc {
    /// A zeroed descriptor with the given scheduling parameters.
    pub fn new(priority: u32, level: Level) -> Self {
        ProcDesc {
            context: [0; N_REG],
            root_tab: 0,
            id: Pid(0),
            level,
            priority,
            kstack_base: 0,
            barrier_id: NO_BARRIER,
            link: None,
            entry: 0,
            arg: 0,
        }
    }
}

/// Table mapping process ids to descriptors
pub struct ProcTable {
    slots: Vec<Option<Box<ProcDesc>>>,
    /// Where the next id search starts (cyclic)
    next: usize,
}

impl ProcTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROC);
        slots.resize_with(MAX_PROC, || None);
        ProcTable { slots, next: 0 }
    }

    /// Insert a descriptor, assigning it the next free id.
    ///
    /// Returns the id, or `None` if the table is full (the descriptor is
    /// handed back to the caller through the `Err` in that case).
    pub fn insert(&mut self, mut desc: Box<ProcDesc>) -> Result<Pid, Box<ProcDesc>> {
        let start = self.next;
        let mut scan = start;
        loop {
            if self.slots[scan].is_none() {
                let id = Pid(scan as u16);
                desc.id = id;
                self.slots[scan] = Some(desc);
                self.next = (scan + 1) % MAX_PROC;
                return Ok(id);
            }
            scan = (scan + 1) % MAX_PROC;
            if scan == start {
                return Err(desc);
            }
        }
    }

    /// Remove a descriptor, freeing its id.
    ///
    /// Panics if the id is out of range or not allocated: the caller is
    /// kernel code and an invalid release is a kernel bug.
    pub fn remove(&mut self, id: Pid) -> Box<ProcDesc> {
        if id.0 > MAX_PROC_ID {
            panic!("id {} out of range (max {})", id.0, MAX_PROC_ID);
        }
        match self.slots[id.0 as usize].take() {
            Some(desc) => desc,
            None => panic!("release of unallocated id {}", id.0),
        }
    }

    pub fn get(&self, id: Pid) -> Option<&ProcDesc> {
        self.slots.get(id.0 as usize)?.as_deref()
    }

    pub fn get_mut(&mut self, id: Pid) -> Option<&mut ProcDesc> {
        self.slots.get_mut(id.0 as usize)?.as_deref_mut()
    }

    /// Descriptor lookup that treats a dangling id as a fatal error, for
    /// paths that hold an id the kernel itself produced.
    pub fn desc(&self, id: Pid) -> &ProcDesc {
        match self.get(id) {
            Some(d) => d,
            None => panic!("no descriptor for id {}", id.0),
        }
    }

    pub fn desc_mut(&mut self, id: Pid) -> &mut ProcDesc {
        match self.get_mut(id) {
            Some(d) => d,
            None => panic!("no descriptor for id {}", id.0),
        }
    }

    /// Stable address of a descriptor, for the save/restore trampolines.
    pub fn desc_ptr(&mut self, id: Pid) -> *mut ProcDesc {
        let b: &mut Box<ProcDesc> = self.slots[id.0 as usize]
            .as_mut()
            .expect("descriptor pointer of unallocated id");
        &mut **b as *mut ProcDesc
    }

    /// Iterate over all live descriptors (for the panic dump).
    pub fn iter(&self) -> impl Iterator<Item = &ProcDesc> {
        self.slots.iter().filter_map(|s| s.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_reused_as_late_as_possible() {
        let mut t = ProcTable::new();
        let a = t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
        let b = t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
        assert_eq!(a, Pid(0));
        assert_eq!(b, Pid(1));

        // Freeing id 0 must not make it the next candidate: the scan
        // resumes after the last id handed out.
        t.remove(a);
        let c = t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
        assert_eq!(c, Pid(2));

        // Only after wrapping around does id 0 come back.
        for i in 3..MAX_PROC {
            let id = t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
            assert_eq!(id, Pid(i as u16));
        }
        let wrapped = t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
        assert_eq!(wrapped, Pid(0));
    }

    #[test]
    fn full_table_rejects_insert() {
        let mut t = ProcTable::new();
        for _ in 0..MAX_PROC {
            t.insert(Box::new(ProcDesc::new(1, Level::System))).unwrap();
        }
        assert!(t.insert(Box::new(ProcDesc::new(1, Level::System))).is_err());
    }

    #[test]
    #[should_panic]
    fn double_release_is_fatal() {
        let mut t = ProcTable::new();
        let id = t.insert(Box::new(ProcDesc::new(1, Level::User))).unwrap();
        t.remove(id);
        t.remove(id);
    }
}
