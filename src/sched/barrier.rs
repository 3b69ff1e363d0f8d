/*
 * Timed Barrier Descriptors
 *
 * A barrier synchronizes `nproc` processes with a timeout anchored on the
 * first arriver: only that process owns a delay-list node, so a
 * successful rendezvous cancels the timeout by removing a single node.
 *
 * Descriptor slots are handed out sequentially and never reclaimed, like
 * the semaphore pools, so validity is "index < slots allocated".
 *
 * The entry/timeout logic itself lives with the rest of the kernel state
 * machine (see the barrier methods of `Core`), because it moves processes
 * between this descriptor's queue, the ready queue and the delta list.
 */

use heapless::Vec;

use super::proc::Pid;
use super::queue::ProcList;
use crate::config::MAX_BARRIERS;

/// Barrier descriptor
pub struct BarrierDesc {
    /// Number of processes that must meet
    pub nproc: u32,
    /// Arrivals since the barrier last closed
    pub arrived: u32,
    /// Timeout registered when the first process arrives (in ticks)
    pub timeout: u32,
    /// Whether the timeout fired and not all stragglers have reported yet
    pub bad: bool,
    /// First process arrived since the last closing (the timeout anchor)
    pub first: Option<Pid>,
    /// Queue of processes waiting for the barrier to open
    pub waiting: ProcList,
}

/// The barrier table
pub struct BarrierTable {
    slots: Vec<BarrierDesc, MAX_BARRIERS>,
}

impl BarrierTable {
    pub const fn new() -> Self {
        BarrierTable { slots: Vec::new() }
    }

    /// Reserve the next descriptor slot. Returns its id, or `None` when
    /// the table is exhausted.
    pub fn alloc(&mut self, nproc: u32, timeout: u32) -> Option<u32> {
        let id = self.slots.len() as u32;
        self.slots
            .push(BarrierDesc {
                nproc,
                arrived: 0,
                timeout,
                bad: false,
                first: None,
                waiting: ProcList::new(),
            })
            .ok()?;
        Some(id)
    }

    pub fn valid(&self, id: u32) -> bool {
        (id as usize) < self.slots.len()
    }

    pub fn desc_mut(&mut self, id: u32) -> &mut BarrierDesc {
        &mut self.slots[id as usize]
    }

    pub fn desc(&self, id: u32) -> &BarrierDesc {
        &self.slots[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_sequential() {
        let mut t = BarrierTable::new();
        assert_eq!(t.alloc(2, 10), Some(0));
        assert_eq!(t.alloc(3, 5), Some(1));
        assert!(t.valid(0) && t.valid(1));
        assert!(!t.valid(2));
    }

    #[test]
    fn table_exhaustion_is_reported() {
        let mut t = BarrierTable::new();
        for _ in 0..MAX_BARRIERS {
            assert!(t.alloc(2, 1).is_some());
        }
        assert_eq!(t.alloc(2, 1), None);
    }
}
