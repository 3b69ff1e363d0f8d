/*
 * Priority-Ordered Process Queues
 *
 * A `ProcList` is the head of a singly linked list of process ids, linked
 * through the `link` field of the descriptors and kept ordered by
 * decreasing priority. Insertion walks with two cursors to the first
 * position whose priority is strictly lower than the incoming element's,
 * so equal-priority elements sort after the ones already in the queue
 * (FIFO within a priority).
 *
 * The ready queue, each semaphore's blocked queue and each barrier's
 * waiting queue are all `ProcList`s; a descriptor is in at most one of
 * them at any instant.
 */

use super::proc::{Pid, ProcTable};

/// Head of a priority-ordered queue of processes
#[derive(Clone, Copy)]
pub struct ProcList {
    pub head: Option<Pid>,
}

impl ProcList {
    pub const fn new() -> Self {
        ProcList { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Ordered insertion. Ties favor the processes already in the queue.
    pub fn insert(&mut self, table: &mut ProcTable, elem: Pid) {
        debug_assert!(table.desc(elem).link.is_none());
        let prio = table.desc(elem).priority;

        let mut prev: Option<Pid> = None;
        let mut cur = self.head;
        while let Some(p) = cur {
            if table.desc(p).priority < prio {
                break;
            }
            prev = Some(p);
            cur = table.desc(p).link;
        }

        table.desc_mut(elem).link = cur;
        match prev {
            Some(p) => table.desc_mut(p).link = Some(elem),
            None => self.head = Some(elem),
        }
    }

    /// Extract the highest-priority process (the head).
    pub fn remove_head(&mut self, table: &mut ProcTable) -> Option<Pid> {
        let head = self.head?;
        self.head = table.desc(head).link;
        table.desc_mut(head).link = None;
        Some(head)
    }

    /// Whether `elem` currently sits in this queue (diagnostics/tests).
    pub fn contains(&self, table: &ProcTable, elem: Pid) -> bool {
        let mut cur = self.head;
        while let Some(p) = cur {
            if p == elem {
                return true;
            }
            cur = table.desc(p).link;
        }
        false
    }

    /// Number of queued processes (diagnostics/tests).
    pub fn len(&self, table: &ProcTable) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while let Some(p) = cur {
            n += 1;
            cur = table.desc(p).link;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::proc::{Level, ProcDesc};
    use alloc::boxed::Box;

    fn proc_with_prio(table: &mut ProcTable, prio: u32) -> Pid {
        table
            .insert(Box::new(ProcDesc::new(prio, Level::System)))
            .unwrap()
    }

    #[test]
    fn head_is_highest_priority() {
        let mut t = ProcTable::new();
        let mut q = ProcList::new();
        let low = proc_with_prio(&mut t, 3);
        let high = proc_with_prio(&mut t, 7);
        let mid = proc_with_prio(&mut t, 5);
        q.insert(&mut t, low);
        q.insert(&mut t, high);
        q.insert(&mut t, mid);

        assert_eq!(q.remove_head(&mut t), Some(high));
        assert_eq!(q.remove_head(&mut t), Some(mid));
        assert_eq!(q.remove_head(&mut t), Some(low));
        assert_eq!(q.remove_head(&mut t), None);
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let mut t = ProcTable::new();
        let mut q = ProcList::new();
        let a = proc_with_prio(&mut t, 5);
        let b = proc_with_prio(&mut t, 5);
        let c = proc_with_prio(&mut t, 5);
        q.insert(&mut t, a);
        q.insert(&mut t, b);
        q.insert(&mut t, c);

        assert_eq!(q.remove_head(&mut t), Some(a));
        assert_eq!(q.remove_head(&mut t), Some(b));
        assert_eq!(q.remove_head(&mut t), Some(c));
    }

    #[test]
    fn removal_clears_the_link() {
        let mut t = ProcTable::new();
        let mut q = ProcList::new();
        let a = proc_with_prio(&mut t, 5);
        let b = proc_with_prio(&mut t, 4);
        q.insert(&mut t, a);
        q.insert(&mut t, b);
        let got = q.remove_head(&mut t).unwrap();
        assert_eq!(got, a);
        assert!(t.desc(a).link.is_none());
        assert!(!q.contains(&t, a));
        assert!(q.contains(&t, b));
    }
}
