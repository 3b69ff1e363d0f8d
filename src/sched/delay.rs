/*
 * Timer Delta List
 *
 * Pending delays are kept in a singly linked list ordered by absolute
 * wake-up time, with each node storing its delay relative to the previous
 * node. Aging the whole list therefore costs one decrement of the head,
 * which keeps the per-tick driver bounded.
 *
 * Removal of a node in the middle (used when a barrier rendezvous cancels
 * its timeout) gives the node's residual delta back to its successor, so
 * the absolute wake-up times of everything behind it are preserved.
 */

use alloc::boxed::Box;

use super::proc::Pid;

/// One pending delay request
struct Node {
    /// Additional wait relative to the previous node
    delta: u32,
    /// Process that issued the request
    owner: Pid,
    next: Option<Box<Node>>,
}

/// The list of suspended processes, delta-encoded
pub struct DelayList {
    head: Option<Box<Node>>,
}

impl DelayList {
    pub const fn new() -> Self {
        DelayList { head: None }
    }

    /// Insert a request of `ticks` ticks for `owner`, preserving the
    /// delta encoding: the new node stores the residue of `ticks` after
    /// the predecessors, and the follower's delta shrinks by that residue.
    pub fn insert(&mut self, mut ticks: u32, owner: Pid) {
        let mut cur = &mut self.head;
        while cur.as_ref().is_some_and(|n| ticks > n.delta) {
            let n = cur.as_mut().unwrap();
            ticks -= n.delta;
            cur = &mut n.next;
        }
        let mut node = Box::new(Node {
            delta: ticks,
            owner,
            next: cur.take(),
        });
        if let Some(follower) = node.next.as_mut() {
            follower.delta -= ticks;
        }
        *cur = Some(node);
    }

    /// Remove the request owned by `owner`, if any, giving its residual
    /// delta back to the follower.
    pub fn remove(&mut self, owner: Pid) {
        let mut cur = &mut self.head;
        while cur.as_ref().is_some_and(|n| n.owner != owner) {
            cur = &mut cur.as_mut().unwrap().next;
        }
        if let Some(node) = cur.take() {
            let Node { delta, mut next, .. } = *node;
            if let Some(follower) = next.as_mut() {
                follower.delta += delta;
            }
            *cur = next;
        }
    }

    /// Age the list by one tick (decrement the head's delta).
    pub fn age(&mut self) {
        if let Some(head) = self.head.as_mut() {
            head.delta -= 1;
        }
    }

    /// Pop the head if its delay has expired.
    pub fn pop_expired(&mut self) -> Option<Pid> {
        if self.head.as_ref()?.delta != 0 {
            return None;
        }
        let node = self.head.take().unwrap();
        self.head = node.next;
        Some(node.owner)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Residual ticks before `owner` wakes, if it has a pending request
    /// (diagnostics/tests).
    pub fn remaining(&self, owner: Pid) -> Option<u32> {
        let mut total = 0;
        let mut cur = self.head.as_deref();
        while let Some(node) = cur {
            total += node.delta;
            if node.owner == owner {
                return Some(total);
            }
            cur = node.next.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_encode_absolute_times() {
        let mut l = DelayList::new();
        l.insert(10, Pid(1));
        l.insert(4, Pid(2));
        l.insert(7, Pid(3));

        assert_eq!(l.remaining(Pid(2)), Some(4));
        assert_eq!(l.remaining(Pid(3)), Some(7));
        assert_eq!(l.remaining(Pid(1)), Some(10));
    }

    #[test]
    fn ticking_wakes_in_deadline_order() {
        let mut l = DelayList::new();
        l.insert(2, Pid(1));
        l.insert(2, Pid(2));
        l.insert(1, Pid(3));

        let mut woken = alloc::vec::Vec::new();
        for _ in 0..2 {
            l.age();
            while let Some(p) = l.pop_expired() {
                woken.push(p);
            }
        }
        // Pid(3) first. The insertion walk only passes strictly earlier
        // deadlines, so of two requests with the same deadline the more
        // recent one sits earlier in the list and wakes first.
        assert_eq!(woken, [Pid(3), Pid(2), Pid(1)]);
        assert!(l.is_empty());
    }

    #[test]
    fn removal_gives_delta_back_to_follower() {
        let mut l = DelayList::new();
        l.insert(3, Pid(1));
        l.insert(8, Pid(2));
        l.remove(Pid(1));

        // Pid(2)'s absolute deadline is unchanged.
        assert_eq!(l.remaining(Pid(2)), Some(8));
        for _ in 0..7 {
            l.age();
            assert_eq!(l.pop_expired(), None);
        }
        l.age();
        assert_eq!(l.pop_expired(), Some(Pid(2)));
    }

    #[test]
    fn removing_an_absent_owner_is_a_no_op() {
        let mut l = DelayList::new();
        l.insert(5, Pid(1));
        l.remove(Pid(9));
        assert_eq!(l.remaining(Pid(1)), Some(5));
    }
}
