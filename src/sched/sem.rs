/*
 * Counting Semaphores
 *
 * Semaphores live in two fixed pools, one per privilege level. They are
 * allocated sequentially and never deallocated, so an index is valid
 * exactly when it is lower than the number of semaphores handed out in
 * the pool the caller is allowed to see. Indices in [0, MAX_SEM) name the
 * user pool; indices in [MAX_SEM, 2*MAX_SEM) name the system pool, which
 * user-level callers cannot observe.
 *
 * Counter semantics: a non-negative counter is the number of tokens and
 * the blocked queue is empty; a negative counter's absolute value is the
 * number of processes in the blocked queue.
 */

use heapless::Vec;

use super::proc::{Level, NO_PROC};
use super::queue::ProcList;
use crate::config::MAX_SEM;

/// Semaphore descriptor
pub struct SemDesc {
    pub counter: i32,
    /// Queue of processes blocked on the semaphore
    pub queue: ProcList,
}

/// The two semaphore pools
pub struct SemPool {
    user: Vec<SemDesc, MAX_SEM>,
    system: Vec<SemDesc, MAX_SEM>,
}

impl SemPool {
    pub const fn new() -> Self {
        SemPool {
            user: Vec::new(),
            system: Vec::new(),
        }
    }

    /// Allocate the next semaphore in the pool matching the caller's
    /// privilege level. Returns its index, or `NO_PROC` when the pool is
    /// exhausted.
    pub fn alloc(&mut self, caller: Level, value: i32) -> u32 {
        let desc = SemDesc {
            counter: value,
            queue: ProcList::new(),
        };
        match caller {
            Level::User => match self.user.push(desc) {
                Ok(()) => (self.user.len() - 1) as u32,
                Err(_) => NO_PROC,
            },
            Level::System => match self.system.push(desc) {
                Ok(()) => (self.system.len() - 1 + MAX_SEM) as u32,
                Err(_) => NO_PROC,
            },
        }
    }

    /// An index is valid when it names an allocated semaphore visible at
    /// the caller's privilege level.
    pub fn valid(&self, sem: u32, caller: Level) -> bool {
        (sem as usize) < self.user.len()
            || (caller == Level::System
                && (sem as usize).wrapping_sub(MAX_SEM) < self.system.len())
    }

    /// Descriptor lookup; the index must have passed `valid`.
    pub fn desc_mut(&mut self, sem: u32) -> &mut SemDesc {
        let i = sem as usize;
        if i < MAX_SEM {
            &mut self.user[i]
        } else {
            &mut self.system[i - MAX_SEM]
        }
    }

    pub fn desc(&self, sem: u32) -> &SemDesc {
        let i = sem as usize;
        if i < MAX_SEM {
            &self.user[i]
        } else {
            &self.system[i - MAX_SEM]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_sequential_and_disjoint() {
        let mut p = SemPool::new();
        assert_eq!(p.alloc(Level::User, 1), 0);
        assert_eq!(p.alloc(Level::User, 0), 1);
        assert_eq!(p.alloc(Level::System, 1), MAX_SEM as u32);
        assert_eq!(p.alloc(Level::System, 0), MAX_SEM as u32 + 1);
    }

    #[test]
    fn user_callers_cannot_see_the_system_pool() {
        let mut p = SemPool::new();
        let s = p.alloc(Level::System, 0);
        assert!(p.valid(s, Level::System));
        assert!(!p.valid(s, Level::User));
        // Unallocated indices are invalid for everyone.
        assert!(!p.valid(0, Level::User));
        assert!(!p.valid(0, Level::System));
    }
}
