/*
 * Kernel Core State Machine
 *
 * This module owns every piece of state the kernel primitives touch: the
 * process table, the ready queue, the semaphore pools, the timer delta
 * list, the barrier table and the IRQ binding slots. It is all gathered
 * in one `Core` value so the primitives are ordinary methods and the
 * whole state machine can be driven tick by tick in unit tests, with no
 * hardware underneath.
 *
 * Concurrency model: single CPU, external interrupts masked for the whole
 * duration of any primitive (all primitive gates are interrupt gates), so
 * the `Core` needs no internal locking. The global instance still sits
 * behind a spin mutex as a belt: the lock is only ever taken with
 * interrupts off.
 *
 * The scheduler itself only moves the `current` handle; the register
 * restore and the address-space reload happen on the way out of the
 * kernel (see `arch::entry`). A consequence worth knowing: calling
 * `schedule` more than once inside one kernel entry is harmless, only the
 * last choice takes effect.
 */

pub mod access;
pub mod barrier;
pub mod delay;
pub mod dump;
pub mod ext;
pub mod lifecycle;
pub mod proc;
pub mod queue;
pub mod sem;

use spin::Mutex;

pub use proc::{ctx, Level, Pid, ProcDesc, ProcTable, NO_BARRIER, NO_PROC};

use barrier::BarrierTable;
use delay::DelayList;
use ext::ExtSlot;
use queue::ProcList;
use sem::SemPool;

use crate::config::{MAX_IRQ, MAX_PRIORITY};

/// A caller fault: the offending process gets aborted by the gate glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    BadSemaphore(u32),
    BadBarrier(u32),
    BadBarrierParams,
    BadPriority(u32),
    BadLevel(u64),
    /// A user-level caller asked for something only system level may do
    Protection,
    BadBuffer,
    BadLogSeverity(u32),
}

/// The kernel core state
pub struct Core {
    pub procs: ProcTable,
    /// The one global ready queue (empty only while dummy runs)
    pub ready: ProcList,
    /// The process the processor is assigned to
    pub current: Pid,
    /// Process that was running when the kernel was entered; its kernel
    /// stack is the one we are standing on
    pub prev_running: Pid,
    /// Root table of the last process that destroyed itself, still owning
    /// the kernel stack in use; consumed after the next stack switch
    pub pending_teardown: Option<u64>,
    /// Number of live processes created through the activation primitive
    pub live_count: u32,
    pub sems: SemPool,
    pub delays: DelayList,
    pub barriers: BarrierTable,
    /// Per-IRQ binding: a driver, an external process, or free
    pub ext: [ExtSlot; MAX_IRQ],
}

/// The global kernel core. `None` until `init` installs the bootstrap
/// process.
pub static CORE: Mutex<Option<Core>> = Mutex::new(None);

/// Run a closure on the global core. Must only be reached with external
/// interrupts masked (primitive gates guarantee this).
pub fn with_core<R>(f: impl FnOnce(&mut Core) -> R) -> R {
    let mut guard = CORE.lock();
    f(guard.as_mut().expect("kernel core not initialized"))
}

/// Install the global core around the bootstrap process (the flow of
/// control doing the initialization).
pub fn init(bootstrap: alloc::boxed::Box<ProcDesc>) {
    *CORE.lock() = Some(Core::new(bootstrap));
}

impl Core {
    /// Build the core around the bootstrap process, which represents the
    /// flow of control that is initializing the kernel.
    pub fn new(mut bootstrap: alloc::boxed::Box<ProcDesc>) -> Core {
        let mut procs = ProcTable::new();
        bootstrap.priority = MAX_PRIORITY;
        let boot_id = procs
            .insert(bootstrap)
            .unwrap_or_else(|_| panic!("empty process table rejected the bootstrap"));
        Core {
            procs,
            ready: ProcList::new(),
            current: boot_id,
            prev_running: boot_id,
            pending_teardown: None,
            live_count: 0,
            sems: SemPool::new(),
            delays: DelayList::new(),
            barriers: BarrierTable::new(),
            ext: [ExtSlot::Free; MAX_IRQ],
        }
    }

    /// Record who owns the kernel stack we just switched onto. Called
    /// once per kernel entry, before any primitive logic.
    pub fn note_entry(&mut self) {
        self.prev_running = self.current;
    }

    /// Privilege level of the process that invoked the running primitive.
    ///
    /// The saved stack pointer of `current` addresses the interrupt
    /// frame; the second word is the code-segment selector in use before
    /// the gate fired. Outside the target this is approximated by the
    /// descriptor's own level (the distinction matters only for system
    /// processes executing user-module code, which the host tests do not
    /// model).
    pub fn caller_level(&self) -> Level {
        #[cfg(not(test))]
        {
            let rsp = self.procs.desc(self.current).context[ctx::RSP];
            let root = self.procs.desc(self.current).root_tab;
            if let Some(cs) = crate::mem::paging::read_word(root, rsp + 8) {
                return if cs == crate::arch::gdt::SEL_SYS_CODE {
                    Level::System
                } else {
                    Level::User
                };
            }
            Level::User
        }
        #[cfg(test)]
        {
            self.procs.desc(self.current).level
        }
    }

    /// Store a primitive's return value for `pid` (delivered in RAX when
    /// the process next leaves the kernel).
    pub fn set_retval(&mut self, pid: Pid, value: u64) {
        self.procs.desc_mut(pid).context[ctx::RAX] = value;
    }

    /// Insert `current` into the ready queue (it keeps running until the
    /// next `schedule`).
    pub fn ready_current(&mut self) {
        let cur = self.current;
        let Core { ready, procs, .. } = self;
        ready.insert(procs, cur);
    }

    /// Choose the next process to run. Only `current` changes here; the
    /// processor is really handed over at the next kernel exit.
    pub fn schedule(&mut self) {
        let Core { ready, procs, .. } = self;
        self.current = ready
            .remove_head(procs)
            .expect("ready queue empty: the dummy process is gone");
    }

    // ------------------------------------------------------------------
    // Semaphores
    // ------------------------------------------------------------------

    pub fn sem_ini(&mut self, value: i32) -> u32 {
        let level = self.caller_level();
        self.sems.alloc(level, value)
    }

    pub fn sem_wait(&mut self, sem: u32) -> Result<(), Fault> {
        if !self.sems.valid(sem, self.caller_level()) {
            return Err(Fault::BadSemaphore(sem));
        }
        let cur = self.current;
        let Core { sems, procs, .. } = self;
        let s = sems.desc_mut(sem);
        s.counter -= 1;
        if s.counter < 0 {
            s.queue.insert(procs, cur);
            self.schedule();
        }
        Ok(())
    }

    pub fn sem_signal(&mut self, sem: u32) -> Result<(), Fault> {
        if !self.sems.valid(sem, self.caller_level()) {
            return Err(Fault::BadSemaphore(sem));
        }
        let Core { sems, procs, ready, .. } = self;
        let s = sems.desc_mut(sem);
        s.counter += 1;
        if s.counter <= 0 {
            let woken = s
                .queue
                .remove_head(procs)
                .expect("negative semaphore with empty queue");
            // The wakee goes in front of the yielding caller within its
            // priority run, so a wakee of equal priority preempts and the
            // caller re-enters at the tail of the run.
            ready.insert(procs, woken);
            self.ready_current();
            self.schedule();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    /// The delay primitive. `delay(0)` is a no-op.
    pub fn delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let cur = self.current;
        self.delays.insert(ticks, cur);
        self.schedule();
    }

    /// The per-tick driver: age the delta list, wake every expired
    /// request in list order, reschedule. Runs in bounded time, which is
    /// why the timer is an in-kernel driver and not an external process.
    pub fn timer_tick(&mut self) {
        self.ready_current();
        self.delays.age();
        while let Some(owner) = self.delays.pop_expired() {
            self.check_barrier(owner);
            let Core { ready, procs, .. } = self;
            ready.insert(procs, owner);
        }
        self.schedule();
    }

    // ------------------------------------------------------------------
    // Timed barriers
    // ------------------------------------------------------------------

    pub fn barrier_create(&mut self, nproc: u32, timeout: u32) -> Result<u32, Fault> {
        if nproc == 0 || timeout == 0 {
            return Err(Fault::BadBarrierParams);
        }
        match self.barriers.alloc(nproc, timeout) {
            Some(id) => Ok(id),
            None => {
                log::warn!("too many barriers created");
                Ok(NO_PROC)
            }
        }
    }

    pub fn barrier_enter(&mut self, id: u32) -> Result<(), Fault> {
        if !self.barriers.valid(id) {
            return Err(Fault::BadBarrier(id));
        }
        let caller = self.current;
        let Core {
            barriers,
            procs,
            ready,
            delays,
            ..
        } = self;
        let b = barriers.desc_mut(id);

        b.arrived += 1;

        if b.bad {
            // A timed-out barrier rejects arrivals without blocking; once
            // the last straggler has reported in it is healthy again.
            procs.desc_mut(caller).context[ctx::RAX] = false as u64;
            if b.arrived == b.nproc {
                b.bad = false;
                b.arrived = 0;
            }
            return Ok(());
        }

        if b.first.is_none() {
            // Anchor arrival: this single delay-list node represents the
            // barrier's timeout, so cancelling it later is O(1).
            b.first = Some(caller);
            procs.desc_mut(caller).barrier_id = id;
            delays.insert(b.timeout, caller);
        }

        b.waiting.insert(procs, caller);

        if b.arrived == b.nproc {
            let first = b.first.take().expect("open barrier without an anchor");
            delays.remove(first);
            procs.desc_mut(first).barrier_id = NO_BARRIER;
            while let Some(w) = b.waiting.remove_head(procs) {
                procs.desc_mut(w).context[ctx::RAX] = true as u64;
                ready.insert(procs, w);
            }
            b.arrived = 0;
        }

        self.schedule();
        Ok(())
    }

    /// Timeout bookkeeping for a process whose delay expired. If it is
    /// the anchor of a barrier, the timeout has fired: every waiter
    /// returns false and the barrier turns bad unless a rendezvous raced
    /// with the tick.
    fn check_barrier(&mut self, p: Pid) {
        let id = self.procs.desc(p).barrier_id;
        if id == NO_BARRIER {
            return;
        }
        self.procs.desc_mut(p).barrier_id = NO_BARRIER;

        let Core {
            barriers,
            procs,
            ready,
            ..
        } = self;
        let b = barriers.desc_mut(id);

        while let Some(w) = b.waiting.remove_head(procs) {
            procs.desc_mut(w).context[ctx::RAX] = false as u64;
            // The timer driver readies `p` itself right after this call;
            // inserting it here would queue it twice.
            if w != p {
                ready.insert(procs, w);
            }
        }
        b.first = None;
        if b.arrived == b.nproc {
            // A rendezvous and the timeout landed on the same tick: the
            // waiters already got their verdict, just close the barrier.
            b.arrived = 0;
        } else {
            b.bad = true;
        }
    }

    // ------------------------------------------------------------------
    // External processes
    // ------------------------------------------------------------------

    /// Delivery of `irq`: re-ready the bound external process. Its
    /// priority is above every normal process, so the reschedule hands it
    /// the processor at once.
    pub fn irq_ready(&mut self, irq: usize) {
        if let ExtSlot::Bound(p) = self.ext[irq] {
            self.ready_current();
            let Core { ready, procs, .. } = self;
            ready.insert(procs, p);
            self.schedule();
        }
    }

    /// The wait-for-interrupt primitive: the caller stops being scheduled
    /// without entering any queue; only the arrival of its IRQ readies it
    /// again.
    pub fn wfi_block(&mut self) {
        self.schedule();
    }
}

/// Number of live activated processes; the dummy process polls this with
/// interrupts enabled, so it goes through the lock on its own.
pub fn live_process_count() -> u32 {
    crate::arch::interrupts::without_interrupts(|| with_core(|core| core.live_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PRIORITY;
    use alloc::boxed::Box;

    const TRUE: u64 = 1;
    const FALSE: u64 = 0;

    /// A core with a low-priority driver process as `current` (standing
    /// in for the flow that spawns the test processes and then keeps the
    /// machine busy) and the dummy process in ready.
    fn setup() -> (Core, Pid, Pid) {
        let mut core = Core::new(Box::new(ProcDesc::new(0, Level::System)));
        let main = core.current;
        core.procs.desc_mut(main).priority = MIN_PRIORITY;
        let dummy = core
            .procs
            .insert(Box::new(ProcDesc::new(0, Level::System)))
            .unwrap();
        let Core { ready, procs, .. } = &mut core;
        ready.insert(procs, dummy);
        (core, main, dummy)
    }

    fn spawn(core: &mut Core, prio: u32) -> Pid {
        let pid = core
            .procs
            .insert(Box::new(ProcDesc::new(prio, Level::System)))
            .unwrap();
        let Core { ready, procs, .. } = core;
        ready.insert(procs, pid);
        core.live_count += 1;
        pid
    }

    /// What a timer preemption does to the running process, without the
    /// delta-list side: park it at the tail of its run and redispatch.
    fn yield_current(core: &mut Core) {
        core.ready_current();
        core.schedule();
    }

    fn retval(core: &Core, p: Pid) -> u64 {
        core.procs.desc(p).context[ctx::RAX]
    }

    // ------------------------------------------------------------------
    // Semaphores
    // ------------------------------------------------------------------

    #[test]
    fn matched_waits_and_signals_restore_the_counter() {
        let (mut core, main, _) = setup();
        let s = core.sem_ini(2);
        // System-level caller: the index names the system pool.
        assert_eq!(s, crate::config::MAX_SEM as u32);

        core.sem_wait(s).unwrap();
        core.sem_wait(s).unwrap();
        assert_eq!(core.current, main, "no token shortage, no suspension");
        core.sem_signal(s).unwrap();
        core.sem_signal(s).unwrap();

        assert_eq!(core.sems.desc(s).counter, 2);
        assert!(core.sems.desc(s).queue.is_empty());
    }

    #[test]
    fn invalid_semaphore_is_a_caller_fault() {
        let (mut core, _, _) = setup();
        assert_eq!(core.sem_wait(7), Err(Fault::BadSemaphore(7)));
        assert_eq!(core.sem_signal(7), Err(Fault::BadSemaphore(7)));
    }

    #[test]
    fn wait_blocks_and_signal_wakes_in_priority_order() {
        let (mut core, main, _) = setup();
        let s = core.sem_ini(0);
        let lo = spawn(&mut core, 5);
        let hi = spawn(&mut core, 8);

        // hi runs first and blocks, then lo blocks too.
        yield_current(&mut core);
        assert_eq!(core.current, hi);
        core.sem_wait(s).unwrap();
        assert_eq!(core.current, lo);
        core.sem_wait(s).unwrap();
        assert_eq!(core.current, main);
        assert_eq!(core.sems.desc(s).counter, -2);
        assert_eq!(core.sems.desc(s).queue.len(&core.procs), 2);

        // Each signal wakes the highest-priority waiter and switches to
        // it at once (it outranks main).
        core.sem_signal(s).unwrap();
        assert_eq!(core.current, hi);
        core.sem_signal(s).unwrap(); // hi passes the token on
        assert_eq!(core.current, lo);
        assert!(core.sems.desc(s).queue.is_empty());
    }

    #[test]
    fn equal_priority_wakee_preempts_the_signaller() {
        let (mut core, _, _) = setup();
        let s = core.sem_ini(0);
        let a = spawn(&mut core, 5);
        let b = spawn(&mut core, 5);

        yield_current(&mut core);
        assert_eq!(core.current, a);
        core.sem_wait(s).unwrap();
        assert_eq!(core.current, b);

        // b signals: a (equal priority) takes the processor, b re-enters
        // its run at the tail.
        core.sem_signal(s).unwrap();
        assert_eq!(core.current, a);
        assert!(core.ready.contains(&core.procs, b));
    }

    #[test]
    fn blocked_totals_match_negative_counters() {
        let (mut core, _, _) = setup();
        let s0 = core.sem_ini(0);
        let s1 = core.sem_ini(1);
        let a = spawn(&mut core, 5);
        let b = spawn(&mut core, 5);
        let c = spawn(&mut core, 5);

        yield_current(&mut core);
        assert_eq!(core.current, a);
        core.sem_wait(s0).unwrap();
        assert_eq!(core.current, b);
        core.sem_wait(s0).unwrap();
        assert_eq!(core.current, c);
        core.sem_wait(s1).unwrap(); // takes the token, stays running
        core.sem_wait(s1).unwrap(); // blocks

        let queued: usize = [s0, s1]
            .iter()
            .map(|&s| core.sems.desc(s).queue.len(&core.procs))
            .sum();
        let negative: i32 = [s0, s1]
            .iter()
            .map(|&s| core.sems.desc(s).counter)
            .filter(|&c| c < 0)
            .map(|c| -c)
            .sum();
        assert_eq!(queued, negative as usize);
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    #[test]
    fn delay_zero_is_a_no_op() {
        let (mut core, main, _) = setup();
        core.delay(0);
        assert_eq!(core.current, main);
        assert!(core.delays.is_empty());
    }

    #[test]
    fn delay_suspends_until_the_deadline() {
        let (mut core, main, _) = setup();
        let p = spawn(&mut core, 5);
        yield_current(&mut core);
        assert_eq!(core.current, p);
        core.delay(3);
        assert_eq!(core.current, main);

        core.timer_tick();
        core.timer_tick();
        assert_eq!(core.current, main);
        core.timer_tick();
        assert_eq!(core.current, p, "woken exactly on the third tick");
        assert!(core.delays.is_empty());
    }

    #[test]
    fn same_tick_wakes_follow_delta_list_order() {
        // Two equal-priority processes with the same deadline: the ready
        // queue receives them in delta-list order (not in the order the
        // delays were requested), and the priority ordering of ready then
        // drives dispatch.
        let (mut core, _, _) = setup();
        let a = spawn(&mut core, 5);
        let b = spawn(&mut core, 5);

        yield_current(&mut core);
        assert_eq!(core.current, a);
        core.delay(2);
        assert_eq!(core.current, b);
        core.delay(2);

        core.timer_tick();
        core.timer_tick();
        // b's request sits first in the delta list (the insertion walk
        // only passes strictly earlier deadlines), so b is readied first
        // and dispatched first.
        assert_eq!(core.current, b);
        let Core { ready, procs, .. } = &mut core;
        let next = ready.remove_head(procs).unwrap();
        assert_eq!(next, a);
    }

    // ------------------------------------------------------------------
    // Timed barriers (scenario suite; `T n` marks tick n)
    // ------------------------------------------------------------------

    #[test]
    fn barrier_create_validates_parameters() {
        let (mut core, _, _) = setup();
        assert_eq!(core.barrier_create(0, 5), Err(Fault::BadBarrierParams));
        assert_eq!(core.barrier_create(2, 0), Err(Fault::BadBarrierParams));
        assert_eq!(core.barrier_enter(10), Err(Fault::BadBarrier(10)));
    }

    #[test]
    fn rendezvous_without_timeout() {
        // Scenario 1: two processes join {N=2, timeout=100} at T0.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let p1 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 100).unwrap();

        yield_current(&mut core);
        assert_eq!(core.current, p0);
        core.barrier_enter(id).unwrap();
        assert_eq!(core.current, p1);
        core.barrier_enter(id).unwrap();

        assert_eq!(retval(&core, p0), TRUE);
        assert_eq!(retval(&core, p1), TRUE);
        assert_eq!(core.delays.remaining(p0), None, "timeout cancelled");
        assert_eq!(core.barriers.desc(id).arrived, 0);
        assert!(core.barriers.desc(id).first.is_none());
        assert_eq!(core.procs.desc(p0).barrier_id, NO_BARRIER);
    }

    #[test]
    fn rendezvous_twice_back_to_back() {
        // Scenario 2: the same barrier reused immediately.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let p1 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 100).unwrap();

        for _round in 0..2 {
            yield_current(&mut core);
            let first = core.current;
            core.barrier_enter(id).unwrap();
            let second = core.current;
            core.barrier_enter(id).unwrap();
            assert_eq!(retval(&core, first), TRUE);
            assert_eq!(retval(&core, second), TRUE);
            // Both runnable again; drain back to the driver process.
            yield_current(&mut core);
            yield_current(&mut core);
            yield_current(&mut core);
        }
        let _ = (p0, p1);
        assert_eq!(core.barriers.desc(id).arrived, 0);
        assert!(core.delays.is_empty());
    }

    #[test]
    fn lone_arrival_times_out() {
        // Scenario 3: one process on {N=2, timeout=5}, nobody else comes.
        let (mut core, main, _) = setup();
        let p0 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 5).unwrap();

        yield_current(&mut core);
        assert_eq!(core.current, p0);
        core.barrier_enter(id).unwrap();
        assert_eq!(core.current, main);
        assert_eq!(core.delays.remaining(p0), Some(5));

        for _ in 0..4 {
            core.timer_tick();
            assert_eq!(core.current, main);
        }
        core.timer_tick(); // T5
        assert_eq!(core.current, p0);
        assert_eq!(retval(&core, p0), FALSE);
        assert!(core.barriers.desc(id).bad);
        assert!(core.barriers.desc(id).first.is_none());
        assert_eq!(core.procs.desc(p0).barrier_id, NO_BARRIER);
    }

    #[test]
    fn timeout_wakes_every_waiter_with_false() {
        // Scenario 4: {N=3, timeout=5}, two arrive at T0, the third never.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let p1 = spawn(&mut core, 5);
        let id = core.barrier_create(3, 5).unwrap();

        yield_current(&mut core);
        core.barrier_enter(id).unwrap(); // p0
        core.barrier_enter(id).unwrap(); // p1

        for _ in 0..5 {
            core.timer_tick();
        }
        assert_eq!(retval(&core, p0), FALSE);
        assert_eq!(retval(&core, p1), FALSE);
        assert!(core.barriers.desc(id).bad);
        // Only one delta-list node ever represented the barrier, and the
        // driver consumed it.
        assert!(core.delays.is_empty());
    }

    #[test]
    fn staggered_arrivals_meet_before_the_deadline() {
        // Scenario 5: {N=2, timeout=8}; P0 at T0, P1 at T4.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 8).unwrap();

        yield_current(&mut core);
        assert_eq!(core.current, p0);
        core.barrier_enter(id).unwrap();

        for _ in 0..4 {
            core.timer_tick();
        }
        let p1 = spawn(&mut core, 5);
        yield_current(&mut core);
        assert_eq!(core.current, p1);
        core.barrier_enter(id).unwrap(); // T4: rendezvous

        assert_eq!(retval(&core, p0), TRUE);
        assert_eq!(retval(&core, p1), TRUE);
        assert!(core.delays.is_empty(), "no node remains");
        assert_eq!(core.barriers.desc(id).arrived, 0);
    }

    #[test]
    fn late_straggler_sees_the_bad_state_and_heals_it() {
        // Scenario 6: {N=3, timeout=8}; P0 at T0, P1 at T4, P2 at T12.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let id = core.barrier_create(3, 8).unwrap();

        yield_current(&mut core);
        core.barrier_enter(id).unwrap(); // P0 at T0

        for _ in 0..4 {
            core.timer_tick();
        }
        let p1 = spawn(&mut core, 5);
        yield_current(&mut core);
        assert_eq!(core.current, p1);
        core.barrier_enter(id).unwrap(); // P1 at T4

        for _ in 0..4 {
            core.timer_tick(); // T8: timeout fires
        }
        assert_eq!(retval(&core, p0), FALSE);
        assert_eq!(retval(&core, p1), FALSE);
        assert!(core.barriers.desc(id).bad);

        for _ in 0..4 {
            core.timer_tick();
        }
        let p2 = spawn(&mut core, 5);
        yield_current(&mut core);
        while core.current != p2 {
            yield_current(&mut core);
        }
        core.barrier_enter(id).unwrap(); // P2 at T12
        assert_eq!(core.current, p2, "a bad barrier never blocks");
        assert_eq!(retval(&core, p2), FALSE);
        assert_eq!(core.barriers.desc(id).arrived, 0);
        assert!(!core.barriers.desc(id).bad);
    }

    #[test]
    fn barrier_is_reusable_after_a_timeout() {
        // Scenario 7: {N=2, timeout=4}; P0 times out at T4, P1 reports at
        // T12 (immediate false + reset), then both meet successfully.
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 4).unwrap();

        yield_current(&mut core);
        core.barrier_enter(id).unwrap(); // P0 at T0

        for _ in 0..4 {
            core.timer_tick(); // T4: timeout
        }
        assert_eq!(retval(&core, p0), FALSE);
        assert!(core.barriers.desc(id).bad);
        // P0 is runnable again; park it briefly (it must be back before
        // the second-round timeout can fire).
        while core.ready.contains(&core.procs, p0) || core.current == p0 {
            if core.current == p0 {
                core.delay(10);
            } else {
                yield_current(&mut core);
            }
        }

        for _ in 0..8 {
            core.timer_tick(); // up to T12
        }
        let p1 = spawn(&mut core, 5);
        yield_current(&mut core);
        while core.current != p1 {
            yield_current(&mut core);
        }
        core.barrier_enter(id).unwrap(); // P1 at T12
        assert_eq!(core.current, p1, "returned without blocking");
        assert_eq!(retval(&core, p1), FALSE);
        assert!(!core.barriers.desc(id).bad);
        assert_eq!(core.barriers.desc(id).arrived, 0);

        // Next round: both enter again and meet.
        core.barrier_enter(id).unwrap(); // p1 arrives first this time
        for _ in 0..88 {
            core.timer_tick(); // let p0's parking delay expire
            if core.current == p0 {
                break;
            }
        }
        assert_eq!(core.current, p0);
        core.barrier_enter(id).unwrap();
        assert_eq!(retval(&core, p0), TRUE);
        assert_eq!(retval(&core, p1), TRUE);
    }

    #[test]
    fn anchor_owns_exactly_one_delay_node() {
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let p1 = spawn(&mut core, 5);
        let id = core.barrier_create(3, 50).unwrap();

        yield_current(&mut core);
        core.barrier_enter(id).unwrap(); // p0: anchor
        core.barrier_enter(id).unwrap(); // p1: plain waiter

        assert_eq!(core.procs.desc(p0).barrier_id, id);
        assert_eq!(core.procs.desc(p1).barrier_id, NO_BARRIER);
        assert_eq!(core.delays.remaining(p0), Some(50));
        assert_eq!(core.delays.remaining(p1), None);
    }

    #[test]
    fn waiters_sit_in_exactly_one_queue() {
        let (mut core, _, _) = setup();
        let p0 = spawn(&mut core, 5);
        let id = core.barrier_create(2, 10).unwrap();

        yield_current(&mut core);
        core.barrier_enter(id).unwrap();
        assert!(core.barriers.desc(id).waiting.contains(&core.procs, p0));
        assert!(!core.ready.contains(&core.procs, p0));
    }
}
