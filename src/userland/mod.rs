/*
 * Built-In Exercise Programs
 *
 * When the boot loader hands over no user module, the system init
 * process activates this suite instead. The programs run as real
 * processes and talk to the kernel exclusively through the invocation
 * wrappers, so they exercise the primitive gates end to end: the timed
 * barrier in every scenario it has (rendezvous, reuse, timeout,
 * straggler, recovery), plus the creation/destruction resource balance.
 *
 * Results go to the log: one "TEST n OK" / "TEST n FAIL" line each.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use crate::syscall::invoke::{
    activate_p, barrier, barrier_create, delay, do_log, getiomeminfo, getmeminfo, sem_ini,
    sem_signal, sem_wait, terminate_p,
};

/// Shared state of the test in progress
static BARRIER_ID: AtomicU32 = AtomicU32::new(0);
static DONE_SEM: AtomicU32 = AtomicU32::new(0);
static FAILURES: AtomicU32 = AtomicU32::new(0);

const LOG_ERR: u32 = 3;
const SYSTEM: u64 = 0;

fn fail(msg: &str) {
    FAILURES.fetch_add(1, Ordering::SeqCst);
    do_log(LOG_ERR, msg);
}

fn check(ok: bool, expected: bool, ctx: &str) {
    if ok != expected {
        fail(ctx);
    }
}

fn done() -> ! {
    sem_signal(DONE_SEM.load(Ordering::SeqCst));
    terminate_p();
}

/// Join after `arg` ticks, expecting the rendezvous to succeed.
extern "C" fn join_expect_true(arg: u64) {
    delay(arg as u32);
    let ok = barrier(BARRIER_ID.load(Ordering::SeqCst));
    check(ok, true, "barrier returned false, expected true");
    done();
}

/// Join after `arg` ticks, expecting a timeout verdict.
extern "C" fn join_expect_false(arg: u64) {
    delay(arg as u32);
    let ok = barrier(BARRIER_ID.load(Ordering::SeqCst));
    check(ok, false, "barrier returned true, expected false");
    done();
}

/// Join twice back to back, expecting success both times.
extern "C" fn join_twice(_arg: u64) {
    let id = BARRIER_ID.load(Ordering::SeqCst);
    check(barrier(id), true, "first round failed");
    check(barrier(id), true, "second round failed");
    done();
}

/// A barrier id nobody created: the call must abort this process, so
/// reaching the next line is the failure.
extern "C" fn join_invalid(_arg: u64) {
    barrier(1000);
    fail("entering a nonexistent barrier did not abort");
    done();
}

/// Timeout at round one, success at round two (the recovery path).
extern "C" fn join_false_then_true(_arg: u64) {
    let id = BARRIER_ID.load(Ordering::SeqCst);
    check(barrier(id), false, "expected the first round to time out");
    delay(10);
    check(barrier(id), true, "expected the retry round to succeed");
    done();
}

/// Late straggler of the recovery test: sees the bad state (immediate
/// false), then joins the healthy retry round.
extern "C" fn join_heal_then_true(arg: u64) {
    delay(arg as u32);
    let id = BARRIER_ID.load(Ordering::SeqCst);
    check(barrier(id), false, "expected an immediate false on a bad barrier");
    check(barrier(id), true, "expected the retry round to succeed");
    done();
}

extern "C" fn noop_body(_arg: u64) {
    terminate_p();
}

struct Spawn {
    body: extern "C" fn(u64),
    arg: u64,
}

/// Run one test: create the barrier, start the processes, collect the
/// completions, report.
fn run_test(n: u32, nproc: u32, timeout: u32, procs: &[Spawn]) {
    let before = FAILURES.load(Ordering::SeqCst);
    if nproc > 0 {
        let id = barrier_create(nproc, timeout);
        BARRIER_ID.store(id, Ordering::SeqCst);
    }
    let mut running = 0;
    for (i, p) in procs.iter().enumerate() {
        if activate_p(p.body, p.arg, 40 - i as u32, SYSTEM) == crate::sched::NO_PROC {
            fail("activation failed");
        } else {
            running += 1;
        }
    }
    for _ in 0..running {
        sem_wait(DONE_SEM.load(Ordering::SeqCst));
    }
    if FAILURES.load(Ordering::SeqCst) == before {
        log::info!("TEST {:02} OK", n);
    } else {
        log::warn!("TEST {:02} FAIL", n);
    }
}

/// Creation then termination must leave the heap, the frame list and
/// the IO heap exactly where they were.
fn run_balance_test(n: u32) {
    let before = FAILURES.load(Ordering::SeqCst);

    let m1 = getmeminfo();
    let io1 = getiomeminfo();
    if activate_p(noop_body, 0, 40, SYSTEM) == crate::sched::NO_PROC {
        fail("activation failed");
    }
    delay(4); // let it run and die, stack teardown included
    let m2 = getmeminfo();
    let io2 = getiomeminfo();

    if m1.free_frames != m2.free_frames {
        fail("frame count changed across create/terminate");
    }
    if m1.free_heap != m2.free_heap {
        fail("heap free bytes changed across create/terminate");
    }
    if io1 != io2 {
        fail("IO heap changed across create/terminate");
    }

    if FAILURES.load(Ordering::SeqCst) == before {
        log::info!("TEST {:02} OK", n);
    } else {
        log::warn!("TEST {:02} FAIL", n);
    }
}

/// Entry point of the built-in suite (activated by the system init
/// process when there is no user module to run).
pub extern "C" fn main_user(_arg: u64) {
    DONE_SEM.store(sem_ini(0), Ordering::SeqCst);
    log::info!("built-in exercise suite starting");

    // 00: invalid id aborts the caller (no completion to wait for).
    activate_p(join_invalid, 0, 40, SYSTEM);
    delay(5);
    log::info!("TEST 00 done (see the abort warning above)");

    // 01: plain rendezvous, no timeout.
    run_test(
        1,
        2,
        100,
        &[
            Spawn { body: join_expect_true, arg: 0 },
            Spawn { body: join_expect_true, arg: 0 },
        ],
    );

    // 02: immediate reuse of the same barrier.
    run_test(
        2,
        2,
        100,
        &[
            Spawn { body: join_twice, arg: 0 },
            Spawn { body: join_twice, arg: 0 },
        ],
    );

    // 03: a lone arrival times out.
    run_test(3, 2, 5, &[Spawn { body: join_expect_false, arg: 0 }]);

    // 04: the timeout wakes every waiter with a false verdict.
    run_test(
        4,
        3,
        5,
        &[
            Spawn { body: join_expect_false, arg: 0 },
            Spawn { body: join_expect_false, arg: 0 },
        ],
    );

    // 05: staggered arrivals still meet inside the window.
    run_test(
        5,
        2,
        8,
        &[
            Spawn { body: join_expect_true, arg: 0 },
            Spawn { body: join_expect_true, arg: 4 },
        ],
    );

    // 06: a straggler after the timeout sees the bad state and heals it.
    run_test(
        6,
        3,
        8,
        &[
            Spawn { body: join_expect_false, arg: 0 },
            Spawn { body: join_expect_false, arg: 4 },
            Spawn { body: join_expect_false, arg: 12 },
        ],
    );

    // 07: full recovery — timeout, heal, then a successful round.
    run_test(
        7,
        2,
        4,
        &[
            Spawn { body: join_false_then_true, arg: 0 },
            Spawn { body: join_heal_then_true, arg: 12 },
        ],
    );

    // 08: resource balance across creation and destruction.
    run_balance_test(8);

    let failures = FAILURES.load(Ordering::SeqCst);
    if failures == 0 {
        log::info!("exercise suite complete: all tests passed");
    } else {
        log::warn!("exercise suite complete: {} failure(s)", failures);
    }
    terminate_p();
}
