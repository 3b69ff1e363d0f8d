/*
 * Primitive Gate Stubs
 *
 * One saving trampoline per primitive gate, generated from the shared
 * macro: save the caller's registers, run the handler (argument
 * registers still untouched), leave through the dispatcher.
 */

use crate::arch::x86_64::entry::prim_stub;

prim_stub!(g_activate_p, crate::syscall::handlers::h_activate_p);
prim_stub!(g_terminate_p, crate::syscall::handlers::h_terminate_p);
prim_stub!(g_sem_ini, crate::syscall::handlers::h_sem_ini);
prim_stub!(g_sem_wait, crate::syscall::handlers::h_sem_wait);
prim_stub!(g_sem_signal, crate::syscall::handlers::h_sem_signal);
prim_stub!(g_delay, crate::syscall::handlers::h_delay);
prim_stub!(g_do_log, crate::syscall::handlers::h_do_log);
prim_stub!(g_getmeminfo, crate::syscall::handlers::h_getmeminfo);
prim_stub!(g_barrier_create, crate::syscall::handlers::h_barrier_create);
prim_stub!(g_barrier, crate::syscall::handlers::h_barrier);
prim_stub!(g_activate_pe, crate::syscall::handlers::h_activate_pe);
prim_stub!(g_wfi, crate::syscall::handlers::h_wfi);
prim_stub!(g_fill_gate, crate::syscall::handlers::h_fill_gate);
prim_stub!(g_abort_p, crate::syscall::handlers::h_abort_p);
prim_stub!(g_io_panic, crate::syscall::handlers::h_io_panic);
prim_stub!(g_translate, crate::syscall::handlers::h_translate);
prim_stub!(g_access, crate::syscall::handlers::h_access);
