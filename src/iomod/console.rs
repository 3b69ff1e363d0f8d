/*
 * Console (keyboard + video)
 *
 * The write side goes straight to the text screen under a mutex
 * semaphore. The read side is driven by the keyboard external process:
 * `readconsole` publishes the destination buffer, opens the keyboard
 * interrupt and sleeps on the synchronization semaphore; the external
 * process fills the buffer a character per interrupt — with echo, and
 * backspace editing — and signals when a newline lands or the buffer is
 * full.
 *
 * The destination buffer was access-checked to sit in user/shared, so
 * it is mapped (at the same address) in the external process too.
 */

use spin::Mutex;

use crate::arch::peripheral::{apic, kbd, vga};
use crate::sched::NO_PROC;
use crate::config::MIN_EXT_PRIO;
use crate::syscall::invoke::{
    abort_p, access, activate_pe, sem_ini, sem_signal, sem_wait, wfi,
};
use crate::syscall::numbers::INTR_TYPE_KBD;

/// I/O APIC pin of the keyboard
const KBD_IRQ: u8 = 1;

struct Console {
    /// Mutual exclusion among console users
    mutex: u32,
    /// Read-completion synchronization
    sync: u32,
    /// Whether a read is in progress (the keyboard pin is only open
    /// while this is set)
    active: bool,
    /// Where the next character goes
    dst: *mut u8,
    /// Characters still wanted
    remaining: u64,
    /// Size of the buffer handed to `readconsole`
    cap: u64,
}

unsafe impl Send for Console {}

static CONSOLE: Mutex<Console> = Mutex::new(Console {
    mutex: u32::MAX,
    sync: u32::MAX,
    active: false,
    dst: core::ptr::null_mut(),
    remaining: 0,
    cap: 0,
});

pub extern "C" fn c_writeconsole(buf: u64, len: u64) {
    if !access(buf, len, false, false) {
        log::warn!("writeconsole: invalid parameters: {:#x}, {}", buf, len);
        abort_p();
    }
    let mutex = CONSOLE.lock().mutex;
    sem_wait(mutex);
    for i in 0..len {
        let c = unsafe { *(buf as *const u8).add(i as usize) };
        vga::char_write(c);
    }
    sem_signal(mutex);
}

pub extern "C" fn c_readconsole(buf: u64, cap: u64) -> u64 {
    if !access(buf, cap, true, true) {
        log::warn!("readconsole: invalid parameters: {:#x}, {}", buf, cap);
        abort_p();
    }
    if cap == 0 {
        return 0;
    }
    let (mutex, sync) = {
        let c = CONSOLE.lock();
        (c.mutex, c.sync)
    };
    sem_wait(mutex);
    {
        let mut c = CONSOLE.lock();
        c.dst = buf as *mut u8;
        c.remaining = cap;
        c.cap = cap;
        c.active = true;
    }
    apic::set_masked(KBD_IRQ as usize, false);
    sem_wait(sync);
    let read = {
        let c = CONSOLE.lock();
        c.cap - c.remaining
    };
    sem_signal(mutex);
    read
}

pub extern "C" fn c_iniconsole(attr: u64) {
    vga::clear(attr as u8);
}

/// Body of the keyboard external process.
extern "C" fn extern_kbd(_arg: u64) {
    loop {
        apic::set_masked(KBD_IRQ as usize, true);

        let ch = kbd::char_read_intr();
        let mut done = false;
        let mut reading = false;
        {
            let mut c = CONSOLE.lock();
            if c.active {
                reading = true;
                match ch {
                    None => {}
                    Some('\u{8}') => {
                        if c.remaining < c.cap {
                            c.dst = c.dst.wrapping_sub(1);
                            c.remaining += 1;
                            vga::str_write("\u{8} \u{8}");
                        }
                    }
                    Some('\r') | Some('\n') => {
                        done = true;
                        unsafe { *c.dst = 0 };
                        vga::str_write("\r\n");
                    }
                    Some(ch) => {
                        let b = if ch.is_ascii() { ch as u8 } else { b'?' };
                        unsafe { *c.dst = b };
                        c.dst = c.dst.wrapping_add(1);
                        c.remaining -= 1;
                        vga::char_write(b);
                        if c.remaining == 0 {
                            done = true;
                        }
                    }
                }
                if done {
                    c.active = false;
                }
            }
            // A press with no read pending is dropped and the pin stays
            // masked until the next readconsole opens it again.
        }

        if done {
            let sync = CONSOLE.lock().sync;
            sem_signal(sync);
        } else if reading {
            apic::set_masked(KBD_IRQ as usize, false);
        }
        wfi();
    }
}

/// Create the console semaphores, drain stale input and activate the
/// keyboard external process.
pub fn init() -> bool {
    {
        let mut c = CONSOLE.lock();
        c.mutex = sem_ini(1);
        if c.mutex == NO_PROC {
            log::error!("console: cannot create mutex");
            return false;
        }
        c.sync = sem_ini(0);
        if c.sync == NO_PROC {
            log::error!("console: cannot create sync");
            return false;
        }
    }

    kbd::init();
    kbd::drain();

    if activate_pe(
        extern_kbd,
        0,
        MIN_EXT_PRIO + INTR_TYPE_KBD as u32,
        0, // system level
        KBD_IRQ,
    ) == NO_PROC
    {
        log::error!("console: cannot create the keyboard external process");
        return false;
    }

    vga::clear(0x07);
    log::info!("console: keyboard and video ready");
    true
}
