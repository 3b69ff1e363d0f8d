/*
 * Kernel Logging
 *
 * The `log` facade front ends a 16550 UART on COM1: every subsystem
 * logs through `log::info!` and friends, and user programs reach the
 * same sink through the `do_log` primitive. Messages carry their level;
 * the maximum level is fixed at initialization.
 */

use core::fmt::Write;

use log::{Level, LevelFilter, Metadata, Record};

use crate::arch::peripheral::uart;

struct KernelLog;

impl log::Log for KernelLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut w = uart::SerialWriter;
            let _ = writeln!(w, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLog = KernelLog;

pub fn init() {
    uart::init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
