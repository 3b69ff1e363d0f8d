/*
 * 16550 UART (COM1)
 *
 * The serial port is the kernel's log sink. Writes busy-wait on the
 * transmit-holding-register-empty bit; nothing here ever reads.
 */

use core::fmt;

use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

/// Program 115200 8N1, FIFOs on.
pub fn init() {
    let mut ier = Port::<u8>::new(COM1 + 1);
    let mut fcr = Port::<u8>::new(COM1 + 2);
    let mut lcr = Port::<u8>::new(COM1 + 3);
    let mut dll = Port::<u8>::new(COM1);
    let mut dlm = Port::<u8>::new(COM1 + 1);
    unsafe {
        ier.write(0x00); // no interrupts
        lcr.write(0x80); // DLAB on
        dll.write(0x01); // divisor 1 = 115200 baud
        dlm.write(0x00);
        lcr.write(0x03); // 8N1, DLAB off
        fcr.write(0xC7); // FIFOs enabled and cleared
    }
}

fn write_byte(b: u8) {
    let mut lsr = Port::<u8>::new(COM1 + 5);
    let mut thr = Port::<u8>::new(COM1);
    unsafe {
        while lsr.read() & 0x20 == 0 {}
        thr.write(b);
    }
}

/// `fmt::Write` front end for the log implementation.
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                write_byte(b'\r');
            }
            write_byte(b);
        }
        Ok(())
    }
}
