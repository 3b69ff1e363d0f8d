/*
 * VGA Text Console
 *
 * 80x25 text mode at the standard frame-buffer address, reached through
 * the physical-memory window. The console driver in the IO module owns
 * all policy (echo, line editing); this layer just writes cells, scrolls
 * and keeps the hardware cursor in step.
 */

use core::ptr::NonNull;

use spin::Mutex;
use volatile::VolatilePtr;
use x86_64::instructions::port::Port;

const VGA_BUFFER: u64 = 0xB8000;
const COLS: usize = 80;
const ROWS: usize = 25;

struct Screen {
    row: usize,
    col: usize,
    attr: u8,
}

static SCREEN: Mutex<Screen> = Mutex::new(Screen {
    row: 0,
    col: 0,
    attr: 0x07,
});

fn cell(row: usize, col: usize) -> VolatilePtr<'static, u16> {
    let addr = VGA_BUFFER + 2 * (row * COLS + col) as u64;
    unsafe { VolatilePtr::new(NonNull::new_unchecked(addr as *mut u16)) }
}

fn move_cursor(row: usize, col: usize) {
    let pos = (row * COLS + col) as u16;
    let mut index = Port::<u8>::new(0x3D4);
    let mut data = Port::<u8>::new(0x3D5);
    unsafe {
        index.write(0x0F);
        data.write(pos as u8);
        index.write(0x0E);
        data.write((pos >> 8) as u8);
    }
}

fn scroll(s: &mut Screen) {
    for row in 1..ROWS {
        for col in 0..COLS {
            cell(row - 1, col).write(cell(row, col).read());
        }
    }
    for col in 0..COLS {
        cell(ROWS - 1, col).write((s.attr as u16) << 8 | b' ' as u16);
    }
    s.row = ROWS - 1;
}

fn put(s: &mut Screen, c: u8) {
    match c {
        b'\n' => {
            s.col = 0;
            s.row += 1;
        }
        b'\r' => s.col = 0,
        0x08 => {
            // backspace only moves; the echo code overwrites
            if s.col > 0 {
                s.col -= 1;
            }
        }
        _ => {
            cell(s.row, s.col).write((s.attr as u16) << 8 | c as u16);
            s.col += 1;
            if s.col == COLS {
                s.col = 0;
                s.row += 1;
            }
        }
    }
    if s.row == ROWS {
        scroll(s);
    }
}

/// Clear the screen and set the attribute used from now on.
pub fn clear(attr: u8) {
    let mut s = SCREEN.lock();
    s.attr = attr;
    s.row = 0;
    s.col = 0;
    for row in 0..ROWS {
        for col in 0..COLS {
            cell(row, col).write((attr as u16) << 8 | b' ' as u16);
        }
    }
    move_cursor(0, 0);
}

pub fn char_write(c: u8) {
    let mut s = SCREEN.lock();
    put(&mut s, c);
    move_cursor(s.row, s.col);
}

pub fn str_write(text: &str) {
    let mut s = SCREEN.lock();
    for b in text.bytes() {
        put(&mut s, b);
    }
    move_cursor(s.row, s.col);
}
