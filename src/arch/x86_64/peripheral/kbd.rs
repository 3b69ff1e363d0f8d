/*
 * PS/2 Keyboard Controller
 *
 * Scancode transport and decoding for the keyboard external process.
 * Decoding (set 1, US layout) is delegated to the `pc_keyboard` crate;
 * only key presses that map to a character are surfaced.
 */

use pc_keyboard::{layouts::Us104Key, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::instructions::port::Port;

const KBD_DATA: u16 = 0x60;
const KBD_STATUS: u16 = 0x64;

static DECODER: Mutex<Option<Keyboard<Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn init() {
    *DECODER.lock() = Some(Keyboard::new(
        ScancodeSet1::new(),
        Us104Key,
        HandleControl::MapLettersToUnicode,
    ));
}

/// Throw away anything sitting in the controller's output buffer
/// (presses accumulated before the external process existed).
pub fn drain() {
    let mut status = Port::<u8>::new(KBD_STATUS);
    let mut data = Port::<u8>::new(KBD_DATA);
    unsafe {
        while status.read() & 0x01 != 0 {
            let _ = data.read();
        }
    }
}

/// Read the scancode that raised the interrupt and decode it. `None`
/// for releases, modifiers and anything without a character mapping.
pub fn char_read_intr() -> Option<char> {
    let mut data = Port::<u8>::new(KBD_DATA);
    let scancode = unsafe { data.read() };

    let mut guard = DECODER.lock();
    let decoder = guard.as_mut()?;
    let event = decoder.add_byte(scancode).ok()??;
    match decoder.process_keyevent(event)? {
        DecodedKey::Unicode(c) => Some(c),
        DecodedKey::RawKey(_) => None,
    }
}
