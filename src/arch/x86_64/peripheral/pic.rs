/*
 * Legacy 8259 PIC
 *
 * The machine boots with the two legacy PICs wired in. Interrupt
 * delivery goes through the I/O APIC instead, so the only thing to do
 * with them is remap them away from the exception vectors (a spurious
 * IRQ with the reset mapping would look like a CPU fault) and mask every
 * line.
 */

use pic8259::ChainedPics;
use spin::Mutex;

/// Remap base: a vector range nothing else uses
const PIC_1_OFFSET: u8 = 0x70;
const PIC_2_OFFSET: u8 = 0x78;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

pub fn init() {
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        pics.disable();
    }
    log::info!("legacy PICs remapped and masked");
}
