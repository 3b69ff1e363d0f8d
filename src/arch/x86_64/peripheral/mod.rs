/*
 * Peripherals
 *
 * Register-level access to the devices the kernel drives: interrupt
 * controllers, the interval timer, the serial log sink, the text
 * console, the keyboard controller and the ATA channel.
 */

pub mod apic;
pub mod ata;
pub mod kbd;
pub mod pic;
pub mod pit;
pub mod uart;
pub mod vga;
