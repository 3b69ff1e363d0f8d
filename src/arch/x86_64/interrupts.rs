/*
 * Interrupt Flag Control
 *
 * Thin wrappers over the x86_64 interrupt-control instructions. Kernel
 * primitives never need these (their gates mask interrupts for the whole
 * entry), but code that runs with interrupts enabled and peeks at kernel
 * state, like the dummy process polling the live-process count, must
 * bracket the access.
 */

use x86_64::instructions::interrupts;

pub fn enable() {
    interrupts::enable();
}

pub fn disable() {
    interrupts::disable();
}

/// Run `f` with external interrupts masked, restoring the previous state.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(not(test))]
    {
        interrupts::without_interrupts(f)
    }
    #[cfg(test)]
    {
        f()
    }
}

/// Pause the processor until the next external interrupt request.
pub fn halt() {
    x86_64::instructions::hlt();
}
