/*
 * Gate Type Numbers
 *
 * Interrupt vectors of every primitive, shared with the invocation
 * wrappers. Vectors 0x40-0x4F are not listed here: that range belongs
 * to the IO module, which claims gates in it through `fill_gate`.
 */

// Common primitives (user-invocable)
pub const TYPE_ACTIVATE_P: u8 = 0x20;
pub const TYPE_TERMINATE_P: u8 = 0x21;
pub const TYPE_SEM_INI: u8 = 0x22;
pub const TYPE_SEM_WAIT: u8 = 0x23;
pub const TYPE_SEM_SIGNAL: u8 = 0x24;
pub const TYPE_DELAY: u8 = 0x25;
pub const TYPE_DO_LOG: u8 = 0x26;
pub const TYPE_GETMEMINFO: u8 = 0x27;
pub const TYPE_BARRIER_CREATE: u8 = 0x2A;
pub const TYPE_BARRIER: u8 = 0x2C;

// Primitives reserved to the IO module
pub const TYPE_ACTIVATE_PE: u8 = 0x30;
pub const TYPE_WFI: u8 = 0x31;
pub const TYPE_FILL_GATE: u8 = 0x32;
pub const TYPE_ABORT_P: u8 = 0x33;
pub const TYPE_IO_PANIC: u8 = 0x34;
pub const TYPE_TRANSLATE: u8 = 0x35;
pub const TYPE_ACCESS: u8 = 0x36;

// External interrupt vectors
pub const INTR_TYPE_KBD: u8 = 0x50;
pub const INTR_TYPE_HD: u8 = 0x60;
pub const INTR_TYPE_TIMER: u8 = 0xFE;
