/*
 * Boot-Loader Hand-Off
 *
 * The boot loader enters the kernel with a pointer to this structure:
 * where it put the privileged stack pointer, the first physical address
 * it left free below the video hole, and the position of the three
 * module images it loaded (the kernel's own, the IO module's, the user
 * module's). A module record with a zero start means "not provided".
 */

/// One loaded module image
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModInfo {
    pub start: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug)]
pub struct BootInfo {
    /// Privileged stack pointer the loader installed while booting
    pub tss_kstack: u64,
    /// First free physical address past the loader's own allocations
    pub free_start: u64,
    /// Kernel, IO and user module images, in that order
    pub modules: [ModInfo; 3],
}

impl BootInfo {
    pub fn module(&self, index: usize) -> Option<ModInfo> {
        let m = self.modules[index];
        if m.start == 0 { None } else { Some(m) }
    }
}
