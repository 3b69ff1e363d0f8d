/*
 * ELF Module Loading
 *
 * The boot loader leaves the IO and user modules in memory as raw ELF
 * images. Before the first process of a module can run, its PT_LOAD
 * segments must be copied into fresh M2 frames and mapped at their
 * link-time virtual addresses in the shared parts of the initial address
 * space (which every later process inherits by root-entry copy).
 *
 * Copying is mandatory: the image copy may be misaligned, and a segment's
 * memory size may exceed its file size, in which case the excess must be
 * zero-filled.
 */

use super::frame::with_frames;
use super::paging::{self, PteFlags};
use crate::config::PAGE_SIZE;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const PT_LOAD: u32 = 1;
const PF_W: u32 = 2;

#[repr(C)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

/// Allocate an M2 frame holding a copy of the page of the segment
/// `[seg_beg, seg_end)` that must appear at virtual address `v`
/// (zero-filling past the end of the file image).
fn copy_segment_page(v: u64, virt_beg: u64, seg_beg: u64, seg_end: u64) -> u64 {
    let Some(dst) = with_frames(|p| p.alloc()) else {
        return 0;
    };
    let src = seg_beg + (v - virt_beg);
    let to_copy = if src > seg_end {
        0
    } else {
        (seg_end - src).min(PAGE_SIZE)
    };
    unsafe {
        if to_copy > 0 {
            core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, to_copy as usize);
        }
        if to_copy < PAGE_SIZE {
            core::ptr::write_bytes(
                (dst + to_copy) as *mut u8,
                0,
                (PAGE_SIZE - to_copy) as usize,
            );
        }
    }
    dst
}

/// Load a module image sitting at physical `[start, start+size)` into the
/// tree rooted at `root`, then map `heap_size` bytes of module heap past
/// the highest segment address.
///
/// `user` grants user-level access to the mappings. Returns the module's
/// entry point, or `None` on a malformed image or frame exhaustion.
pub fn load_module(root: u64, start: u64, size: u64, user: bool, heap_size: u64) -> Option<u64> {
    if size < core::mem::size_of::<Elf64Ehdr>() as u64 {
        return None;
    }
    let ehdr = unsafe { &*(start as *const Elf64Ehdr) };
    if ehdr.e_ident[0..4] != ELF_MAGIC {
        log::warn!("module at {:#x}: not an ELF image", start);
        return None;
    }

    let base_flags = if user {
        PteFlags::USER
    } else {
        PteFlags::empty()
    };
    let mut last_vaddr = 0u64;
    let mut ph_addr = start + ehdr.e_phoff;

    for _ in 0..ehdr.e_phnum {
        let ph = unsafe { &*(ph_addr as *const Elf64Phdr) };
        ph_addr += ehdr.e_phentsize as u64;
        if ph.p_type != PT_LOAD {
            continue;
        }

        let page_offset = ph.p_vaddr & (PAGE_SIZE - 1);
        let virt_beg = ph.p_vaddr - page_offset;
        let virt_end = (ph.p_vaddr + ph.p_memsz + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        let seg_beg = start + ph.p_offset - page_offset;
        let seg_end = start + ph.p_offset + ph.p_filesz;

        if virt_end > last_vaddr {
            last_vaddr = virt_end;
        }

        let mut flags = base_flags;
        if ph.p_flags & PF_W != 0 {
            flags |= PteFlags::WRITE;
        }

        if paging::map(root, virt_beg, virt_end, flags, |v| {
            copy_segment_page(v, virt_beg, seg_beg, seg_end)
        }) != virt_end
        {
            return None;
        }
        log::info!(
            " - segment {} {} mapped at [{:#18x}, {:#18x})",
            if user { "user  " } else { "system" },
            if flags.contains(PteFlags::WRITE) {
                "read/write"
            } else {
                "read-only "
            },
            virt_beg,
            virt_end
        );
    }

    // The module heap sits right after the image; its frames are plain
    // allocations.
    let heap_end = last_vaddr + heap_size;
    if paging::map(root, last_vaddr, heap_end, base_flags | PteFlags::WRITE, |_| {
        with_frames(|p| p.alloc()).unwrap_or(0)
    }) != heap_end
    {
        return None;
    }
    log::info!(" - heap: [{:#18x}, {:#18x})", last_vaddr, heap_end);
    log::info!(" - entry point: {:#x}", ehdr.e_entry);
    Some(ehdr.e_entry)
}
