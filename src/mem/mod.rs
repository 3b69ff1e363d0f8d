/*
 * Memory Management
 *
 * - `frame`: the physical frame allocator over M2 (free list + table
 *   valid-entry counters)
 * - `paging`: the four-level translation trees (map/unmap/translate,
 *   shared-part seeding)
 * - `heap`: the kernel heap
 * - `layout`: the five-part virtual address-space layout
 * - `elf`: copy-on-load of the boot modules into the shared parts
 */

pub mod elf;
pub mod frame;
pub mod heap;
pub mod layout;
pub mod paging;
