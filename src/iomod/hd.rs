/*
 * Disk Driver (ATA, PIO and bus-master DMA)
 *
 * One disk, one outstanding operation: a mutex semaphore serializes the
 * clients, a synchronization semaphore parks the client until the disk
 * external process has seen the last interrupt of the transfer.
 *
 * PIO transfers move one sector per interrupt through the data
 * register; DMA transfers hand the engine a table of physical region
 * descriptors (built by translating the client's buffer page by page)
 * and take a single completion interrupt.
 */

use core::alloc::Layout;

use spin::Mutex;

use crate::arch::peripheral::ata;
use crate::config::{MAX_PRD, MIN_EXT_PRIO, PAGE_SIZE, SECTOR_SIZE};
use crate::sched::NO_PROC;
use crate::syscall::invoke::{
    abort_p, access, activate_pe, sem_ini, sem_signal, sem_wait, translate, wfi,
};
use crate::syscall::numbers::INTR_TYPE_HD;

/// I/O APIC pin of the primary ATA channel
const HD_IRQ: u8 = 14;

struct HardDisk {
    /// Opcode of the command in flight
    cmd: u8,
    mutex: u32,
    sync: u32,
    /// Sectors the external process still has to move (1 for DMA)
    remaining: u8,
    /// Next sector's position in the client buffer
    cursor: *mut u8,
    /// Physical-region-descriptor table (IO-heap allocation)
    prd: *mut u32,
}

unsafe impl Send for HardDisk {}

static DISK: Mutex<HardDisk> = Mutex::new(HardDisk {
    cmd: 0,
    mutex: u32::MAX,
    sync: u32::MAX,
    remaining: 0,
    cursor: core::ptr::null_mut(),
    prd: core::ptr::null_mut(),
});

/// Fill the region-descriptor table for `sectors` sectors at `buf`.
/// False if the transfer needs more regions than the table holds.
fn prepare_prd(prd: *mut u32, buf: u64, sectors: u8) -> bool {
    let mut left = sectors as u64 * SECTOR_SIZE as u64;
    let mut v = buf;
    let mut i = 0usize;
    while left > 0 && i < MAX_PRD {
        let pa = translate(v);
        let run = (PAGE_SIZE - (pa % PAGE_SIZE)).min(left);
        unsafe {
            *prd.add(2 * i) = pa as u32;
            *prd.add(2 * i + 1) = run as u32;
        }
        left -= run;
        v += run;
        i += 1;
    }
    if left > 0 {
        return false;
    }
    unsafe {
        // End-of-table mark on the last region's count dword.
        *prd.add(2 * i - 1) |= 0x8000_0000;
    }
    true
}

pub extern "C" fn c_readhd_n(buf: u64, lba: u64, sectors: u64) {
    if !access(buf, sectors * SECTOR_SIZE as u64, true, true) {
        log::warn!("readhd_n: invalid parameters: {:#x}, {}", buf, sectors);
        abort_p();
    }
    if sectors == 0 {
        return;
    }
    let (mutex, sync) = sems();
    sem_wait(mutex);
    {
        let mut d = DISK.lock();
        d.remaining = sectors as u8;
        d.cursor = buf as *mut u8;
        d.cmd = ata::READ_SECT;
    }
    ata::start_cmd(lba as u32, sectors as u8, ata::READ_SECT);
    sem_wait(sync);
    sem_signal(mutex);
}

pub extern "C" fn c_writehd_n(buf: u64, lba: u64, sectors: u64) {
    if !access(buf, sectors * SECTOR_SIZE as u64, false, true) {
        log::warn!("writehd_n: invalid parameters: {:#x}, {}", buf, sectors);
        abort_p();
    }
    if sectors == 0 {
        return;
    }
    let (mutex, sync) = sems();
    sem_wait(mutex);
    {
        let mut d = DISK.lock();
        d.remaining = sectors as u8;
        // The first sector goes out right now; interrupts feed the rest.
        d.cursor = (buf as *mut u8).wrapping_add(SECTOR_SIZE);
        d.cmd = ata::WRITE_SECT;
    }
    ata::start_cmd(lba as u32, sectors as u8, ata::WRITE_SECT);
    ata::output_sect(buf as *const u8);
    sem_wait(sync);
    sem_signal(mutex);
}

fn dma_common(buf: u64, lba: u64, sectors: u64, cmd: u8, to_device: bool) {
    let (mutex, sync) = sems();
    sem_wait(mutex);
    let prd = DISK.lock().prd;
    if !prepare_prd(prd, buf, sectors as u8) {
        log::error!("not enough physical region descriptors");
        sem_signal(sync);
    } else {
        {
            let mut d = DISK.lock();
            d.cmd = cmd;
            d.remaining = 1; // one completion interrupt
        }
        let prd_pa = translate(prd as u64);
        ata::bm_prepare(prd_pa as u32, to_device);
        ata::start_cmd(lba as u32, sectors as u8, cmd);
        ata::bm_start();
    }
    sem_wait(sync);
    sem_signal(mutex);
}

pub extern "C" fn c_dmareadhd_n(buf: u64, lba: u64, sectors: u64) {
    if sectors as usize * SECTOR_SIZE > MAX_PRD * PAGE_SIZE as usize {
        log::warn!("dmareadhd_n: {} sectors is too many", sectors);
        abort_p();
    }
    if !access(buf, sectors * SECTOR_SIZE as u64, true, true) {
        log::warn!("dmareadhd_n: invalid parameters: {:#x}, {}", buf, sectors);
        abort_p();
    }
    if sectors == 0 {
        return;
    }
    dma_common(buf, lba, sectors, ata::READ_DMA, false);
}

pub extern "C" fn c_dmawritehd_n(buf: u64, lba: u64, sectors: u64) {
    if sectors as usize * SECTOR_SIZE > MAX_PRD * PAGE_SIZE as usize {
        log::warn!("dmawritehd_n: {} sectors is too many", sectors);
        abort_p();
    }
    if !access(buf, sectors * SECTOR_SIZE as u64, false, true) {
        log::warn!("dmawritehd_n: invalid parameters: {:#x}, {}", buf, sectors);
        abort_p();
    }
    if sectors == 0 {
        return;
    }
    dma_common(buf, lba, sectors, ata::WRITE_DMA, true);
}

fn sems() -> (u32, u32) {
    let d = DISK.lock();
    (d.mutex, d.sync)
}

/// Body of the disk external process: one interrupt, one step.
extern "C" fn extern_hd(_arg: u64) {
    loop {
        let mut finished = false;
        {
            let mut d = DISK.lock();
            // The countdown drops before the opcode dispatch: after the
            // final WRITE interrupt it is already zero, so no further
            // sector is emitted (the last one is long gone).
            d.remaining -= 1;
            ata::ack();
            match d.cmd {
                ata::READ_SECT => {
                    ata::input_sect(d.cursor);
                    d.cursor = d.cursor.wrapping_add(SECTOR_SIZE);
                }
                ata::WRITE_SECT => {
                    if d.remaining != 0 {
                        ata::output_sect(d.cursor);
                        d.cursor = d.cursor.wrapping_add(SECTOR_SIZE);
                    }
                }
                ata::READ_DMA | ata::WRITE_DMA => {
                    ata::bm_ack();
                }
                _ => {}
            }
            if d.remaining == 0 {
                finished = true;
            }
        }
        if finished {
            let sync = DISK.lock().sync;
            sem_signal(sync);
        }
        wfi();
    }
}

/// Create the disk semaphores, find and enable the bus-master engine,
/// allocate the region-descriptor table and activate the external
/// process.
pub fn init() -> bool {
    {
        let mut d = DISK.lock();
        d.mutex = sem_ini(1);
        if d.mutex == NO_PROC {
            log::error!("hd: cannot create mutex");
            return false;
        }
        d.sync = sem_ini(0);
        if d.sync == NO_PROC {
            log::error!("hd: cannot create sync");
            return false;
        }
    }

    let Some((bus, dev, fun)) = ata::bm_find() else {
        log::warn!("hd: bus master not found");
        return false;
    };
    log::info!("hd: bus master at {:02x}:{:02x}.{}", bus, dev, fun);
    ata::bm_init(bus, dev, fun);

    // The descriptor table must not cross a 64 KiB boundary; aligning
    // it to its own stretch of that granularity is the simple way out.
    let layout = Layout::from_size_align(MAX_PRD * 8, 64 * 1024).unwrap();
    let prd = super::heap::alloc(layout);
    if prd.is_null() {
        log::error!("hd: cannot allocate the region-descriptor table");
        return false;
    }
    DISK.lock().prd = prd as *mut u32;

    if activate_pe(
        extern_hd,
        0,
        MIN_EXT_PRIO + INTR_TYPE_HD as u32,
        0, // system level
        HD_IRQ,
    ) == NO_PROC
    {
        log::error!("hd: cannot create the disk external process");
        return false;
    }

    ata::enable_intr();
    true
}
