/*
 * Global Descriptor Table and TSS
 *
 * Flat segmentation: kernel and user code/data descriptors plus one TSS.
 * The TSS matters for exactly one thing here: the privileged stack
 * pointer loaded on a user-to-system transition. Every process maps its
 * own kernel stack at the same virtual address (the top of the
 * system/private part), so that pointer is a constant and is written
 * once, at boot.
 */

use lazy_static::lazy_static;
use x86_64::VirtAddr;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;

use crate::mem::layout::KSTACK_TOP;

/// Selector values as they end up in saved interrupt frames. The
/// initialization asserts they match what the table hands out.
pub const SEL_SYS_CODE: u64 = 0x08;
pub const SEL_SYS_DATA: u64 = 0x10;
pub const SEL_USR_DATA: u64 = 0x2B;
pub const SEL_USR_CODE: u64 = 0x33;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.privilege_stack_table[0] = VirtAddr::new(KSTACK_TOP);
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let sys_code = gdt.append(Descriptor::kernel_code_segment());
        let sys_data = gdt.append(Descriptor::kernel_data_segment());
        let tss = gdt.append(Descriptor::tss_segment(&TSS));
        let usr_data = gdt.append(Descriptor::user_data_segment());
        let usr_code = gdt.append(Descriptor::user_code_segment());
        (
            gdt,
            Selectors {
                sys_code,
                sys_data,
                tss,
                usr_data,
                usr_code,
            },
        )
    };
}

struct Selectors {
    sys_code: SegmentSelector,
    sys_data: SegmentSelector,
    tss: SegmentSelector,
    usr_data: SegmentSelector,
    usr_code: SegmentSelector,
}

/// Load the GDT, reload every segment register and load the TSS.
pub fn init() {
    use x86_64::instructions::segmentation::{CS, DS, ES, FS, GS, SS, Segment};
    use x86_64::instructions::tables::load_tss;

    GDT.0.load();

    assert_eq!(GDT.1.sys_code.0 as u64, SEL_SYS_CODE);
    assert_eq!(GDT.1.sys_data.0 as u64, SEL_SYS_DATA);
    assert_eq!((GDT.1.usr_data.0 | 3) as u64, SEL_USR_DATA);
    assert_eq!((GDT.1.usr_code.0 | 3) as u64, SEL_USR_CODE);

    unsafe {
        CS::set_reg(GDT.1.sys_code);
        DS::set_reg(GDT.1.sys_data);
        ES::set_reg(GDT.1.sys_data);
        SS::set_reg(GDT.1.sys_data);
        FS::set_reg(GDT.1.sys_data);
        GS::set_reg(GDT.1.sys_data);
        load_tss(GDT.1.tss);
    }

    log::info!("GDT loaded; privileged stack at {:#x}", KSTACK_TOP);
}
