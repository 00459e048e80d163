//! x86_64 CPU/page-table bring-up. Builds an identity map: PML4[0]
//! fans out to 4 contiguous PDPTEs covering up to 4 GiB, each PDPTE's
//! PD uses 2 MiB pages, except PDE[0] of the first PD, which points at
//! a 4 KiB-granularity PT so the zero page and the page tables themselves can stay
//! not-present while the boot-info region is present+read-only.

use kvm_bindings::kvm_userspace_memory_region;
use kvm_ioctls::{VcpuFd, VmFd};
use vm_memory::{Bytes, GuestAddress, GuestMemoryMmap};

use crate::error::CpuError;
use crate::layout;

const PML4_BASE: u64 = 0x2000;
const PDPT_BASE: u64 = 0x3000;
const PD_BASE: u64 = 0x4000; // 4 contiguous pages, one per PDPTE
const PT0_BASE: u64 = 0x8000; // 4 KiB-page PT backing PD[0]'s PDE[0]
const GDT_BASE: u64 = 0x9000;

/// Pages below this offset (the zero page, the page tables, the GDT)
/// are left not-present. From here up to `GUEST_MIN_BASE` pages are
/// present+read-only (boot info, cmdline, manifest — tender-to-guest
/// input only).
const PT0_MAP_START: u64 = 0xa000;

const PTE_PRESENT: u64 = 1 << 0;
const PTE_RW: u64 = 1 << 1;
const PTE_PS: u64 = 1 << 7;

const CR4_PAE: u64 = 1 << 5;
const CR0_PE: u64 = 1 << 0;
const CR0_NE: u64 = 1 << 5;
const CR0_PG: u64 = 1 << 31;
const EFER_LME: u64 = 1 << 8;
const EFER_LMA: u64 = 1 << 10;
const RFLAGS_RESERVED: u64 = 1 << 1;

const CS_SELECTOR: u16 = 0x8;
const SS_SELECTOR: u16 = 0x10;
const CS_TYPE: u8 = 0xB; // execute, read, accessed
const SS_TYPE: u8 = 0x3; // read/write, accessed

const NUM_PDPTE: u64 = 4; // covers up to 4 GiB, the architectural maximum
const GIB: u64 = 1 << 30;

/// Result of CPU bring-up: the guest memory is registered with KVM
/// and VCPU 0 is parked at the reset state, ready for `elf::load` to
/// set `rip` and `vcpu::Vcpu::run` to enter the guest.
pub struct Setup;

impl Setup {
    /// Builds the identity-mapped page tables for `mem_size` bytes of
    /// guest memory, registers the region with KVM, and puts VCPU 0
    /// into 64-bit long mode with paging enabled.
    pub fn build(
        vm: &VmFd,
        vcpu: &VcpuFd,
        mem: &GuestMemoryMmap<()>,
        mem_size: u64,
    ) -> Result<Self, CpuError> {
        if mem_size > layout::MAX_GUEST_MEMORY {
            return Err(CpuError::MemoryTooLarge {
                requested: mem_size,
                max: layout::MAX_GUEST_MEMORY,
            });
        }

        write_page_tables(mem, mem_size)?;
        write_gdt(mem)?;

        unsafe {
            vm.set_user_memory_region(kvm_userspace_memory_region {
                slot: 0,
                guest_phys_addr: 0,
                memory_size: mem_size,
                userspace_addr: mem.get_host_address(GuestAddress(0)).unwrap() as u64,
                flags: 0,
            })?;
        }

        let mut regs = vcpu.get_regs()?;
        regs.rsp = mem_size; // stack grows down from the end of guest memory
        regs.rflags = RFLAGS_RESERVED;
        vcpu.set_regs(&regs)?;

        let mut sregs = vcpu.get_sregs()?;
        sregs.cr3 = PML4_BASE;
        sregs.cr4 |= CR4_PAE;
        sregs.efer = EFER_LME | EFER_LMA;

        sregs.cs.l = 1;
        sregs.cs.db = 0;
        sregs.cs.s = 1;
        sregs.cs.type_ = CS_TYPE;
        sregs.cs.present = 1;
        sregs.cs.dpl = 0;
        sregs.cs.selector = CS_SELECTOR;

        sregs.ss.s = 1;
        sregs.ss.type_ = SS_TYPE;
        sregs.ss.present = 1;
        sregs.ss.dpl = 0;
        sregs.ss.selector = SS_SELECTOR;

        sregs.gdt.base = GDT_BASE;
        sregs.gdt.limit = (3 * 8 - 1) as u16;
        sregs.idt.limit = 0;

        sregs.cr0 |= CR0_PG | CR0_PE | CR0_NE;

        vcpu.set_sregs(&sregs)?;

        Ok(Self)
    }
}

/// Measures the host TSC's tick rate by bracketing a short sleep,
/// for `abi::BootInfo::cpu_cycle_freq` (the guest derives its
/// `(mult, shift)` scaling from this single host-measured number, the
/// same role `tscclock.c`'s `get_tsc_freq` plays upstream, just
/// computed on the host instead of probed from CPUID/calibration
/// inside the guest).
pub fn calibrate_tsc_hz() -> u64 {
    use std::time::{Duration, Instant};

    const SAMPLE: Duration = Duration::from_millis(20);

    let start_tsc = unsafe { core::arch::x86_64::_rdtsc() };
    let start = Instant::now();
    std::thread::sleep(SAMPLE);
    let elapsed = start.elapsed();
    let end_tsc = unsafe { core::arch::x86_64::_rdtsc() };

    let ticks = end_tsc.saturating_sub(start_tsc);
    let nanos = elapsed.as_nanos().max(1) as u64;
    ticks.saturating_mul(1_000_000_000) / nanos
}

fn write_page_tables(mem: &GuestMemoryMmap<()>, mem_size: u64) -> Result<(), CpuError> {
    // PML4[0] -> PDPT_BASE
    let pml4_entry = PDPT_BASE | PTE_PRESENT | PTE_RW;
    mem.write_slice(&pml4_entry.to_le_bytes(), GuestAddress(PML4_BASE))?;

    let pdpte_count = mem_size.div_ceil(GIB).min(NUM_PDPTE);
    for i in 0..pdpte_count {
        let pd_addr = PD_BASE + i * layout::PAGE_SIZE;
        let pdpte = pd_addr | PTE_PRESENT | PTE_RW;
        mem.write_slice(&pdpte.to_le_bytes(), GuestAddress(PDPT_BASE + i * 8))?;
        write_pd(mem, pd_addr, i, mem_size)?;
    }

    // PDE[0] of the first PD points at a 4 KiB-granularity PT instead
    // of a 2 MiB page, so the zero page / page-table region can stay
    // not-present.
    let pt0_entry = PT0_BASE | PTE_PRESENT | PTE_RW;
    mem.write_slice(&pt0_entry.to_le_bytes(), GuestAddress(PD_BASE))?;
    write_pt0(mem)?;

    Ok(())
}

fn write_pd(
    mem: &GuestMemoryMmap<()>,
    pd_addr: u64,
    pdpte_index: u64,
    mem_size: u64,
) -> Result<(), CpuError> {
    for pde_index in 0..512u64 {
        let page_phys = pdpte_index * GIB + pde_index * layout::HUGE_PAGE_SIZE;

        if pdpte_index == 0 && pde_index == 0 {
            // Handled separately by write_pt0 via PD[0]'s own entry
            // (overwritten by write_page_tables after this loop).
            continue;
        }
        if page_phys >= mem_size {
            continue; // not-present: beyond the requested memory size
        }

        let pde = page_phys | PTE_PRESENT | PTE_RW | PTE_PS;
        mem.write_slice(
            &pde.to_le_bytes(),
            GuestAddress(pd_addr + pde_index * 8),
        )?;
    }
    Ok(())
}

fn write_pt0(mem: &GuestMemoryMmap<()>) -> Result<(), CpuError> {
    for i in 0..512u64 {
        let page_phys = i * layout::PAGE_SIZE;
        let entry = if page_phys < PT0_MAP_START {
            0 // not-present
        } else if page_phys < layout::GUEST_MIN_BASE {
            page_phys | PTE_PRESENT // read-only: tender-to-guest input
        } else {
            page_phys | PTE_PRESENT | PTE_RW
        };
        mem.write_slice(&entry.to_le_bytes(), GuestAddress(PT0_BASE + i * 8))?;
    }
    Ok(())
}

/// Three "shadow register" descriptors (null, code, data);
/// written into guest memory too in case the guest ever reloads a
/// segment register from the in-memory GDT, even though KVM reads the
/// VCPU's shadow registers directly at first boot.
fn write_gdt(mem: &GuestMemoryMmap<()>) -> Result<(), CpuError> {
    let null_desc: u64 = 0;
    let code_desc: u64 = gdt_descriptor(true);
    let data_desc: u64 = gdt_descriptor(false);

    mem.write_slice(&null_desc.to_le_bytes(), GuestAddress(GDT_BASE))?;
    mem.write_slice(&code_desc.to_le_bytes(), GuestAddress(GDT_BASE + 8))?;
    mem.write_slice(&data_desc.to_le_bytes(), GuestAddress(GDT_BASE + 16))?;
    Ok(())
}

fn gdt_descriptor(code: bool) -> u64 {
    let access: u64 = if code {
        0x9A // present, ring0, code, execute/read
    } else {
        0x92 // present, ring0, data, read/write
    };
    let flags: u64 = if code { 0xA } else { 0xC }; // granularity + (L for code | DB for data)

    // Flat descriptor: base 0, limit 0xFFFFF with G=1 (4 KiB granularity).
    (0xFFFFu64) | (access << 40) | (0xFu64 << 48) | (flags << 52)
}
