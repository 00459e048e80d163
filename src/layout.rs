//! Guest physical memory layout constants. Kept in sync by hand with
//! `guest::memory::layout` — the same ABI the upstream project shares
//! via one `hvt_abi.h`/linker-script pair between the tender and the
//! bindings, just expressed as two Rust modules instead of one header.

/// Lowest guest-physical address the application image may occupy.
/// Everything below this is page tables, the boot GDT, and the boot
/// info block.
pub const GUEST_MIN_BASE: u64 = 0x10_0000;

/// The last `STACK_SIZE` bytes of guest memory are the initial stack.
pub const STACK_SIZE: u64 = 1 << 20;

/// Fixed guest-physical address of the boot info block.
pub const BOOT_INFO_BASE: u64 = 0x1_0000;

/// Fixed guest-physical address of the serialized manifest note
/// (`device::Devices::manifest_bytes`), pointed to by `BootInfo::mft`.
/// Sits comfortably between the boot info block and `GUEST_MIN_BASE`,
/// clear of both `BOOT_INFO_BASE` and the page-table/GDT region
/// `cpu::x86_64` owns below it.
pub const MFT_BASE: u64 = 0x2_0000;

/// Matches upstream `HVT_CMDLINE_SIZE`.
pub const CMDLINE_SIZE: usize = 8192;

/// Architectural maximum guest memory size on x86_64.
pub const MAX_GUEST_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Default `--mem` size in MiB when unset.
pub const DEFAULT_MEM_MB: u64 = 64;

pub const PAGE_SIZE: u64 = 4096;
pub const HUGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

pub fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

pub fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers_round_correctly() {
        assert_eq!(page_align_up(1), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align_down(PAGE_SIZE + 1), PAGE_SIZE);
    }
}
