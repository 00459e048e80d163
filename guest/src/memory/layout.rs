//! Guest physical memory layout constants.
//!
//! Mirrors the numbers the tender's `cpu::x86_64` module bakes into the
//! page tables and `hvt_abi::BootInfo`. Kept in sync by hand, the same
//! way the upstream project shares a single `hvt_abi.h` between the
//! tender and the bindings: this is the guest-side half of that shared
//! contract.

/// Lowest guest-physical address the application image may occupy.
/// Everything below this is page tables, the boot GDT, and boot info
/// supplied by the tender.
pub const GUEST_MIN_BASE: u64 = 0x10_0000;

/// `solo5_appmain`'s stack occupies the last `STACK_SIZE` bytes of
/// guest memory, page-aligned down from `mem_size`.
pub const STACK_SIZE: u64 = 1 << 20;

/// Fixed guest-physical address of the boot info block the tender
/// writes before first VCPU entry.
pub const BOOT_INFO_BASE: u64 = 0x1_0000;

/// Matches upstream `HVT_CMDLINE_SIZE`.
pub const CMDLINE_SIZE: usize = 8192;

/// Published by [`crate::boot::start_info`] once boot has located the
/// end of the loaded image.
#[derive(Clone, Copy, Debug)]
pub struct HeapRegion {
    pub start: u64,
    pub size: u64,
}
