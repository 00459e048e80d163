//! Thread-local storage block layout. Two variants, selected by
//! target, matching the upstream `tls.c`:
//!
//! - **Variant II** (x86_64, ppc64): `.tdata`/`.tbss` come first, the
//!   thread pointer sits just past them and points at a one-word TCB
//!   (a self-pointer, so `mov %fs:0, reg` works).
//! - **Variant I** (aarch64): a fixed two-word TCB comes first, the
//!   thread pointer points at its start, and `.tdata`/`.tbss` follow,
//!   aligned.

use core::ptr;

unsafe extern "C" {
    #[link_name = "__tdata_start"]
    static TDATA_START: u8;
    #[link_name = "__tdata_size"]
    static TDATA_SIZE: u8;
    #[link_name = "__tbss_size"]
    static TBSS_SIZE: u8;
    #[link_name = "__tls_align"]
    static TLS_ALIGN: u8;
}

fn tdata_size() -> usize {
    #[cfg(target_os = "none")]
    unsafe {
        ptr::addr_of!(TDATA_SIZE) as usize
    }
    #[cfg(not(target_os = "none"))]
    {
        0
    }
}

fn tbss_size() -> usize {
    #[cfg(target_os = "none")]
    unsafe {
        ptr::addr_of!(TBSS_SIZE) as usize
    }
    #[cfg(not(target_os = "none"))]
    {
        0
    }
}

fn tls_align() -> usize {
    #[cfg(target_os = "none")]
    unsafe {
        (ptr::addr_of!(TLS_ALIGN) as usize).max(16)
    }
    #[cfg(not(target_os = "none"))]
    {
        16
    }
}

const TCB_SIZE: usize = core::mem::size_of::<usize>();

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

#[cfg(target_arch = "aarch64")]
const VARIANT_I: bool = true;
#[cfg(not(target_arch = "aarch64"))]
const VARIANT_I: bool = false;

fn data_size() -> usize {
    tdata_size() + tbss_size()
}

/// Total size of the TLS block to allocate.
pub fn tls_size() -> usize {
    let align = tls_align();
    if VARIANT_I {
        align_up(TCB_SIZE, align) + align_up(data_size(), align)
    } else {
        align_up(data_size(), align) + TCB_SIZE
    }
}

/// Offset of the thread pointer within the allocated block.
pub fn tls_tp_offset() -> usize {
    if VARIANT_I {
        0
    } else {
        align_up(data_size(), tls_align())
    }
}

fn tls_data_offset() -> usize {
    if VARIANT_I {
        align_up(TCB_SIZE, tls_align())
    } else {
        0
    }
}

/// Copies `.tdata` into the block and zeroes `.tbss`; writes the TCB
/// self-pointer word. `base` must point to a `tls_size()`-byte,
/// `tls_align()`-aligned allocation.
///
/// # Safety
/// `base` must be valid for `tls_size()` writable bytes.
pub unsafe fn tls_init(base: *mut u8) -> *mut u8 {
    let data_off = tls_data_offset();
    let tp_off = tls_tp_offset();

    unsafe {
        let tdata_src = ptr::addr_of!(TDATA_START);
        ptr::copy_nonoverlapping(tdata_src, base.add(data_off), tdata_size());
        ptr::write_bytes(base.add(data_off + tdata_size()), 0, tbss_size());

        let tp = base.add(tp_off);
        *(tp as *mut usize) = tp as usize;
        tp
    }
}

#[cfg(target_arch = "x86_64")]
pub unsafe fn set_tls_base(tp: *mut u8) {
    unsafe {
        const IA32_FS_BASE: u32 = 0xC000_0100;
        let value = tp as u64;
        core::arch::asm!(
            "wrmsr",
            in("ecx") IA32_FS_BASE,
            in("eax") value as u32,
            in("edx") (value >> 32) as u32,
            options(nostack, nomem),
        );
    }
}

#[cfg(target_arch = "aarch64")]
pub unsafe fn set_tls_base(tp: *mut u8) {
    unsafe {
        core::arch::asm!("msr tpidr_el0, {}", in(reg) tp as u64, options(nostack, nomem));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_size_is_at_least_a_tcb_word() {
        assert!(tls_size() >= TCB_SIZE);
    }
}
