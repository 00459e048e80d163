//! Early boot glue: reads the info block the tender wrote, publishes
//! the heap, seeds the stack canary, initializes the clock and TLS,
//! and produces the `start_info` the application's `app_main` runs
//! with.

use crate::memory::layout::{self, HeapRegion};
use crate::{clock, cmdline, device, hypercall, memory, tls};

#[repr(C)]
pub struct BootInfo {
    pub mem_size: u64,
    pub kernel_end: u64,
    pub cpu_cycle_freq: u64,
    pub cmdline: [u8; layout::CMDLINE_SIZE],
    pub mft: u64,
}

pub struct StartInfo {
    pub cmdline: &'static str,
    pub heap_start: u64,
    pub heap_size: u64,
}

static HEAP: memory::heap::Heap = memory::heap::Heap::uninit();

/// # Safety
/// Must only be called once, during early boot, before any other
/// bindings function is called.
pub unsafe fn start() -> StartInfo {
    let boot_info = unsafe { &*(layout::BOOT_INFO_BASE as *const BootInfo) };

    seed_stack_canary();

    let heap_start = (boot_info.kernel_end + 0xfff) & !0xfff;
    let stack_region_start = boot_info.mem_size.saturating_sub(layout::STACK_SIZE);
    let heap_size = stack_region_start.saturating_sub(heap_start);
    HEAP.init(HeapRegion {
        start: heap_start,
        size: heap_size,
    })
    .expect("heap already initialized");

    clock::init(boot_info.cpu_cycle_freq, hypercall::walltime());

    let raw_cmdline = core::str::from_utf8(&boot_info.cmdline)
        .unwrap_or("")
        .trim_end_matches('\0');
    let (_level, app_cmdline) = cmdline::parse(raw_cmdline);

    init_tls();

    unsafe {
        device::init(boot_info.mft);
    }

    StartInfo {
        cmdline: app_cmdline,
        heap_start,
        heap_size,
    }
}

fn init_tls() {
    let size = tls::tls_size();
    if size == 0 {
        return;
    }
    let Ok(block) = HEAP.alloc(size) else {
        return;
    };
    unsafe {
        let tp = tls::tls_init(block.as_ptr());
        tls::set_tls_base(tp);
    }
}

fn seed_stack_canary() {
    // Not a cryptographic RNG: the host clock's low bits are the only
    // entropy source available this early in boot. Good enough to
    // catch the overflow scenarios this environment cares about.
    let seed = (hypercall::walltime() as usize) ^ 0x5a5a_5a5a_5a5a_5a5a;
    unsafe {
        crate::abort::__stack_chk_guard = seed | 1;
    }
}

pub fn heap() -> &'static memory::heap::Heap {
    &HEAP
}
