//! Raw hypercall instruction and the wire-layout argument structs
//! shared with the tender's `hypercall` dispatch table. Numbering and
//! field layout mirror the upstream `hvt_abi.h` header; on the Rust
//! side the same contract is expressed twice (here and in the
//! tender's `abi` module) rather than shared via a header, the same
//! way the assembly hypercall instruction itself is kept as a small,
//! clearly marked architecture-specific shim per the project's own
//! design notes.

use core::arch::asm;

#[cfg(target_arch = "x86_64")]
const PIO_BASE: u16 = 0x500;

#[cfg(target_arch = "aarch64")]
const MMIO_BASE: u64 = 0x1_0000_0000;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Walltime = 1,
    Puts = 2,
    Poll = 3,
    BlockWrite = 4,
    BlockRead = 5,
    NetWrite = 6,
    NetRead = 7,
    Halt = 8,
}

/// Mirrors `solo5_result_t`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Again = 1,
    Einval = 2,
    Eunspec = 3,
}

#[repr(C)]
pub struct WalltimeArgs {
    pub nsecs: u64,
}

#[repr(C)]
pub struct PutsArgs {
    pub data: u64,
    pub len: u64,
}

#[repr(C)]
pub struct PollArgs {
    pub timeout_nsecs: u64,
    pub ready_set: u64,
    pub ret: i32,
}

#[repr(C)]
pub struct BlockArgs {
    pub handle: u64,
    pub offset: u64,
    pub data: u64,
    pub len: u64,
    pub ret: i32,
}

#[repr(C)]
pub struct NetWriteArgs {
    pub handle: u64,
    pub data: u64,
    pub len: u64,
    pub ret: i32,
}

#[repr(C)]
pub struct NetReadArgs {
    pub handle: u64,
    pub data: u64,
    pub len: u64,
    pub ret_len: u64,
    pub ret: i32,
}

#[repr(C)]
pub struct HaltArgs {
    pub exit_status: i32,
    pub cookie: u64,
}

/// Issues a single hypercall instruction. `args` must outlive the call
/// and its address must be representable as a 32-bit guest-physical
/// pointer, per the ABI. The compiler-level memory clobber is the only
/// barrier the architecture requires.
///
/// # Safety
/// `args` must point to a correctly laid-out argument struct for `call`.
#[inline]
unsafe fn hypercall_raw(call: Call, args_addr: u32) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        asm!(
            "out dx, eax",
            in("dx") PIO_BASE + call as u16,
            in("eax") args_addr,
            options(nostack),
        );
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let addr = (MMIO_BASE + ((call as u64) << 3)) as *mut u32;
        core::ptr::write_volatile(addr, args_addr);
    }
}

macro_rules! hypercall {
    ($call:expr, $args:expr) => {{
        unsafe { hypercall_raw($call, core::ptr::addr_of!($args) as u32) };
    }};
}

pub fn walltime() -> u64 {
    let mut args = WalltimeArgs { nsecs: 0 };
    hypercall!(Call::Walltime, args);
    args.nsecs
}

pub fn puts(buf: &[u8]) {
    let args = PutsArgs {
        data: buf.as_ptr() as u64,
        len: buf.len() as u64,
    };
    hypercall!(Call::Puts, args);
}

/// Blocks until `timeout_nsecs` (relative) elapses or a registered
/// device becomes ready. Returns the ready-set bitmask; non-zero iff
/// the call returned early for device readiness.
pub fn poll(timeout_nsecs: u64) -> (ResultCode, u64) {
    let mut args = PollArgs {
        timeout_nsecs,
        ready_set: 0,
        ret: ResultCode::Ok as i32,
    };
    hypercall!(Call::Poll, args);
    (result_from_raw(args.ret), args.ready_set)
}

pub fn block_write(handle: u64, offset: u64, buf: &[u8]) -> ResultCode {
    let args = BlockArgs {
        handle,
        offset,
        data: buf.as_ptr() as u64,
        len: buf.len() as u64,
        ret: ResultCode::Ok as i32,
    };
    hypercall!(Call::BlockWrite, args);
    result_from_raw(args.ret)
}

pub fn block_read(handle: u64, offset: u64, buf: &mut [u8]) -> ResultCode {
    let mut args = BlockArgs {
        handle,
        offset,
        data: buf.as_mut_ptr() as u64,
        len: buf.len() as u64,
        ret: ResultCode::Ok as i32,
    };
    hypercall!(Call::BlockRead, args);
    result_from_raw(args.ret)
}

pub fn net_write(handle: u64, buf: &[u8]) -> ResultCode {
    let args = NetWriteArgs {
        handle,
        data: buf.as_ptr() as u64,
        len: buf.len() as u64,
        ret: ResultCode::Ok as i32,
    };
    hypercall!(Call::NetWrite, args);
    result_from_raw(args.ret)
}

/// Returns `(result, actual_len)`; `Again` means no frame was pending.
pub fn net_read(handle: u64, buf: &mut [u8]) -> (ResultCode, usize) {
    let mut args = NetReadArgs {
        handle,
        data: buf.as_mut_ptr() as u64,
        len: buf.len() as u64,
        ret_len: 0,
        ret: ResultCode::Ok as i32,
    };
    hypercall!(Call::NetRead, args);
    (result_from_raw(args.ret), args.ret_len as usize)
}

/// Never returns.
pub fn halt(exit_status: i32, cookie: Option<u64>) -> ! {
    let args = HaltArgs {
        exit_status,
        cookie: cookie.unwrap_or(0),
    };
    hypercall!(Call::Halt, args);
    // The tender tears the guest down on HALT; if it somehow returns
    // control (e.g. under `#[cfg(test)]` host execution) hang rather
    // than fall off the end of a `!`-returning function.
    loop {
        core::hint::spin_loop();
    }
}

fn result_from_raw(raw: i32) -> ResultCode {
    match raw {
        0 => ResultCode::Ok,
        1 => ResultCode::Again,
        2 => ResultCode::Einval,
        _ => ResultCode::Eunspec,
    }
}
