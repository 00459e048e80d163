//! Wire-layout structs shared with the guest bindings (mirrors
//! `guest::hypercall`/`guest::boot::BootInfo`, `guest::manifest`).
//! These are `repr(C)` exactly once on each side rather than generated
//! from a shared header, per the project's own note that the
//! assembly hypercall shim is the only piece that must stay
//! architecture-specific; the struct layouts themselves are portable
//! and are kept byte-identical by hand.

/// Matches `guest::hypercall::PIO_BASE`: the guest issues `OUTL` at
/// `PIO_BASE + n` to invoke hypercall `n`.
pub const PIO_BASE: u16 = 0x500;

/// Matches `guest::hypercall::MMIO_BASE` for the aarch64 backend,
/// which uses a 4-byte store at `MMIO_BASE + (n << 3)`.
pub const MMIO_BASE: u64 = 0x1_0000_0000;

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

impl Call {
    pub fn from_u8(n: u8) -> Option<Self> {
        Some(match n {
            1 => Call::Walltime,
            2 => Call::Puts,
            3 => Call::Poll,
            4 => Call::BlockWrite,
            5 => Call::BlockRead,
            6 => Call::NetWrite,
            7 => Call::NetRead,
            8 => Call::Halt,
            _ => return None,
        })
    }

    /// Classifies a PIO port exit to a call number.
    pub fn from_port(port: u16) -> Option<Self> {
        port.checked_sub(PIO_BASE).and_then(|n| Self::from_u8(n as u8))
    }

    /// Classifies an MMIO offset exit to a call number, for the
    /// aarch64 backend.
    pub fn from_mmio_addr(addr: u64) -> Option<Self> {
        let offset = addr.checked_sub(MMIO_BASE)?;
        if offset % 8 != 0 {
            return None;
        }
        Self::from_u8((offset / 8) as u8)
    }
}

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Again = 1,
    Einval = 2,
    Eunspec = 3,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WalltimeArgs {
    pub nsecs: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PutsArgs {
    pub data: u64,
    pub len: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PollArgs {
    pub timeout_nsecs: u64,
    pub ready_set: u64,
    pub ret: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockArgs {
    pub handle: u64,
    pub offset: u64,
    pub data: u64,
    pub len: u64,
    pub ret: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NetWriteArgs {
    pub handle: u64,
    pub data: u64,
    pub len: u64,
    pub ret: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NetReadArgs {
    pub handle: u64,
    pub data: u64,
    pub len: u64,
    pub ret_len: u64,
    pub ret: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct HaltArgs {
    pub exit_status: i32,
    pub cookie: u64,
}

/// Mirrors `guest::boot::BootInfo`; written into guest memory before
/// first VCPU entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BootInfo {
    pub mem_size: u64,
    pub kernel_end: u64,
    pub cpu_cycle_freq: u64,
    pub cmdline: [u8; crate::layout::CMDLINE_SIZE],
    pub mft: u64,
}
