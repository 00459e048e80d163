//! Hypercall ABI & dispatch. The single entry point the VCPU loop
//! calls on every IO exit: classify the port to a call number,
//! bounds-check the guest pointer the instruction carried, read the
//! fixed-layout argument struct out of guest memory, run the
//! registered handler, and write the (possibly mutated) struct back.
//!
//! Every handler here is synchronous and runs to completion on the
//! VCPU thread; the only blocking point is `poll`.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error as ThisError;

use crate::abi::{
    self, BlockArgs, Call, HaltArgs, NetReadArgs, NetWriteArgs, PollArgs, PutsArgs, ResultCode,
    WalltimeArgs,
};
use crate::device::Devices;
use crate::device::block::{Block, BlockError};
use crate::device::net::{Net, NetError};
use crate::memory::{GuestAddr, GuestMemory, MemoryError};

#[derive(ThisError, Debug)]
pub enum HypercallError {
    #[error("unregistered hypercall at port {port:#x}")]
    UnknownPort { port: u16 },

    #[error("unregistered hypercall at mmio offset {addr:#x}")]
    UnknownMmio { addr: u64 },

    #[error("argument pointer: {0}")]
    Pointer(#[from] MemoryError),

    #[error("poll(2) failed: {0}")]
    Poll(#[source] io::Error),
}

/// What the VCPU loop should do after a hypercall returns.
pub enum Outcome {
    Continue,
    Halt { status: i32, cookie: Option<u64> },
}

/// Dispatches one hypercall: `args_addr` is the 32-bit guest-physical
/// pointer the guest passed in `eax`/the MMIO store value, translated
/// to a host pointer by checked bounds-testing.
pub fn dispatch(
    call: Call,
    args_addr: u32,
    mem: &GuestMemory,
    devices: &Devices,
) -> Result<Outcome, HypercallError> {
    let addr = GuestAddr(args_addr as u64);

    match call {
        Call::Walltime => {
            let nsecs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            mem.write_struct(addr, WalltimeArgs { nsecs })?;
        }
        Call::Puts => {
            let args: PutsArgs = mem.read_struct(addr)?;
            let data = mem.slice(GuestAddr(args.data), args.len as usize)?;
            devices.console().borrow_mut().puts(data);
        }
        Call::Poll => {
            let mut args: PollArgs = mem.read_struct(addr)?;
            let (ready_set, result) = do_poll(args.timeout_nsecs, devices)?;
            args.ready_set = ready_set;
            args.ret = result as i32;
            mem.write_struct(addr, args)?;
        }
        Call::BlockWrite => {
            let mut args: BlockArgs = mem.read_struct(addr)?;
            args.ret = block_op(devices, args.handle, |block| {
                let data = mem.slice(GuestAddr(args.data), args.len as usize)?;
                Ok(match block.write(args.offset, data) {
                    Ok(()) => ResultCode::Ok,
                    Err(e) => block_result(e),
                })
            })? as i32;
            mem.write_struct(addr, args)?;
        }
        Call::BlockRead => {
            let mut args: BlockArgs = mem.read_struct(addr)?;
            args.ret = block_op(devices, args.handle, |block| {
                let buf = mem.slice_mut(GuestAddr(args.data), args.len as usize)?;
                Ok(match block.read(args.offset, buf) {
                    Ok(()) => ResultCode::Ok,
                    Err(e) => block_result(e),
                })
            })? as i32;
            mem.write_struct(addr, args)?;
        }
        Call::NetWrite => {
            let mut args: NetWriteArgs = mem.read_struct(addr)?;
            args.ret = net_write_op(devices, args.handle, |net| {
                let data = mem.slice(GuestAddr(args.data), args.len as usize)?;
                Ok(match net.write_frame(data) {
                    Ok(()) => ResultCode::Ok,
                    Err(e) => net_result(e),
                })
            })? as i32;
            mem.write_struct(addr, args)?;
        }
        Call::NetRead => {
            let mut args: NetReadArgs = mem.read_struct(addr)?;
            let (ret, len) = net_read_op(devices, args.handle, |net| {
                let buf = mem.slice_mut(GuestAddr(args.data), args.len as usize)?;
                Ok(match net.read_frame(buf) {
                    Ok(Some(n)) => (ResultCode::Ok, n as u64),
                    Ok(None) => (ResultCode::Again, 0),
                    Err(e) => (net_result(e), 0),
                })
            })?;
            args.ret = ret as i32;
            args.ret_len = len;
            mem.write_struct(addr, args)?;
        }
        Call::Halt => {
            let args: HaltArgs = mem.read_struct(addr)?;
            let cookie = (args.cookie != 0).then_some(args.cookie);
            return Ok(Outcome::Halt {
                status: args.exit_status,
                cookie,
            });
        }
    }

    Ok(Outcome::Continue)
}

/// Looks up the block device attached at `handle`, runs `f`, and maps
/// "handle doesn't resolve to an attached block device" to `EINVAL`
/// rather than aborting the guest — an out-of-range handle is a guest
/// programming error, not a host policy violation. Aborting the guest
/// is reserved for an unregistered or malformed *call number*.
fn block_op(
    devices: &Devices,
    handle: u64,
    f: impl FnOnce(&mut Block) -> Result<ResultCode, HypercallError>,
) -> Result<ResultCode, HypercallError> {
    match devices.block() {
        Some((h, block)) if h == handle => f(&mut block.borrow_mut()),
        _ => Ok(ResultCode::Einval),
    }
}

fn net_write_op(
    devices: &Devices,
    handle: u64,
    f: impl FnOnce(&mut Net) -> Result<ResultCode, HypercallError>,
) -> Result<ResultCode, HypercallError> {
    match devices.net() {
        Some((h, net)) if h == handle => f(&mut net.borrow_mut()),
        _ => Ok(ResultCode::Einval),
    }
}

fn net_read_op(
    devices: &Devices,
    handle: u64,
    f: impl FnOnce(&mut Net) -> Result<(ResultCode, u64), HypercallError>,
) -> Result<(ResultCode, u64), HypercallError> {
    match devices.net() {
        Some((h, net)) if h == handle => f(&mut net.borrow_mut()),
        _ => Ok((ResultCode::Einval, 0)),
    }
}

fn block_result(e: BlockError) -> ResultCode {
    match e {
        BlockError::Misaligned { .. } | BlockError::OutOfRange { .. } => ResultCode::Einval,
        BlockError::Io(_) => ResultCode::Eunspec,
    }
}

fn net_result(e: NetError) -> ResultCode {
    match e {
        NetError::FrameTooLarge { .. } => ResultCode::Einval,
        NetError::Io(_) | NetError::Ioctl(_) => ResultCode::Eunspec,
    }
}

/// Blocks the thread on the set of device file descriptors, with a
/// timeout derived from the guest deadline. `POLLERR` is mapped to
/// `Unspecified` rather than silently treated as readiness or as
/// "nothing ready".
fn do_poll(timeout_nsecs: u64, devices: &Devices) -> Result<(u64, ResultCode), HypercallError> {
    let raw_fds = devices.pollable_fds();
    let mut pollfds: Vec<libc::pollfd> = raw_fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = timeout_nsecs.div_ceil(1_000_000).min(i32::MAX as u64) as i32;

    let ret = loop {
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue; // interrupted by a host signal, retry
            }
            return Err(HypercallError::Poll(err));
        }
        break ret;
    };

    if ret == 0 {
        return Ok((0, ResultCode::Ok));
    }

    let mut ready = 0u64;
    for pfd in &pollfds {
        if pfd.revents & libc::POLLERR != 0 || pfd.revents & libc::POLLHUP != 0 {
            return Ok((0, ResultCode::Eunspec));
        }
        if pfd.revents & libc::POLLIN != 0 {
            if let Some((handle, _)) = devices.net() {
                ready |= 1 << handle;
            }
        }
    }
    Ok((ready, ResultCode::Ok))
}

/// True iff `ready` has `handle`'s bit set, for callers that just
/// need a yes/no answer rather than the whole bitmask.
pub fn is_ready(ready: u64, handle: u64) -> bool {
    ready & (1 << handle) != 0
}

pub use abi::{MMIO_BASE, PIO_BASE};

#[cfg(test)]
mod tests {
    use super::*;
    use vm_memory::{GuestAddress, GuestMemoryMmap};

    fn mem_with(size: usize) -> GuestMemoryMmap<()> {
        GuestMemoryMmap::from_ranges(&[(GuestAddress(0), size)]).unwrap()
    }

    fn empty_devices() -> Devices {
        let mut bytes = vec![0u8; 8];
        bytes[0..4].copy_from_slice(&crate::manifest::VERSION.to_le_bytes());
        bytes[4..8].copy_from_slice(&0u32.to_le_bytes());
        Devices::attach(crate::manifest::Manifest::validate(&bytes).unwrap(), None, None).unwrap()
    }

    #[test]
    fn walltime_is_populated_and_nonzero() {
        let mmap = mem_with(4096);
        let gm = GuestMemory::new(&mmap, 4096);
        let devices = empty_devices();

        gm.write_struct(GuestAddr(0), WalltimeArgs { nsecs: 0 }).unwrap();
        let outcome = dispatch(Call::Walltime, 0, &gm, &devices).unwrap();
        assert!(matches!(outcome, Outcome::Continue));
        let args: WalltimeArgs = gm.read_struct(GuestAddr(0)).unwrap();
        assert!(args.nsecs > 0);
    }

    #[test]
    fn halt_call_returns_status_and_cookie() {
        let mmap = mem_with(4096);
        let gm = GuestMemory::new(&mmap, 4096);
        let devices = empty_devices();

        gm.write_struct(
            GuestAddr(0),
            HaltArgs {
                exit_status: 255,
                cookie: 0x2000,
            },
        )
        .unwrap();
        let outcome = dispatch(Call::Halt, 0, &gm, &devices).unwrap();
        match outcome {
            Outcome::Halt { status, cookie } => {
                assert_eq!(status, 255);
                assert_eq!(cookie, Some(0x2000));
            }
            Outcome::Continue => panic!("expected halt"),
        }
    }

    #[test]
    fn unattached_block_handle_is_einval() {
        let mmap = mem_with(4096);
        let gm = GuestMemory::new(&mmap, 4096);
        let devices = empty_devices();

        gm.write_struct(
            GuestAddr(0),
            BlockArgs {
                handle: 0,
                offset: 0,
                data: 0,
                len: 0,
                ret: 0,
            },
        )
        .unwrap();
        dispatch(Call::BlockRead, 0, &gm, &devices).unwrap();
        let args: BlockArgs = gm.read_struct(GuestAddr(0)).unwrap();
        assert_eq!(args.ret, ResultCode::Einval as i32);
    }
}
