//! `net_acquire`/`block_acquire`: look up a manifest entry by name and
//! kind, and hand back a small integer handle plus its device info.
//! The manifest pointer is published once by [`crate::boot::start`];
//! lookups after that are pure reads over `'static` guest memory the
//! tender already validated.

use spin::Once;

use crate::hypercall::{self, ResultCode};
use crate::manifest::{Kind, Manifest};

static MANIFEST: Once<Manifest> = Once::new();

/// # Safety
/// `addr` must be the `mft` field of the tender's `BootInfo`, already
/// validated by the tender before first VCPU entry.
pub(crate) unsafe fn init(addr: u64) {
    MANIFEST.call_once(|| unsafe { Manifest::from_raw(addr) });
}

fn manifest() -> Option<&'static Manifest> {
    MANIFEST.get()
}

#[derive(Clone, Copy, Debug)]
pub struct NetInfo {
    pub mac: [u8; 6],
    pub mtu: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct BlockInfo {
    pub capacity: u64,
    pub block_size: u16,
}

pub fn net_acquire(name: &str) -> Result<(u64, NetInfo), ResultCode> {
    let (handle, entry) = manifest()
        .and_then(|m| m.find_by_name(name, Kind::NetBasic))
        .filter(|(_, e)| e.ok)
        .ok_or(ResultCode::Einval)?;
    let net = unsafe { entry.u.net_basic };
    Ok((handle, NetInfo { mac: net.mac, mtu: net.mtu }))
}

pub fn block_acquire(name: &str) -> Result<(u64, BlockInfo), ResultCode> {
    let (handle, entry) = manifest()
        .and_then(|m| m.find_by_name(name, Kind::BlockBasic))
        .filter(|(_, e)| e.ok)
        .ok_or(ResultCode::Einval)?;
    let block = unsafe { entry.u.block_basic };
    Ok((
        handle,
        BlockInfo {
            capacity: block.capacity,
            block_size: block.block_size,
        },
    ))
}

pub fn net_write(handle: u64, buf: &[u8]) -> ResultCode {
    hypercall::net_write(handle, buf)
}

pub fn net_read(handle: u64, buf: &mut [u8]) -> (ResultCode, usize) {
    hypercall::net_read(handle, buf)
}

pub fn block_write(handle: u64, offset: u64, buf: &[u8]) -> ResultCode {
    hypercall::block_write(handle, offset, buf)
}

pub fn block_read(handle: u64, offset: u64, buf: &mut [u8]) -> ResultCode {
    hypercall::block_read(handle, offset, buf)
}
