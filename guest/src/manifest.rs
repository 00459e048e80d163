//! Guest-side manifest lookup. The tender validates the manifest at
//! load time (see the tender's own `manifest` module) and leaves it
//! in guest memory at the address `BootInfo::mft` points to; the
//! bindings only ever read it, via `net_acquire`/`block_acquire`. The
//! wire layout here must stay byte-identical to the tender's
//! `manifest::Manifest`/`ManifestEntry` — both sides mirror the same
//! ABI the way the upstream project shares one `mft_abi.h`.

use core::ffi::CStr;

pub const NAME_SIZE: usize = 32;
pub const MAX_ENTRIES: usize = 64;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    BlockBasic = 0,
    NetBasic = 1,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockBasic {
    pub capacity: u64,
    pub block_size: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NetBasic {
    pub mac: [u8; 6],
    pub mtu: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union Union {
    pub block_basic: BlockBasic,
    pub net_basic: NetBasic,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Entry {
    pub name: [u8; NAME_SIZE],
    pub kind: Kind,
    pub u: Union,
    pub hostfd: i32,
    pub ok: bool,
}

impl Entry {
    pub fn name(&self) -> &str {
        CStr::from_bytes_until_nul(&self.name)
            .ok()
            .and_then(|s| s.to_str().ok())
            .unwrap_or("")
    }
}

#[repr(C)]
pub struct Header {
    pub version: u32,
    pub entries: u32,
}

/// A read-only view over the manifest the tender published.
pub struct Manifest {
    header: &'static Header,
    entries: &'static [Entry],
}

impl Manifest {
    /// # Safety
    /// `addr` must point to a manifest the tender has already
    /// validated, with `Header::entries` matching the length of the
    /// `Entry` array immediately following it.
    pub unsafe fn from_raw(addr: u64) -> Self {
        unsafe {
            let header = &*(addr as *const Header);
            let entries_ptr = (addr as *const Header).add(1) as *const Entry;
            let entries = core::slice::from_raw_parts(entries_ptr, header.entries as usize);
            Self { header, entries }
        }
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn find_by_name(&self, name: &str, kind: Kind) -> Option<(u64, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.kind == kind && e.name() == name)
            .map(|(i, e)| (i as u64, e))
    }

    pub fn find_by_index(&self, index: u64, kind: Kind) -> Option<&Entry> {
        let entry = self.entries.get(index as usize)?;
        (entry.kind == kind).then_some(entry)
    }
}
