//! Guest-physical-address translation. A guest pointer is never
//! dereferenced directly: [`GuestAddr`] is an opaque newtype, and the
//! only way to get a host slice out of it is [`GuestMemory::slice`]/
//! [`GuestMemory::slice_mut`], which bounds-check the offset and
//! length against the mapped region before handing back a reference
//! rather than exposing a raw pointer into guest memory.

use thiserror::Error as ThisError;
use vm_memory::{Bytes, GuestAddress, GuestMemoryBackend, GuestMemoryMmap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestAddr(pub u64);

#[derive(ThisError, Debug)]
pub enum MemoryError {
    #[error("guest pointer {addr:#x} + {len} overflows or lies outside the {mem_size:#x}-byte guest memory")]
    OutOfBounds { addr: u64, len: usize, mem_size: u64 },

    #[error("guest memory error: {0}")]
    GuestMemory(#[from] vm_memory::GuestMemoryError),
}

pub struct GuestMemory<'a> {
    mmap: &'a GuestMemoryMmap<()>,
    size: u64,
}

impl<'a> GuestMemory<'a> {
    pub fn new(mmap: &'a GuestMemoryMmap<()>, size: u64) -> Self {
        Self { mmap, size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn host_ptr(&self, addr: GuestAddr, len: usize) -> Result<*mut u8, MemoryError> {
        let end = addr
            .0
            .checked_add(len as u64)
            .filter(|&end| end <= self.size)
            .ok_or(MemoryError::OutOfBounds {
                addr: addr.0,
                len,
                mem_size: self.size,
            })?;
        let _ = end;
        Ok(self
            .mmap
            .get_host_address(GuestAddress(addr.0))
            .map_err(MemoryError::GuestMemory)?)
    }

    /// Bounds-checked read-only view of `len` bytes starting at `addr`.
    pub fn slice(&self, addr: GuestAddr, len: usize) -> Result<&'a [u8], MemoryError> {
        let ptr = self.host_ptr(addr, len)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Bounds-checked mutable view of `len` bytes starting at `addr`.
    pub fn slice_mut(&self, addr: GuestAddr, len: usize) -> Result<&'a mut [u8], MemoryError> {
        let ptr = self.host_ptr(addr, len)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    pub fn write(&self, addr: GuestAddr, data: &[u8]) -> Result<(), MemoryError> {
        self.mmap
            .write_slice(data, GuestAddress(addr.0))
            .map_err(MemoryError::GuestMemory)
    }

    pub fn read(&self, addr: GuestAddr, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.mmap
            .read_slice(buf, GuestAddress(addr.0))
            .map_err(MemoryError::GuestMemory)
    }

    /// Bounds-checked copy of a `repr(C)` value out of guest memory.
    /// Uses an unaligned read since a guest physical address carries
    /// no alignment guarantee — all hypercall pointer arguments are
    /// guest physical addresses, not host pointers.
    pub fn read_struct<T: Copy>(&self, addr: GuestAddr) -> Result<T, MemoryError> {
        let ptr = self.host_ptr(addr, std::mem::size_of::<T>())?;
        Ok(unsafe { ptr.cast::<T>().read_unaligned() })
    }

    /// Bounds-checked write of a `repr(C)` value into guest memory.
    pub fn write_struct<T: Copy>(&self, addr: GuestAddr, value: T) -> Result<(), MemoryError> {
        let ptr = self.host_ptr(addr, std::mem::size_of::<T>())?;
        unsafe { ptr.cast::<T>().write_unaligned(value) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(size: u64) -> GuestMemoryMmap<()> {
        GuestMemoryMmap::from_ranges(&[(GuestAddress(0), size as usize)]).unwrap()
    }

    #[test]
    fn in_bounds_slice_succeeds() {
        let m = mem(4096);
        let gm = GuestMemory::new(&m, 4096);
        assert!(gm.slice(GuestAddr(0), 4096).is_ok());
    }

    #[test]
    fn exactly_at_bound_succeeds() {
        let m = mem(4096);
        let gm = GuestMemory::new(&m, 4096);
        assert!(gm.slice(GuestAddr(4095), 1).is_ok());
    }

    #[test]
    fn past_bound_fails() {
        let m = mem(4096);
        let gm = GuestMemory::new(&m, 4096);
        assert!(gm.slice(GuestAddr(4096), 1).is_err());
        assert!(gm.slice(GuestAddr(4000), 97).is_err());
    }

    #[test]
    fn overflowing_addition_fails() {
        let m = mem(4096);
        let gm = GuestMemory::new(&m, 4096);
        assert!(gm.slice(GuestAddr(u64::MAX - 1), 8).is_err());
    }
}
