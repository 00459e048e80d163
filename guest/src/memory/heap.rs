//! A small slab-style allocator over the single flat heap region the
//! bootstrap publishes. Sized classes are powers of two, same idea as
//! a general-purpose kernel allocator, but with a single page-less
//! backing region instead of a separate physical page allocator: a
//! unikernel's heap is one `(heap_start, heap_size)` pair handed over
//! once at boot, not a sparse physical address space.

use core::mem::size_of;
use core::ptr::NonNull;

use super::errors::{MemoryError, Result};
use super::layout::HeapRegion;

const MIN_SHIFT: u32 = 5; // 32 bytes
const MAX_SHIFT: u32 = 24; // 16 MiB
const CLASS_COUNT: usize = (MAX_SHIFT - MIN_SHIFT + 1) as usize;
const MIN_ALLOC_SIZE: usize = 1 << MIN_SHIFT;
const MAX_ALLOC_SIZE: usize = 1 << MAX_SHIFT;

struct Inner {
    base: usize,
    limit: usize,
    next: usize,
    free_heads: [usize; CLASS_COUNT],
}

impl Inner {
    const fn uninit() -> Self {
        Self {
            base: 0,
            limit: 0,
            next: 0,
            free_heads: [0; CLASS_COUNT],
        }
    }

    fn init(&mut self, region: HeapRegion) -> Result<()> {
        if self.base != 0 {
            return Err(MemoryError::AlreadyInitialized);
        }
        self.base = region.start as usize;
        self.next = region.start as usize;
        self.limit = (region.start + region.size) as usize;
        Ok(())
    }

    fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        if self.base == 0 {
            return Err(MemoryError::NotInitialized);
        }
        let class = size_to_class(size)?;
        let idx = class_index(class);

        let head = self.free_heads[idx];
        if head != 0 {
            let next = unsafe { *(head as *const usize) };
            self.free_heads[idx] = next;
            return Ok(unsafe { NonNull::new_unchecked(head as *mut u8) });
        }

        let aligned = align_up(self.next, class.min(size_of::<usize>().max(8)));
        let end = aligned.checked_add(class).ok_or(MemoryError::OutOfMemory)?;
        if end > self.limit {
            return Err(MemoryError::OutOfMemory);
        }
        self.next = end;
        Ok(unsafe { NonNull::new_unchecked(aligned as *mut u8) })
    }

    fn free(&mut self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let class = size_to_class(size)?;
        let idx = class_index(class);
        let addr = ptr.as_ptr() as usize;
        if addr < self.base || addr >= self.limit {
            return Err(MemoryError::UnknownAllocation { addr });
        }
        unsafe {
            *(addr as *mut usize) = self.free_heads[idx];
        }
        self.free_heads[idx] = addr;
        Ok(())
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

fn class_index(class_size: usize) -> usize {
    (class_size.trailing_zeros() - MIN_SHIFT) as usize
}

fn size_to_class(size: usize) -> Result<usize> {
    let requested = size.max(MIN_ALLOC_SIZE);
    if requested > MAX_ALLOC_SIZE {
        return Err(MemoryError::AllocationTooLarge {
            requested,
            max: MAX_ALLOC_SIZE,
        });
    }
    let mut class_size = MIN_ALLOC_SIZE;
    while class_size < requested {
        class_size <<= 1;
    }
    Ok(class_size)
}

pub struct Heap(spin::Mutex<Inner>);

impl Heap {
    pub const fn uninit() -> Self {
        Self(spin::Mutex::new(Inner::uninit()))
    }

    pub fn init(&self, region: HeapRegion) -> Result<()> {
        self.0.lock().init(region)
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        self.0.lock().alloc(size)
    }

    pub fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        self.0.lock().free(ptr, size)
    }
}

unsafe impl Sync for Heap {}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(size: u64) -> HeapRegion {
        // A real heap pointer so the bump/free pointer arithmetic is valid
        // under Miri-less `#[test]` (these run on the host, not no_std).
        let backing = vec![0u8; size as usize].leak();
        HeapRegion {
            start: backing.as_ptr() as u64,
            size,
        }
    }

    #[test]
    fn class_rounding_works() {
        assert_eq!(size_to_class(1).unwrap(), MIN_ALLOC_SIZE);
        assert_eq!(size_to_class(MIN_ALLOC_SIZE).unwrap(), MIN_ALLOC_SIZE);
        assert_eq!(size_to_class(MIN_ALLOC_SIZE + 1).unwrap(), MIN_ALLOC_SIZE * 2);
        assert!(size_to_class(MAX_ALLOC_SIZE + 1).is_err());
    }

    #[test]
    fn alloc_then_free_is_reused() {
        let heap = Heap::uninit();
        heap.init(region(1 << 20)).unwrap();

        let a = heap.alloc(64).unwrap();
        heap.free(a, 64).unwrap();
        let b = heap.alloc(64).unwrap();
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn distinct_live_allocations_do_not_overlap() {
        let heap = Heap::uninit();
        heap.init(region(1 << 20)).unwrap();

        let a = heap.alloc(128).unwrap();
        let b = heap.alloc(128).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn exhausting_the_region_reports_out_of_memory() {
        let heap = Heap::uninit();
        heap.init(region(64)).unwrap();

        heap.alloc(32).unwrap();
        assert!(matches!(heap.alloc(64), Err(MemoryError::OutOfMemory)));
    }

    #[test]
    fn double_init_is_rejected() {
        let heap = Heap::uninit();
        heap.init(region(64)).unwrap();
        assert!(matches!(
            heap.init(region(64)),
            Err(MemoryError::AlreadyInitialized)
        ));
    }
}
