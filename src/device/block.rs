//! Block device: a host file opened as a raw, fixed-geometry
//! block backend. `block_size` defaults to 512 bytes; capacity is
//! the file's current length rounded down to a whole number of
//! blocks.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, RawFd};

use thiserror::Error as ThisError;

pub const DEFAULT_BLOCK_SIZE: u16 = 512;

#[derive(ThisError, Debug)]
pub enum BlockError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("offset {offset} is not block-aligned or length {len} is not exactly the {block_size}-byte block size")]
    Misaligned {
        offset: u64,
        len: usize,
        block_size: u16,
    },

    #[error("request [{offset}, {end}) exceeds device capacity {capacity}")]
    OutOfRange { offset: u64, end: u64, capacity: u64 },
}

pub struct Block {
    file: File,
    capacity: u64,
    block_size: u16,
}

impl Block {
    /// Opens `path` read-write and reports its size rounded down to a
    /// whole number of `DEFAULT_BLOCK_SIZE` blocks.
    pub fn open(path: &std::path::Path) -> Result<Self, BlockError> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_size = DEFAULT_BLOCK_SIZE;
        let capacity = len - (len % block_size as u64);
        Ok(Self {
            file,
            capacity,
            block_size,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn check_bounds(&self, offset: u64, len: usize) -> Result<(), BlockError> {
        if offset % self.block_size as u64 != 0 || len != self.block_size as usize {
            return Err(BlockError::Misaligned {
                offset,
                len,
                block_size: self.block_size,
            });
        }
        let end = offset
            .checked_add(len as u64)
            .ok_or(BlockError::OutOfRange {
                offset,
                end: u64::MAX,
                capacity: self.capacity,
            })?;
        if end > self.capacity {
            return Err(BlockError::OutOfRange {
                offset,
                end,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Returns an error (mapped to `EINVAL` at the hypercall boundary)
    /// for any unaligned or out-of-range request rather than performing
    /// a partial I/O.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), BlockError> {
        self.check_bounds(offset, data.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_bounds(offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    struct TmpFile(std::path::PathBuf);

    impl Drop for TmpFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn tmp_file(name: &str, size: usize) -> TmpFile {
        let path = std::env::temp_dir().join(format!("hvt-block-test-{name}-{}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
        f.flush().unwrap();
        TmpFile(path)
    }

    #[test]
    fn round_trip_aligned_sector() {
        let f = tmp_file("roundtrip", 4096);
        let mut b = Block::open(&f.0).unwrap();
        let pattern = vec![0xAAu8; 512];
        b.write(512, &pattern).unwrap();
        let mut out = vec![0u8; 512];
        b.read(512, &mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        let f = tmp_file("misaligned-offset", 4096);
        let mut b = Block::open(&f.0).unwrap();
        assert!(matches!(
            b.write(100, &[0u8; 512]),
            Err(BlockError::Misaligned { .. })
        ));
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let f = tmp_file("misaligned-length", 4096);
        let mut b = Block::open(&f.0).unwrap();
        assert!(matches!(
            b.write(0, &[0u8; 100]),
            Err(BlockError::Misaligned { .. })
        ));
    }

    #[test]
    fn past_capacity_is_rejected() {
        let f = tmp_file("past-capacity", 4096);
        let mut b = Block::open(&f.0).unwrap();
        assert!(matches!(
            b.write(4096, &[0u8; 512]),
            Err(BlockError::OutOfRange { .. })
        ));
    }

    #[test]
    fn two_sectors_at_once_is_rejected() {
        let f = tmp_file("two-sectors", 4096);
        let mut b = Block::open(&f.0).unwrap();
        assert!(matches!(
            b.write(0, &[0u8; 1024]),
            Err(BlockError::Misaligned { .. })
        ));
    }
}
