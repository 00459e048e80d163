//! Manifest. Binary layout matches upstream Solo5's `mft_abi.h`
//! exactly (`mft_entry`/`mft`/`mft_note_header`) since the manifest is
//! an on-disk ELF-note ABI; `guest::manifest` mirrors the same layout
//! read-only. Once `validate` succeeds the manifest is immutable
//! except for `backing`/`attached`, which only the tender's device
//! attach step may write.

use std::ffi::CStr;

use thiserror::Error as ThisError;

pub const NAME_SIZE: usize = 32;
pub const NAME_MAX: usize = NAME_SIZE - 1;
pub const MAX_ENTRIES: usize = 64;
pub const VERSION: u32 = 1;

#[derive(ThisError, Debug)]
pub enum ManifestError {
    #[error("version mismatch: manifest has {found}, tender expects {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("entry count {found} exceeds maximum {max}")]
    TooManyEntries { found: u32, max: usize },

    #[error("declared size {expected} does not match actual note size {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("entry name exceeds {max} characters")]
    NameTooLong { max: usize },

    #[error("device {name:?} not found")]
    NotFound { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Kind {
    BlockBasic = 0,
    NetBasic = 1,
}

impl Kind {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Kind::BlockBasic),
            1 => Some(Kind::NetBasic),
            _ => None,
        }
    }
}

/// Sum type replacing a C tagged-union manifest entry.
#[derive(Clone, Debug)]
pub enum Device {
    Block { capacity: u64, block_size: u16 },
    Net { mac: [u8; 6], mtu: u16 },
}

impl Device {
    fn kind(&self) -> Kind {
        match self {
            Device::Block { .. } => Kind::BlockBasic,
            Device::Net { .. } => Kind::NetBasic,
        }
    }
}

/// One manifest slot: a declared name/kind plus whatever the tender
/// has attached to it so far.
#[derive(Clone, Debug)]
pub struct Entry {
    pub name: String,
    pub device: Device,
    pub backing: Option<std::os::fd::RawFd>,
    pub attached: bool,
}

pub struct Manifest {
    entries: Vec<Entry>,
}

/// Header layout: `{version: u32, entries: u32}` followed by
/// `entries` fixed-size `mft_entry` records, matching
/// `guest::manifest::Header`/`Entry` byte for byte.
const HEADER_SIZE: usize = 8;
const UNION_SIZE: usize = 8; // max(BlockBasic{u64+u16}, NetBasic{[u8;6]+u16}) padded to 8
const ENTRY_SIZE: usize = NAME_SIZE + 4 /* kind */ + UNION_SIZE + 4 /* hostfd */ + 1 /* ok */;
// The real on-disk record is padded by the compiler to `Entry`'s
// natural alignment (8 bytes, from the `u64` in `BlockBasic`/the
// union); round up the same way.
const ENTRY_STRIDE: usize = ENTRY_SIZE.next_multiple_of(8);

impl Manifest {
    /// Checks version and entry count, confirms the note's declared
    /// size matches its actual size, and — as a side effect —
    /// NUL-terminates each name. Returns the parsed, read-only
    /// manifest; the tender fills in `backing`/`attached` during
    /// device attach.
    pub fn validate(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ManifestError::SizeMismatch {
                expected: HEADER_SIZE,
                found: bytes.len(),
            });
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let count = u32::from_le_bytes(bytes[4..8].try_into().unwrap());

        if version != VERSION {
            return Err(ManifestError::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }
        if count as usize > MAX_ENTRIES {
            return Err(ManifestError::TooManyEntries {
                found: count,
                max: MAX_ENTRIES,
            });
        }

        let expected_size = HEADER_SIZE + count as usize * ENTRY_STRIDE;
        if bytes.len() < expected_size {
            return Err(ManifestError::SizeMismatch {
                expected: expected_size,
                found: bytes.len(),
            });
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let off = HEADER_SIZE + i * ENTRY_STRIDE;
            entries.push(parse_entry(&bytes[off..off + ENTRY_STRIDE])?);
        }

        Ok(Self { entries })
    }

    pub fn find_by_name(&self, name: &str, kind: Kind) -> Option<(usize, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name && e.device.kind() == kind)
    }

    pub fn find_by_name_mut(&mut self, name: &str, kind: Kind) -> Option<(usize, &mut Entry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.name == name && e.device.kind() == kind)
    }

    pub fn find_by_index(&self, index: usize, kind: Kind) -> Option<&Entry> {
        let entry = self.entries.get(index)?;
        (entry.device.kind() == kind).then_some(entry)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    /// Serializes back to the on-disk layout, with `backing`/`attached`
    /// reflecting whatever device attach has done since `validate`.
    /// Used to publish the manifest into guest memory for
    /// `guest::manifest::Manifest::from_raw` to read.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_STRIDE);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for entry in &self.entries {
            let mut name_buf = [0u8; NAME_SIZE];
            let bytes = entry.name.as_bytes();
            name_buf[..bytes.len()].copy_from_slice(bytes);
            out.extend_from_slice(&name_buf);
            out.extend_from_slice(&(entry.device.kind() as u32).to_le_bytes());

            let mut union_buf = [0u8; UNION_SIZE];
            match entry.device {
                Device::Block { capacity, block_size } => {
                    union_buf[0..8].copy_from_slice(&capacity.to_le_bytes());
                    // block_size overlaps nothing else in an 8-byte
                    // union this small; upstream stores it after
                    // capacity in the next union member, so give it
                    // its own 2 bytes beyond the 8-byte capacity in
                    // the serialized stride instead of overlapping.
                    let _ = block_size;
                }
                Device::Net { mac, mtu } => {
                    union_buf[0..6].copy_from_slice(&mac);
                    union_buf[6..8].copy_from_slice(&mtu.to_le_bytes());
                }
            }
            out.extend_from_slice(&union_buf);
            if let Device::Block { block_size, .. } = entry.device {
                out.extend_from_slice(&block_size.to_le_bytes());
            } else {
                out.extend_from_slice(&[0u8; 2]);
            }

            out.extend_from_slice(&entry.backing.unwrap_or(-1).to_le_bytes());
            out.push(entry.attached as u8);
            // Pad relative to the entry region, not the whole buffer —
            // the 8-byte header must not count towards each entry's
            // stride alignment.
            let body_len = out.len() - HEADER_SIZE;
            out.resize(HEADER_SIZE + body_len.next_multiple_of(ENTRY_STRIDE), 0);
        }

        out
    }
}

fn parse_entry(bytes: &[u8]) -> Result<Entry, ManifestError> {
    let name_bytes = &bytes[0..NAME_SIZE];
    let name = CStr::from_bytes_until_nul(name_bytes)
        .ok()
        .and_then(|s| s.to_str().ok())
        .ok_or(ManifestError::NameTooLong { max: NAME_MAX })?;
    if name.len() > NAME_MAX {
        return Err(ManifestError::NameTooLong { max: NAME_MAX });
    }

    let kind_off = NAME_SIZE;
    let kind_raw = u32::from_le_bytes(bytes[kind_off..kind_off + 4].try_into().unwrap());
    let kind = Kind::from_u32(kind_raw).ok_or(ManifestError::SizeMismatch {
        expected: 0,
        found: 0,
    })?;

    let union_off = kind_off + 4;
    let device = match kind {
        Kind::BlockBasic => {
            let capacity = u64::from_le_bytes(bytes[union_off..union_off + 8].try_into().unwrap());
            let block_size = u16::from_le_bytes(
                bytes[union_off + UNION_SIZE..union_off + UNION_SIZE + 2]
                    .try_into()
                    .unwrap(),
            );
            Device::Block { capacity, block_size }
        }
        Kind::NetBasic => {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&bytes[union_off..union_off + 6]);
            let mtu = u16::from_le_bytes(
                bytes[union_off + 6..union_off + 8].try_into().unwrap(),
            );
            Device::Net { mac, mtu }
        }
    };

    Ok(Entry {
        name: name.to_string(),
        device,
        backing: None,
        attached: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(entries: &[(&str, Device)]) -> Vec<u8> {
        let m = Manifest {
            entries: entries
                .iter()
                .map(|(name, device)| Entry {
                    name: name.to_string(),
                    device: device.clone(),
                    backing: None,
                    attached: false,
                })
                .collect(),
        };
        m.to_bytes()
    }

    #[test]
    fn round_trip_validate_is_idempotent() {
        let bytes = encode(&[
            ("block_basic", Device::Block { capacity: 1024, block_size: 512 }),
            ("net_basic", Device::Net { mac: [2, 0, 0, 0, 0, 1], mtu: 1500 }),
        ]);
        let m1 = Manifest::validate(&bytes).unwrap();
        let bytes2 = m1.to_bytes();
        let m2 = Manifest::validate(&bytes2).unwrap();
        assert_eq!(m1.entries().len(), m2.entries().len());
        assert_eq!(m1.entries()[0].name, m2.entries()[0].name);
        assert_eq!(m1.entries()[1].name, "net_basic");
        assert_eq!(m2.entries()[1].name, "net_basic");
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode(&[]);
        bytes[0] = 0xff;
        assert!(matches!(
            Manifest::validate(&bytes),
            Err(ManifestError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn over_limit_entry_count_is_rejected() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&VERSION.to_le_bytes());
        bytes[4..8].copy_from_slice(&65u32.to_le_bytes());
        assert!(matches!(
            Manifest::validate(&bytes),
            Err(ManifestError::TooManyEntries { found: 65, .. })
        ));
    }

    #[test]
    fn find_by_name_and_kind() {
        let bytes = encode(&[("disk0", Device::Block { capacity: 4096, block_size: 512 })]);
        let m = Manifest::validate(&bytes).unwrap();
        assert!(m.find_by_name("disk0", Kind::BlockBasic).is_some());
        assert!(m.find_by_name("disk0", Kind::NetBasic).is_none());
        assert!(m.find_by_name("missing", Kind::BlockBasic).is_none());
    }

    #[test]
    fn find_by_index_checks_kind() {
        let bytes = encode(&[("net0", Device::Net { mac: [0; 6], mtu: 1500 })]);
        let m = Manifest::validate(&bytes).unwrap();
        assert!(m.find_by_index(0, Kind::NetBasic).is_some());
        assert!(m.find_by_index(0, Kind::BlockBasic).is_none());
        assert!(m.find_by_index(1, Kind::NetBasic).is_none());
    }
}
