//! Core-dump module (optional). On the halt hook, if the exit
//! status indicates abort and a cookie pointer was supplied, writes an
//! ELF core file containing the whole of guest memory plus the
//! trap-frame the cookie points at, as a single `PT_NOTE`.
//!
//! This is not a Linux `NT_PRSTATUS`-compatible core (there is no
//! POSIX process behind a Solo5 guest, per the Non-goals); it is a
//! minimal, self-describing ELF core a debugger can still open to
//! inspect guest memory and dump the raw trap frame bytes.

use std::fs::File;
use std::io::{self, Write};

use crate::memory::GuestMemory;

const ET_CORE: u16 = 4;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const NOTE_NAME: &[u8] = b"Solo5\0\0\0"; // padded to a 4-byte multiple

/// Writes `path` as an ELF core file: one `PT_NOTE` carrying
/// `trap_frame` verbatim, followed by one `PT_LOAD` mapping all of
/// guest memory at its guest-physical address.
pub fn write_core(path: &std::path::Path, mem: &GuestMemory, trap_frame: &[u8]) -> io::Result<()> {
    let mem_size = mem.size();
    let guest_bytes = mem.slice(crate::memory::GuestAddr(0), mem_size as usize).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })?;

    let note_desc_len = trap_frame.len();
    let note_header_len = 12 + NOTE_NAME.len() + align4(note_desc_len);
    let ehdr_size = 64u64;
    let phdr_size = 56u64;
    let phnum = 2u64;
    let note_offset = ehdr_size + phdr_size * phnum;
    let load_offset = note_offset + note_header_len as u64;

    let mut out = Vec::with_capacity((load_offset + mem_size) as usize);

    // ELF header
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]); // padding
    out.extend_from_slice(&ET_CORE.to_le_bytes());
    out.extend_from_slice(&EM_X86_64.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&ehdr_size.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(ehdr_size as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(phdr_size as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&(phnum as u16).to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len() as u64, ehdr_size);

    write_phdr(&mut out, PT_NOTE, note_offset, 0, note_header_len as u64, 0, 4);
    write_phdr(&mut out, PT_LOAD, load_offset, 0, mem_size, mem_size, 0x1000);
    debug_assert_eq!(out.len() as u64, note_offset);

    write_note(&mut out, trap_frame);
    debug_assert_eq!(out.len() as u64, load_offset);

    out.extend_from_slice(guest_bytes);

    let mut file = File::create(path)?;
    file.write_all(&out)
}

fn write_phdr(out: &mut Vec<u8>, p_type: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64) {
    out.extend_from_slice(&p_type.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // p_flags
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&filesz.to_le_bytes());
    out.extend_from_slice(&memsz.to_le_bytes());
    out.extend_from_slice(&align.to_le_bytes());
}

fn write_note(out: &mut Vec<u8>, desc: &[u8]) {
    out.extend_from_slice(&(NOTE_NAME.len() as u32).to_le_bytes());
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // n_type: trap-frame
    out.extend_from_slice(NOTE_NAME);
    out.extend_from_slice(desc);
    let pad = align4(desc.len()) - desc.len();
    out.extend(std::iter::repeat(0u8).take(pad));
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_memory::{GuestAddress, GuestMemoryMmap};

    #[test]
    fn writes_a_parseable_core_file() {
        let mmap: GuestMemoryMmap<()> = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 4096)]).unwrap();
        let mem = GuestMemory::new(&mmap, 4096);
        let path = std::env::temp_dir().join(format!("hvt-core-test-{}", std::process::id()));

        write_core(&path, &mem, &[1, 2, 3, 4]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(&bytes[0..4], b"\x7fELF");
        assert_eq!(u16::from_le_bytes(bytes[16..18].try_into().unwrap()), ET_CORE);
    }
}
