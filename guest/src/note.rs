//! Embeds this demo guest's own `Solo5/ABI1` and `Solo5/MFT1` ELF
//! notes directly in the binary, standing in for the out-of-scope
//! `mfttool` JSON-to-note compiler real Solo5 guests link against:
//! a fixed byte blob declaring the two manifest devices
//! (`device::BLOCK_NAME`/`NET_NAME` on the tender side) is enough for
//! a self-contained test fixture. Layout matches `elf::{NOTE_NAME,
//! MFT_NOTE_TYPE, ABI_NOTE_TYPE, ABI_VERSION}` and `manifest::{
//! NAME_SIZE, ENTRY_STRIDE}` on the tender side (kept in sync by hand,
//! same as every other half of this ABI).

const NOTE_NAME: [u8; 8] = *b"Solo5\0\0\0"; // "Solo5\0" padded to a 4-byte boundary
const ABI_NOTE_TYPE: u32 = 2;
const MFT_NOTE_TYPE: u32 = 1;

const ABI_TARGET: u32 = 1; // arbitrary "hvt" target id; only abi_version is checked
const ABI_VERSION: u32 = 1;

const MFT_VERSION: u32 = 1;
const MFT_ENTRY_COUNT: u32 = 2;
const NAME_SIZE: usize = 32;
const ENTRY_STRIDE: usize = 56;

const fn name_field(name: &[u8]) -> [u8; NAME_SIZE] {
    let mut out = [0u8; NAME_SIZE];
    let mut i = 0;
    while i < name.len() {
        out[i] = name[i];
        i += 1;
    }
    out
}

const fn entry_record(name: &[u8], kind: u32) -> [u8; ENTRY_STRIDE] {
    let mut out = [0u8; ENTRY_STRIDE];
    let name_field = name_field(name);
    let mut i = 0;
    while i < NAME_SIZE {
        out[i] = name_field[i];
        i += 1;
    }
    let kind_bytes = kind.to_le_bytes();
    out[NAME_SIZE] = kind_bytes[0];
    out[NAME_SIZE + 1] = kind_bytes[1];
    out[NAME_SIZE + 2] = kind_bytes[2];
    out[NAME_SIZE + 3] = kind_bytes[3];
    // union (8 bytes: capacity/mac+mtu) and block_size (2 bytes) stay
    // zero; the tender overwrites them entirely at device attach.
    out
}

const BLOCK_ENTRY: [u8; ENTRY_STRIDE] = entry_record(b"block_basic", 0);
const NET_ENTRY: [u8; ENTRY_STRIDE] = entry_record(b"net_basic", 1);

const ABI_DESC_SIZE: usize = 16;
const MFT_DESC_SIZE: usize = 8 + 2 * ENTRY_STRIDE;

const ABI_NOTE_SIZE: usize = 4 + 4 + 4 + NOTE_NAME.len() + ABI_DESC_SIZE;
const MFT_NOTE_SIZE: usize = 4 + 4 + 4 + NOTE_NAME.len() + MFT_DESC_SIZE;
const TOTAL_SIZE: usize = ABI_NOTE_SIZE + MFT_NOTE_SIZE;

const fn build() -> [u8; TOTAL_SIZE] {
    let mut out = [0u8; TOTAL_SIZE];
    let mut pos = 0;

    // --- Solo5/ABI1 ---
    pos = write_u32(&mut out, pos, NOTE_NAME.len() as u32);
    pos = write_u32(&mut out, pos, ABI_DESC_SIZE as u32);
    pos = write_u32(&mut out, pos, ABI_NOTE_TYPE);
    pos = write_bytes(&mut out, pos, &NOTE_NAME);
    pos = write_u32(&mut out, pos, ABI_TARGET);
    pos = write_u32(&mut out, pos, ABI_VERSION);
    pos = write_u32(&mut out, pos, 0); // reserved0
    pos = write_u32(&mut out, pos, 0); // reserved1

    // --- Solo5/MFT1 ---
    pos = write_u32(&mut out, pos, NOTE_NAME.len() as u32);
    pos = write_u32(&mut out, pos, MFT_DESC_SIZE as u32);
    pos = write_u32(&mut out, pos, MFT_NOTE_TYPE);
    pos = write_bytes(&mut out, pos, &NOTE_NAME);
    pos = write_u32(&mut out, pos, MFT_VERSION);
    pos = write_u32(&mut out, pos, MFT_ENTRY_COUNT);
    pos = write_bytes(&mut out, pos, &BLOCK_ENTRY);
    pos = write_bytes(&mut out, pos, &NET_ENTRY);

    let _ = pos;
    out
}

const fn write_u32(out: &mut [u8; TOTAL_SIZE], pos: usize, value: u32) -> usize {
    write_bytes(out, pos, &value.to_le_bytes())
}

const fn write_bytes(out: &mut [u8; TOTAL_SIZE], pos: usize, data: &[u8]) -> usize {
    let mut i = 0;
    while i < data.len() {
        out[pos + i] = data[i];
        i += 1;
    }
    pos + data.len()
}

/// Placed in its own `.note.solo5` section; `build.rs`'s linker
/// script assigns that section a `PT_NOTE` program header so
/// `elf::load`'s `PT_NOTE` walk finds it.
#[used]
#[unsafe(link_section = ".note.solo5")]
static NOTES: [u8; TOTAL_SIZE] = build();

/// Forces the static above to be referenced so a smart linker doesn't
/// garbage-collect an otherwise never-read section.
pub fn keep() {
    core::hint::black_box(&NOTES);
    core::hint::black_box(&INTERP);
}

/// `.interp` / `PT_INTERP` stub pointing at a path that cannot exist,
/// so a host OS that tries to exec this binary directly fails instead
/// of running it outside a tender. The trailing slash is intentional:
/// it still fails to resolve even if `/nonexistent/solo5` existed.
#[used]
#[unsafe(link_section = ".interp")]
static INTERP: [u8; 20] = *b"/nonexistent/solo5/\0";
