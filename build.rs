use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// Generates a linker script placing the demo guest's image at
/// `guest::memory::layout::GUEST_MIN_BASE`, identity-mapped (physical
/// == virtual, matching `cpu::x86_64`'s page tables), with `.tdata`/
/// `.tbss` sized for `guest::tls`'s Variant II layout and an explicit
/// `PT_NOTE` segment so `.note.solo5` (see `guest/src/note.rs`) is
/// visible to `elf::load`'s `PT_NOTE` walk.
fn gen_linker_script(linker_script_path: &PathBuf) {
    let linker_script_content = format!(
        r#"
ENTRY(_start)

PHDRS
{{
    interp PT_INTERP FLAGS(4);
    note PT_NOTE FLAGS(4);
    text PT_LOAD FLAGS(5);
    data PT_LOAD FLAGS(6);
}}

SECTIONS
{{
    . = {base:#x};

    .interp : {{ *(.interp) }} :interp :text
    .note.solo5 : {{ *(.note.solo5) }} :note

    .text : ALIGN(4K) {{ *(.text .text.*) }} :text
    .rodata : ALIGN(4K) {{ *(.rodata .rodata.*) }} :text

    .data : ALIGN(4K) {{ *(.data .data.*) }} :data
    .tdata : ALIGN(16)
    {{
        __tdata_start = .;
        *(.tdata .tdata.*)
        __tdata_end = .;
    }} :data
    .tbss (NOLOAD) : ALIGN(16)
    {{
        __tbss_start = .;
        *(.tbss .tbss.*)
    }} :data
    .bss : ALIGN(4K) {{ *(.bss .bss.*) *(COMMON) }} :data
}}

__tdata_size = __tdata_end - __tdata_start;
__tbss_size = SIZEOF(.tbss);
__tls_align = 16;
"#,
        base = guest::memory::layout::GUEST_MIN_BASE,
    );

    let mut f = File::create(linker_script_path).unwrap();
    f.write_all(linker_script_content.as_bytes()).unwrap();
}

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let linker_script_path = out_dir.join("guest.ld");
    let guest_target_dir = out_dir.join("guest-target");

    gen_linker_script(&linker_script_path);

    let rustflags = format!(
        "-C link-arg=-T{} -C relocation-model=static",
        linker_script_path.display()
    );

    let status = Command::new("cargo")
        .env("RUSTFLAGS", rustflags)
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .env_remove("CARGO_ENCODED_RUSTFLAGS")
        .args([
            "build",
            "--release",
            "--package",
            "guest",
            "--bin",
            "guest",
            "--target",
            "x86_64-unknown-none",
            "--target-dir",
            guest_target_dir.to_str().unwrap(),
        ])
        .status()
        .expect("failed to run cargo build for the guest demo kernel");

    if !status.success() {
        panic!("compiling the guest demo kernel failed");
    }

    let elf_path = guest_target_dir.join("x86_64-unknown-none/release/guest");
    println!("cargo:rustc-env=KERNEL_BIN={}", elf_path.display());

    println!("cargo:rerun-if-changed=guest/src");
    println!("cargo:rerun-if-changed=guest-tests/src");
    println!("cargo:rerun-if-changed=guest-tests-macros/src");
}
