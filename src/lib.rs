//! `hvt`: a Solo5 `hvt` tender. Loads a Solo5 guest ELF, validates its
//! embedded manifest, attaches the requested block/net devices, brings
//! up a single KVM VCPU in 64-bit long mode at the guest's entry
//! point, and drains `KVM_RUN` exits until the guest halts.
//!
//! `run` is the library's one entry point; `main.rs` only parses
//! `cli::Cli` and maps the result to a process exit code.

pub mod abi;
pub mod cli;
pub mod cpu;
pub mod device;
pub mod elf;
pub mod error;
pub mod gdb;
pub mod hypercall;
pub mod layout;
pub mod manifest;
pub mod memory;
pub mod vcpu;

use vm_memory::{GuestAddress, GuestMemoryBackend, GuestMemoryMmap};

use crate::error::TenderError;
use crate::memory::{GuestAddr, GuestMemory};

/// Runs `cli.kernel` to completion and returns its (or the tender's
/// own halt-handling) exit status.
pub fn run(cli: &cli::Cli) -> Result<i32, TenderError> {
    let mem_size = cli.mem_bytes()?;

    let kvm = kvm_ioctls::Kvm::new()?;
    let vm = kvm.create_vm()?;

    let mmap = GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), mem_size as usize)])
        .map_err(|e| TenderError::InvalidArgument("mem", e.to_string()))?;

    let vcpu_fd = vm.create_vcpu(0)?;
    cpu::Setup::build(&vm, &vcpu_fd, &mmap, mem_size)?;

    let mem = GuestMemory::new(&mmap, mem_size);

    let data = std::fs::read(&cli.kernel)?;
    let loaded = elf::load(&data, &mem)?;

    let manifest = manifest::Manifest::validate(&loaded.manifest_note)?;
    let devices = device::Devices::attach(
        manifest,
        cli.opts.disk.as_deref(),
        cli.opts.net.as_deref(),
    )?;

    mem.write(GuestAddr(layout::MFT_BASE), &devices.manifest_bytes())?;

    let boot_info = abi::BootInfo {
        mem_size,
        kernel_end: loaded.end,
        cpu_cycle_freq: cpu::x86_64::calibrate_tsc_hz(),
        cmdline: cli.guest_cmdline(),
        mft: layout::MFT_BASE,
    };
    mem.write_struct(GuestAddr(layout::BOOT_INFO_BASE), boot_info)?;

    let mut regs = vcpu_fd.get_regs()?;
    regs.rip = loaded.entry;
    vcpu_fd.set_regs(&regs)?;

    let gdb_stub = match cli.opts.gdb {
        Some(port) => Some(gdb::Stub::attach(port, &vcpu_fd)?),
        None => None,
    };

    let mut vcpu = vcpu::Vcpu::new(vcpu_fd, mem, devices, cli.dumpcore_path(), gdb_stub);
    Ok(vcpu.run()?)
}
