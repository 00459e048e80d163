//! VCPU run loop. Drains `KVM_RUN` exits one at a time, routing PIO
//! exits to [`crate::hypercall::dispatch`] and running the halt hooks
//! (console flush, optional core dump) once the guest issues
//! `HVT_HYPERCALL_HALT`.
//!
//! x86_64-only: the aarch64 MMIO-based ABI in [`crate::abi`] is wired
//! for `Call::from_mmio_addr` but this loop only ever sees PIO exits.

use std::path::PathBuf;

use kvm_ioctls::{VcpuExit, VcpuFd};
use thiserror::Error as ThisError;

use crate::abi::Call;
use crate::device::Devices;
use crate::device::coredump;
use crate::gdb;
use crate::hypercall::{self, HypercallError, Outcome};
use crate::memory::GuestMemory;

/// `HVT_EXIT_ABORT`-equivalent: an exit status the guest's abort path
/// uses, distinct from a normal `solo5_exit`. Only this status
/// triggers a core dump.
pub const ABORT_STATUS: i32 = 255;

#[derive(ThisError, Debug)]
pub enum VcpuError {
    #[error("kvm: {0}")]
    Kvm(#[from] kvm_ioctls::Error),

    #[error("hypercall: {0}")]
    Hypercall(#[from] HypercallError),

    #[error("vcpu exited on an unhandled port {port:#x}")]
    UnknownPort { port: u16 },

    #[error("vcpu exited with an unexpected reason: {reason}")]
    UnexpectedExit { reason: String },

    #[error("guest triple-faulted or the vcpu entered a bad internal state: {reason}")]
    FailedEntry { reason: String },

    #[error("gdb: {0}")]
    Gdb(#[from] gdb::GdbError),
}

/// Owns the VCPU fd, the guest's memory view, and the attached
/// devices for the lifetime of one guest run. Constructed after
/// [`crate::cpu::Setup::build`] has parked the VCPU at its reset
/// state and the ELF entry point has been written to `rip`.
pub struct Vcpu<'a> {
    vcpu: VcpuFd,
    mem: GuestMemory<'a>,
    devices: Devices,
    dumpcore_path: Option<PathBuf>,
    gdb: Option<gdb::Stub>,
}

impl<'a> Vcpu<'a> {
    pub fn new(
        vcpu: VcpuFd,
        mem: GuestMemory<'a>,
        devices: Devices,
        dumpcore_path: Option<PathBuf>,
        gdb: Option<gdb::Stub>,
    ) -> Self {
        Self {
            vcpu,
            mem,
            devices,
            dumpcore_path,
            gdb,
        }
    }

    /// Runs until the guest halts, returning its exit status: the
    /// tender's own exit code equals the guest's last `exit()` status
    /// when no other error intervenes.
    pub fn run(&mut self) -> Result<i32, VcpuError> {
        loop {
            if let Some(gdb) = self.gdb.as_mut() {
                gdb.service_pending(&mut self.vcpu, &self.mem)?;
            }

            match self.vcpu.run() {
                Ok(VcpuExit::IoOut(port, data)) => {
                    if let Some(status) = self.handle_io_out(port, data)? {
                        return Ok(status);
                    }
                }
                Ok(VcpuExit::IoIn(_port, data)) => {
                    // No hypercall is IN-based; reads of unregistered
                    // ports return all-ones, matching real hardware's
                    // behavior for an unassigned PIO range.
                    data.fill(0xff);
                }
                Ok(VcpuExit::Hlt) => {
                    // A bare `hlt` with interrupts masked and none
                    // pending is a guest bug, not `solo5_exit`; treat it
                    // like an unannounced halt so its console output and
                    // (if requested) core dump still happen.
                    self.run_halt_hooks(1, None);
                    return Ok(1);
                }
                Ok(VcpuExit::Debug(_)) => {
                    if let Some(gdb) = self.gdb.as_mut() {
                        gdb.break_into(&mut self.vcpu, &self.mem)?;
                        continue;
                    }
                    return Err(VcpuError::UnexpectedExit {
                        reason: "debug trap with no gdb stub attached".to_string(),
                    });
                }
                Ok(VcpuExit::FailEntry(reason, cpu)) => {
                    return Err(VcpuError::FailedEntry {
                        reason: format!("hardware_entry_failure_reason={reason:#x} cpu={cpu}"),
                    });
                }
                Ok(VcpuExit::InternalError) => {
                    return Err(VcpuError::FailedEntry {
                        reason: "KVM_EXIT_INTERNAL_ERROR".to_string(),
                    });
                }
                Ok(other) => {
                    return Err(VcpuError::UnexpectedExit {
                        reason: format!("{other:?}"),
                    });
                }
                Err(e) if e.errno() == libc::EINTR => continue,
                Err(e) => return Err(VcpuError::Kvm(e)),
            }
        }
    }

    /// Handles one `IoOut` exit; returns `Some(status)` once the guest
    /// halts, `None` to keep running.
    fn handle_io_out(&mut self, port: u16, data: &[u8]) -> Result<Option<i32>, VcpuError> {
        let call = Call::from_port(port).ok_or(VcpuError::UnknownPort { port })?;
        let args_addr = u32::from_le_bytes(data[..4].try_into().unwrap_or([0; 4]));

        match hypercall::dispatch(call, args_addr, &self.mem, &self.devices)? {
            Outcome::Continue => Ok(None),
            Outcome::Halt { status, cookie } => {
                self.run_halt_hooks(status, cookie);
                Ok(Some(status))
            }
        }
    }

    /// On the halt hook: flush buffered console output, and if
    /// the guest aborted and `--dumpcore` was requested, write the core
    /// file. The trap frame is either the guest-supplied cookie region
    /// or, if none was given, a snapshot of the VCPU's own registers.
    fn run_halt_hooks(&mut self, status: i32, cookie: Option<u64>) {
        self.devices.flush_console();

        if status != ABORT_STATUS {
            return;
        }
        let Some(path) = self.dumpcore_path.clone() else {
            return;
        };

        const TRAP_FRAME_SIZE: usize = 256;
        let trap_frame = cookie
            .and_then(|addr| {
                self.mem
                    .slice(crate::memory::GuestAddr(addr), TRAP_FRAME_SIZE)
                    .ok()
                    .map(|s| s.to_vec())
            })
            .unwrap_or_else(|| self.snapshot_regs());

        if let Err(e) = coredump::write_core(&path, &self.mem, &trap_frame) {
            eprintln!("hvt: warning: failed to write core file {}: {e}", path.display());
        }
    }

    fn snapshot_regs(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Ok(regs) = self.vcpu.get_regs() {
            out.extend_from_slice(&regs.rip.to_le_bytes());
            out.extend_from_slice(&regs.rsp.to_le_bytes());
            out.extend_from_slice(&regs.rflags.to_le_bytes());
        }
        out
    }
}
