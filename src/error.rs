use thiserror::Error as ThisError;

use crate::device::DeviceError;
use crate::elf::ElfError;
use crate::gdb::GdbError;
use crate::hypercall::HypercallError;
use crate::manifest::ManifestError;
use crate::memory::MemoryError;
use crate::vcpu::VcpuError;

#[derive(ThisError, Debug)]
pub enum CpuError {
    #[error("kvm error: {0}")]
    Kvm(#[from] kvm_ioctls::Error),

    #[error("guest memory error: {0}")]
    GuestMemory(#[from] vm_memory::GuestMemoryError),

    #[error("requested memory size {requested} exceeds architectural maximum {max}")]
    MemoryTooLarge { requested: u64, max: u64 },
}

/// Unifies every component's leaf error type at the CLI boundary.
/// `main` maps each variant to one of the stable process exit codes.
#[derive(ThisError, Debug)]
pub enum TenderError {
    #[error("elf: {0}")]
    Elf(#[from] ElfError),

    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("cpu: {0}")]
    Cpu(#[source] CpuError),

    #[error("hypercall: {0}")]
    Hypercall(#[from] HypercallError),

    #[error("device: {0}")]
    Device(#[from] DeviceError),

    #[error("vcpu: {0}")]
    Vcpu(#[from] VcpuError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("kvm: {0}")]
    Kvm(#[from] kvm_ioctls::Error),

    #[error("guest memory: {0}")]
    GuestMemory(#[from] vm_memory::GuestMemoryError),

    #[error("guest memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("gdb: {0}")]
    Gdb(#[from] GdbError),

    #[error("{0}: {1} is not a valid --mem value")]
    InvalidArgument(&'static str, String),
}

impl TenderError {
    /// Stable exit code per variant (2..=9 reserved for tender-side
    /// errors).
    pub fn exit_code(&self) -> i32 {
        match self {
            TenderError::Elf(_) => 2,
            TenderError::Manifest(_) => 3,
            TenderError::Cpu(_) => 4,
            TenderError::Hypercall(_) => 5,
            TenderError::Device(_) => 6,
            TenderError::Vcpu(_) => 7,
            TenderError::Io(_) => 8,
            TenderError::Kvm(_) => 8,
            TenderError::GuestMemory(_) => 8,
            TenderError::Memory(_) => 8,
            TenderError::Gdb(_) => 7,
            TenderError::InvalidArgument(..) => 9,
        }
    }
}

impl From<CpuError> for TenderError {
    fn from(err: CpuError) -> Self {
        match err {
            CpuError::Kvm(e) => TenderError::Kvm(e),
            CpuError::GuestMemory(e) => TenderError::GuestMemory(e),
            other => TenderError::Cpu(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TenderError>;
