use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of heap memory")]
    OutOfMemory,

    #[error("allocation too large: requested {requested} bytes, max {max} bytes")]
    AllocationTooLarge { requested: usize, max: usize },

    #[error("pointer {addr:#x} does not match a known allocation")]
    UnknownAllocation { addr: usize },

    #[error("pointer {addr:#x} does not match slab alignment {block_size}")]
    SlabAlignmentMismatch { addr: usize, block_size: usize },

    #[error("heap has already been initialized")]
    AlreadyInitialized,

    #[error("heap has not been initialized")]
    NotInitialized,
}

pub type Result<T> = core::result::Result<T, MemoryError>;
