use data_types::PhysicalAddress;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("failed to access {length} bytes at {address}: {source}")]
    Io {
        address: PhysicalAddress,
        length: usize,
        source: std::io::Error,
    },
    #[error("{length} bytes at {address} are not backed by memory")]
    Unmapped {
        address: PhysicalAddress,
        length: usize,
    },
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unable to patch `{instruction}` at {address} at the beginning of the function")]
    UnsafePrologue {
        address: PhysicalAddress,
        instruction: String,
    },
    #[error("unable to decode the instruction at {address}")]
    UndecodablePrologue { address: PhysicalAddress },
    #[error("unsupported code bitness {0}")]
    UnsupportedBitness(u32),
    #[error("unable to find {size} bytes of unused memory within 0x{limit:x} bytes after {near}")]
    NoFreeMemory {
        near: PhysicalAddress,
        size: usize,
        limit: u64,
    },
    #[error("{address} + 0x{offset:x} is past the end of the address space")]
    AddressOverflow {
        address: PhysicalAddress,
        offset: usize,
    },
    #[error("jump from {from} to {to} does not fit a 32-bit displacement")]
    JumpOutOfRange {
        from: PhysicalAddress,
        to: PhysicalAddress,
    },
}

pub type Result<T> = core::result::Result<T, HookError>;
