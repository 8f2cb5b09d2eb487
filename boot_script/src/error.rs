use crate::opcode::Width;
use thiserror::Error;

/// Reasons a boot script cannot be decoded any further.
///
/// Every variant is fatal to the current pass, the decoder stops after
/// yielding one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode 0x{opcode:x} at offset 0x{offset:x}")]
    InvalidOpcode { offset: usize, opcode: u8 },
    #[error("invalid width 0x{width:x} at offset 0x{offset:x}")]
    InvalidWidth { offset: usize, width: u8 },
    #[error("width {width:?} at offset 0x{offset:x} has no fixed element size")]
    UndecodableWidth { offset: usize, width: Width },
    #[error("instruction at offset 0x{offset:x} declares a zero length")]
    ZeroLength { offset: usize },
    #[error("{what} of the instruction at offset 0x{offset:x} runs past the end of the buffer")]
    Truncated { offset: usize, what: &'static str },
    #[error("element count {count} at offset 0x{offset:x} does not fit the address space")]
    CountOverflow { offset: usize, count: u64 },
}

pub type Result<T> = core::result::Result<T, DecodeError>;
