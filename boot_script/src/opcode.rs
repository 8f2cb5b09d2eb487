//! Opcodes and operand widths of the boot script

use core::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Opcode ending the script in both layouts.
pub const TERMINATOR: u8 = 0xff;

/// Number of opcodes with a known meaning. Anything at or above this (other
/// than [`TERMINATOR`]) is unknown.
pub const OPCODE_COUNT: u8 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
#[allow(non_camel_case_types)] // these are the names
pub enum Opcode {
    IO_WRITE = 0x00,
    IO_READ_WRITE = 0x01,
    MEM_WRITE = 0x02,
    MEM_READ_WRITE = 0x03,
    PCI_CONFIG_WRITE = 0x04,
    PCI_CONFIG_READ_WRITE = 0x05,
    SMBUS_EXECUTE = 0x06,
    STALL = 0x07,
    /// Calls a function pointer during replay
    DISPATCH = 0x08,
    MEM_POLL = 0x09,
}

impl Opcode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        FromPrimitive::from_u8(raw)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::IO_WRITE => "IO_WRITE",
            Opcode::IO_READ_WRITE => "IO_READ_WRITE",
            Opcode::MEM_WRITE => "MEM_WRITE",
            Opcode::MEM_READ_WRITE => "MEM_READ_WRITE",
            Opcode::PCI_CONFIG_WRITE => "PCI_CONFIG_WRITE",
            Opcode::PCI_CONFIG_READ_WRITE => "PCI_CONFIG_READ_WRITE",
            Opcode::SMBUS_EXECUTE => "SMBUS_EXECUTE",
            Opcode::STALL => "STALL",
            Opcode::DISPATCH => "DISPATCH",
            Opcode::MEM_POLL => "MEM_POLL",
        }
    }
}

/// An opcode byte as found in the script, known or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RawOpcode {
    Known(Opcode),
    Unknown(u8),
}

impl RawOpcode {
    pub fn known(&self) -> Option<Opcode> {
        match self {
            RawOpcode::Known(opcode) => Some(*opcode),
            RawOpcode::Unknown(_) => None,
        }
    }
}

impl From<u8> for RawOpcode {
    fn from(raw: u8) -> Self {
        Opcode::from_raw(raw).map_or(RawOpcode::Unknown(raw), RawOpcode::Known)
    }
}

impl fmt::Display for RawOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawOpcode::Known(opcode) => f.write_str(opcode.name()),
            RawOpcode::Unknown(raw) => write!(f, "UNKNOWN_0x{:X}", raw),
        }
    }
}

/// Operand width class of the write opcodes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, Serialize, Deserialize,
)]
pub enum Width {
    Uint8 = 0,
    Uint16 = 1,
    Uint32 = 2,
    Uint64 = 3,
    FifoUint8 = 4,
    FifoUint16 = 5,
    FifoUint32 = 6,
    FifoUint64 = 7,
    FillUint8 = 8,
    FillUint16 = 9,
    FillUint32 = 10,
    FillUint64 = 11,
}

impl Width {
    pub fn from_raw(raw: u8) -> Option<Self> {
        FromPrimitive::from_u8(raw)
    }

    /// Size in bytes of one element of the value array.
    ///
    /// FIFO and Fill widths are not decoded, they return `None`.
    pub const fn element_size(&self) -> Option<usize> {
        match self {
            Width::Uint8 => Some(1),
            Width::Uint16 => Some(2),
            Width::Uint32 => Some(4),
            Width::Uint64 => Some(8),
            _ => None,
        }
    }
}
