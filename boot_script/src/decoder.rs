//! Boot Script Decoder Module
//!
//! Walks a boot script buffer instruction by instruction. Both table layouts
//! share one decoding loop; what differs between them (header fields, which
//! operands are understood, how strict the opcode check is) lives in a
//! per-dialect header layout table.

use crate::error::{DecodeError, Result};
use crate::opcode::{Opcode, RawOpcode, Width, TERMINATOR};
use core::fmt;
use data_types::{PciAddress, PhysicalAddress};
use itertools::Itertools;
use log::trace;
use serde::{Deserialize, Serialize};

/// First byte of an EDK layout boot script.
pub const EDK_SIGNATURE: u8 = 0xaa;
/// Size of the EDK table header following the signature byte.
pub const EDK_HEADER_LEN: usize = 0x34;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Intel,
    Edk,
}

impl Dialect {
    /// Picks the layout from the signature byte at the start of the script.
    pub fn detect(data: &[u8]) -> Self {
        match data.first() {
            Some(&EDK_SIGNATURE) => Dialect::Edk,
            _ => Dialect::Intel,
        }
    }

    fn layout(&self) -> &'static HeaderLayout {
        match self {
            Dialect::Intel => &INTEL_LAYOUT,
            Dialect::Edk => &EDK_LAYOUT,
        }
    }
}

#[derive(Clone, Copy)]
struct Field {
    offset: usize,
    size: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OperandSet {
    /// IO_WRITE, PCI_CONFIG_WRITE, MEM_WRITE and DISPATCH
    Writes,
    /// DISPATCH only
    DispatchOnly,
}

struct HeaderLayout {
    /// Bytes before the first instruction
    body_start: usize,
    header_len: usize,
    opcode: usize,
    length: Field,
    /// The EDK layout does not number its instructions
    index: Option<Field>,
    /// Unknown opcodes are an error rather than skipped
    strict_opcodes: bool,
    operands: OperandSet,
    dispatch_target: usize,
}

const INTEL_LAYOUT: HeaderLayout = HeaderLayout {
    body_start: 0,
    header_len: 9,
    opcode: 8,
    length: Field { offset: 4, size: 4 },
    index: Some(Field { offset: 0, size: 4 }),
    strict_opcodes: true,
    operands: OperandSet::Writes,
    dispatch_target: 16,
};

const EDK_LAYOUT: HeaderLayout = HeaderLayout {
    body_start: 1 + EDK_HEADER_LEN,
    header_len: 3,
    opcode: 0,
    length: Field { offset: 2, size: 1 },
    index: None,
    strict_opcodes: false,
    operands: OperandSet::DispatchOnly,
    dispatch_target: 3,
};

// Operand offsets of the Intel layout, relative to the instruction start
const WIDTH: usize = 9;
const IO_PORT: Field = Field { offset: 10, size: 2 };
const IO_COUNT: Field = Field { offset: 16, size: 8 };
const IO_VALUES: usize = 24;
const PCI_ADDRESS: Field = Field { offset: 16, size: 8 };
const PCI_COUNT: Field = Field { offset: 24, size: 8 };
const PCI_VALUES: usize = 32;
const MEM_ADDRESS: Field = Field { offset: 16, size: 8 };
const MEM_COUNT: Field = Field { offset: 24, size: 8 };
const MEM_VALUES: usize = 32;
const DISPATCH_TARGET_SIZE: usize = 8;

/// Operand semantics of a decoded instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    IoWrite {
        width: Width,
        port: u16,
        values: Vec<u64>,
    },
    PciConfigWrite {
        width: Width,
        address: PciAddress,
        values: Vec<u64>,
    },
    MemWrite {
        width: Width,
        address: PhysicalAddress,
        values: Vec<u64>,
    },
    Dispatch {
        target: PhysicalAddress,
    },
    /// Recognised or unknown opcode whose operands are not decoded
    Skipped,
}

/// A single decoded boot script instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the instruction from the start of the buffer
    pub offset: usize,
    /// Instruction number, stored in the Intel layout and counted for EDK
    pub index: u32,
    pub opcode: RawOpcode,
    /// Declared length, the distance to the next instruction
    pub length: usize,
    pub operation: Operation,
}

impl Instruction {
    pub fn width(&self) -> Option<Width> {
        match &self.operation {
            Operation::IoWrite { width, .. }
            | Operation::PciConfigWrite { width, .. }
            | Operation::MemWrite { width, .. } => Some(*width),
            Operation::Dispatch { .. } | Operation::Skipped => None,
        }
    }

    pub fn dispatch_target(&self) -> Option<PhysicalAddress> {
        match self.operation {
            Operation::Dispatch { target } => Some(target),
            _ => None,
        }
    }
}

fn hex_values(values: &[u64]) -> String {
    values.iter().map(|value| format!("0x{:x}", value)).join(", ")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} len={} {}", self.index, self.length, self.opcode)?;
        match &self.operation {
            Operation::IoWrite {
                width,
                port,
                values,
            } => write!(
                f,
                "\nWidth: {:?}, Port: 0x{:04x}, Count: {}\nValue: {}",
                width,
                port,
                values.len(),
                hex_values(values)
            ),
            Operation::PciConfigWrite {
                width,
                address,
                values,
            } => write!(
                f,
                "\nWidth: {:?}, Count: {}\n{}\nValue: {}",
                width,
                values.len(),
                address,
                hex_values(values)
            ),
            Operation::MemWrite {
                width,
                address,
                values,
            } => write!(
                f,
                "\nWidth: {:?}, Addr: {}, Count: {}\nValue: {}",
                width,
                address,
                values.len(),
                hex_values(values)
            ),
            Operation::Dispatch { target } => write!(f, "\nCall addr: {}", target),
            Operation::Skipped => Ok(()),
        }
    }
}

/// How a decode pass ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// A terminator opcode was found at `offset`
    Terminator { offset: usize },
    /// The buffer ran out at `offset` before any terminator
    Exhausted { offset: usize },
}

enum DecoderState {
    Running,
    Ended(StreamEnd),
    Failed,
}

/// Lazy decoder over a boot script buffer.
///
/// Yields one [`Instruction`] per step and stops after the terminator, after
/// the buffer is exhausted, or after the first error. It cannot be restarted.
pub struct BootScriptDecoder<'a> {
    data: &'a [u8],
    dialect: Dialect,
    cursor: usize,
    decoded: u32,
    state: DecoderState,
}

impl<'a> BootScriptDecoder<'a> {
    pub fn new(data: &'a [u8], dialect: Dialect) -> Self {
        BootScriptDecoder {
            data,
            dialect,
            cursor: dialect.layout().body_start,
            decoded: 0,
            state: DecoderState::Running,
        }
    }

    /// Decoder for the dialect announced by the buffer itself.
    pub fn detect(data: &'a [u8]) -> Self {
        Self::new(data, Dialect::detect(data))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Bytes of the buffer consumed so far. Once the terminator was seen this
    /// includes its header.
    pub fn consumed(&self) -> usize {
        self.cursor.min(self.data.len())
    }

    /// `Some` once the stream ended normally.
    pub fn end(&self) -> Option<StreamEnd> {
        match self.state {
            DecoderState::Ended(end) => Some(end),
            _ => None,
        }
    }

    fn decode_next(&mut self) -> Result<Option<Instruction>> {
        let layout = self.dialect.layout();
        let data = self.data;
        let offset = self.cursor;

        let Some(instruction) = data.get(offset..).filter(|rest| !rest.is_empty()) else {
            trace!("# Boot script exhausted at offset 0x{:x}", self.consumed());
            self.state = DecoderState::Ended(StreamEnd::Exhausted {
                offset: self.consumed(),
            });
            return Ok(None);
        };

        if instruction.len() < layout.header_len {
            return Err(DecodeError::Truncated {
                offset,
                what: "header",
            });
        }

        let raw_opcode = instruction[layout.opcode];
        if raw_opcode == TERMINATOR {
            trace!("# End of the boot script at offset 0x{:x}", offset);
            self.cursor = offset + layout.header_len;
            self.state = DecoderState::Ended(StreamEnd::Terminator { offset });
            return Ok(None);
        }

        let opcode = RawOpcode::from(raw_opcode);
        if layout.strict_opcodes && opcode.known().is_none() {
            return Err(DecodeError::InvalidOpcode {
                offset,
                opcode: raw_opcode,
            });
        }

        let length = read_field(instruction, layout.length, offset, "length")? as usize;
        if length == 0 {
            return Err(DecodeError::ZeroLength { offset });
        }

        let index = match layout.index {
            Some(field) => read_field(instruction, field, offset, "index")? as u32,
            None => self.decoded,
        };

        let operation = decode_operation(layout, opcode, instruction, offset)?;

        let instruction = Instruction {
            offset,
            index,
            opcode,
            length,
            operation,
        };
        trace!("{}", instruction);

        self.cursor = offset.saturating_add(length);
        self.decoded += 1;

        Ok(Some(instruction))
    }
}

impl Iterator for BootScriptDecoder<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if !matches!(self.state, DecoderState::Running) {
            return None;
        }

        match self.decode_next() {
            Ok(instruction) => instruction.map(Ok),
            Err(err) => {
                self.state = DecoderState::Failed;
                Some(Err(err))
            }
        }
    }
}

impl core::iter::FusedIterator for BootScriptDecoder<'_> {}

fn le_value(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |value, byte| (value << 8) | *byte as u64)
}

fn read_field(
    instruction: &[u8],
    field: Field,
    offset: usize,
    what: &'static str,
) -> Result<u64> {
    instruction
        .get(field.offset..field.offset + field.size)
        .map(le_value)
        .ok_or(DecodeError::Truncated { offset, what })
}

fn read_width(instruction: &[u8], offset: usize) -> Result<Width> {
    let raw = *instruction.get(WIDTH).ok_or(DecodeError::Truncated {
        offset,
        what: "width",
    })?;
    Width::from_raw(raw).ok_or(DecodeError::InvalidWidth { offset, width: raw })
}

fn read_values(
    instruction: &[u8],
    start: usize,
    width: Width,
    count: u64,
    offset: usize,
) -> Result<Vec<u64>> {
    let size = width
        .element_size()
        .ok_or(DecodeError::UndecodableWidth { offset, width })?;
    let end = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(size))
        .and_then(|total| total.checked_add(start))
        .ok_or(DecodeError::CountOverflow { offset, count })?;

    let bytes = instruction.get(start..end).ok_or(DecodeError::Truncated {
        offset,
        what: "value array",
    })?;

    Ok(bytes.chunks_exact(size).map(le_value).collect())
}

fn decode_operation(
    layout: &HeaderLayout,
    opcode: RawOpcode,
    instruction: &[u8],
    offset: usize,
) -> Result<Operation> {
    let Some(opcode) = opcode.known() else {
        return Ok(Operation::Skipped);
    };

    let operation = match (layout.operands, opcode) {
        (_, Opcode::DISPATCH) => {
            let target = Field {
                offset: layout.dispatch_target,
                size: DISPATCH_TARGET_SIZE,
            };
            Operation::Dispatch {
                target: read_field(instruction, target, offset, "dispatch target")?.into(),
            }
        }
        (OperandSet::Writes, Opcode::IO_WRITE) => {
            let width = read_width(instruction, offset)?;
            let count = read_field(instruction, IO_COUNT, offset, "count")?;
            let port = read_field(instruction, IO_PORT, offset, "port")? as u16;
            Operation::IoWrite {
                width,
                port,
                values: read_values(instruction, IO_VALUES, width, count, offset)?,
            }
        }
        (OperandSet::Writes, Opcode::PCI_CONFIG_WRITE) => {
            let width = read_width(instruction, offset)?;
            let count = read_field(instruction, PCI_COUNT, offset, "count")?;
            let address = read_field(instruction, PCI_ADDRESS, offset, "address")?;
            Operation::PciConfigWrite {
                width,
                address: PciAddress::from_boot_script(address),
                values: read_values(instruction, PCI_VALUES, width, count, offset)?,
            }
        }
        (OperandSet::Writes, Opcode::MEM_WRITE) => {
            let width = read_width(instruction, offset)?;
            let address = read_field(instruction, MEM_ADDRESS, offset, "address")?;
            let count = read_field(instruction, MEM_COUNT, offset, "count")?;
            Operation::MemWrite {
                width,
                address: address.into(),
                values: read_values(instruction, MEM_VALUES, width, count, offset)?,
            }
        }
        _ => Operation::Skipped,
    };

    Ok(operation)
}
