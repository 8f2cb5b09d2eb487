//! Jump encodings written by the hook engine

use crate::error::{HookError, Result};
use data_types::{Address, PhysicalAddress};

/// `jmp rel32`
pub const JUMP_REL32_LEN: usize = 5;
/// `jmp qword [rip+0]` followed by the 8 byte target
pub const JUMP_ABS64_LEN: usize = 14;

const JMP_REL32: u8 = 0xe9;
const JMP_RIP_INDIRECT: [u8; 6] = [0xff, 0x25, 0x00, 0x00, 0x00, 0x00];

/// Encodes a near relative jump placed at `from` that lands on `to`.
pub fn jump_rel32(from: PhysicalAddress, to: PhysicalAddress) -> Result<[u8; JUMP_REL32_LEN]> {
    let displacement = to.distance_from(from) - JUMP_REL32_LEN as i64;
    let displacement =
        i32::try_from(displacement).map_err(|_| HookError::JumpOutOfRange { from, to })?;

    let mut jump = [0u8; JUMP_REL32_LEN];
    jump[0] = JMP_REL32;
    jump[1..].copy_from_slice(&displacement.to_le_bytes());
    Ok(jump)
}

/// Encodes an absolute jump reading its target from the 8 bytes right after
/// the instruction. Position independent, so it reaches any address.
pub fn jump_abs64(to: PhysicalAddress) -> [u8; JUMP_ABS64_LEN] {
    let mut jump = [0u8; JUMP_ABS64_LEN];
    jump[..JMP_RIP_INDIRECT.len()].copy_from_slice(&JMP_RIP_INDIRECT);
    jump[JMP_RIP_INDIRECT.len()..].copy_from_slice(&to.address().to_le_bytes());
    jump
}

/// Destination of a `jmp rel32` located at `at`, if `bytes` starts with one.
pub fn rel32_target(at: PhysicalAddress, bytes: &[u8]) -> Option<PhysicalAddress> {
    match bytes {
        [JMP_REL32, d0, d1, d2, d3, ..] => {
            let displacement = i32::from_le_bytes([*d0, *d1, *d2, *d3]) as i64;
            Some(PhysicalAddress::from(
                at.address()
                    .wrapping_add(JUMP_REL32_LEN as u64)
                    .wrapping_add(displacement as u64),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn decoded_target(at: u64, bytes: &[u8]) -> (Mnemonic, usize, u64) {
        let mut decoder = Decoder::with_ip(64, bytes, at, DecoderOptions::NONE);
        let instruction = decoder.decode();
        (
            instruction.mnemonic(),
            instruction.len(),
            instruction.near_branch_target(),
        )
    }

    #[test]
    fn test_rel32_forward_and_backward() {
        let from = PhysicalAddress::from(0x7ff0_1000u64);
        let tests = [0x7ff0_2000u64, 0x7ff0_0800, 0x7ff0_1005, 0x7fef_0000];

        for to in tests {
            let jump = jump_rel32(from, to.into()).unwrap();
            assert_eq!(decoded_target(0x7ff0_1000, &jump), (Mnemonic::Jmp, 5, to));
            assert_eq!(rel32_target(from, &jump), Some(PhysicalAddress::from(to)));
        }

        assert_eq!(
            jump_rel32(0x1000u64.into(), 0x2000u64.into()).unwrap(),
            [0xe9, 0xfb, 0x0f, 0x00, 0x00]
        );
    }

    #[test]
    fn test_rel32_out_of_range() {
        let result = jump_rel32(0x1000u64.into(), 0x1_8000_0000u64.into());
        assert!(matches!(result, Err(HookError::JumpOutOfRange { .. })));
    }

    #[test]
    fn test_abs64() {
        let jump = jump_abs64(0x1_2345_6789u64.into());
        assert_eq!(&jump[..6], &[0xff, 0x25, 0, 0, 0, 0]);
        assert_eq!(&jump[6..], &0x1_2345_6789u64.to_le_bytes());

        let mut decoder = Decoder::with_ip(64, &jump, 0x1000, DecoderOptions::NONE);
        let instruction = decoder.decode();
        assert_eq!(instruction.mnemonic(), Mnemonic::Jmp);
        assert_eq!(instruction.len(), 6);
        assert_eq!(instruction.memory_displacement64(), 0x1006);
    }

    #[test]
    fn test_rel32_target_rejects_other_bytes() {
        assert_eq!(rel32_target(0u64.into(), &[0x55, 0, 0, 0, 0]), None);
        assert_eq!(rel32_target(0u64.into(), &[0xe9, 0, 0]), None);
    }
}
