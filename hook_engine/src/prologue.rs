//! Function prologue measurement
//!
//! Before a function entry is overwritten with a jump, the instructions that
//! the jump covers have to be moved to the trampoline. Only whole
//! instructions can be moved, and only those whose meaning does not depend on
//! where they execute.

use crate::error::{HookError, Result};
use crate::jump::JUMP_REL32_LEN;
use iced_x86::{Decoder, DecoderOptions, FlowControl, Formatter, Instruction, NasmFormatter};
use log::trace;

/// Bytes read from the hook target to measure its prologue. Enough for the
/// longest possible run of instructions shorter than the entry jump.
pub const PROLOGUE_READ_LEN: usize = 0x40;

/// Jumps, calls, returns and interrupts. Relative targets would be wrong
/// after copying, and returns or interrupts never reach the jump back.
fn transfers_control(instruction: &Instruction) -> bool {
    matches!(
        instruction.flow_control(),
        FlowControl::UnconditionalBranch
            | FlowControl::ConditionalBranch
            | FlowControl::IndirectBranch
            | FlowControl::Call
            | FlowControl::IndirectCall
            | FlowControl::Return
            | FlowControl::Interrupt
            | FlowControl::XbeginXabortXend
    )
}

fn format_instruction(instruction: &Instruction) -> String {
    let mut text = String::new();
    NasmFormatter::new().format(instruction, &mut text);
    text
}

/// Returns how many bytes of whole instructions at the start of `code` cover
/// at least a near jump.
///
/// `ip` is the address `code` was read from and `bitness` the mode the code
/// runs in (16, 32 or 64).
pub fn measure_prologue(code: &[u8], ip: u64, bitness: u32) -> Result<usize> {
    let mut decoder = Decoder::try_with_ip(bitness, code, ip, DecoderOptions::NONE)
        .map_err(|_| HookError::UnsupportedBitness(bitness))?;

    let mut length = 0usize;
    while length < JUMP_REL32_LEN {
        let address = (ip + length as u64).into();
        if !decoder.can_decode() {
            return Err(HookError::UndecodablePrologue { address });
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::UndecodablePrologue { address });
        }

        trace!("{:016x} {}", instruction.ip(), format_instruction(&instruction));

        if transfers_control(&instruction) {
            return Err(HookError::UnsafePrologue {
                address,
                instruction: format_instruction(&instruction),
            });
        }

        length += instruction.len();
    }

    Ok(length)
}
