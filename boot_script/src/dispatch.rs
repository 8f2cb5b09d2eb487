//! Locating the first DISPATCH instruction of a boot script

use crate::decoder::{BootScriptDecoder, Dialect};
use crate::error::Result;
use data_types::PhysicalAddress;
use log::debug;
use serde::{Deserialize, Serialize};

/// The operand of a DISPATCH instruction: the function firmware calls while
/// replaying the script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub target: PhysicalAddress,
    /// Offset of the DISPATCH instruction within the script buffer
    pub script_offset: usize,
}

/// Decodes `data` up to the first DISPATCH instruction and returns its
/// target. The rest of the script is not decoded.
///
/// Returns `Ok(None)` when the script ends without one. Format errors met
/// before a DISPATCH are returned as they are.
pub fn find_dispatch(data: &[u8], dialect: Dialect) -> Result<Option<DispatchRecord>> {
    for instruction in BootScriptDecoder::new(data, dialect) {
        let instruction = instruction?;
        if let Some(target) = instruction.dispatch_target() {
            debug!(
                "DISPATCH #{} at script offset 0x{:x} calls {}",
                instruction.index, instruction.offset, target
            );
            return Ok(Some(DispatchRecord {
                target,
                script_offset: instruction.offset,
            }));
        }
    }

    Ok(None)
}
