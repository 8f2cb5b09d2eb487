//! Human readable boot script listing

use crate::error::ListingError;
use boot_script::decoder::EDK_HEADER_LEN;
use boot_script::{BootScriptDecoder, Dialect, StreamEnd};
use data_types::PhysicalAddress;
use std::io::Write;

/// Writes every instruction of `data` to `out`, followed by a line telling
/// where the script ended.
///
/// Offsets are counted from the start of `data` in both dialects, so for an
/// EDK script they include the signature byte and the header. Instructions
/// decoded before a format error are still written.
pub fn write_listing<W: Write>(
    out: &mut W,
    data: &[u8],
    address: Option<PhysicalAddress>,
) -> Result<StreamEnd, ListingError> {
    let mut decoder = BootScriptDecoder::detect(data);
    let layout = match decoder.dialect() {
        Dialect::Intel => "Intel",
        Dialect::Edk => "EDK",
    };
    match address {
        Some(address) => writeln!(out, "# {} boot script at {}", layout, address)?,
        None => writeln!(out, "# {} boot script", layout)?,
    }
    if decoder.dialect() == Dialect::Edk {
        writeln!(out, "# Instructions start at offset 0x{:x}", 1 + EDK_HEADER_LEN)?;
    }

    for instruction in decoder.by_ref() {
        writeln!(out, "{}", instruction?)?;
    }

    // a decoder that stopped without error has always ended
    let end = decoder.end().unwrap_or(StreamEnd::Exhausted {
        offset: decoder.consumed(),
    });
    match end {
        StreamEnd::Terminator { offset } => {
            writeln!(out, "# End of the boot script at offset 0x{:x}", offset)?
        }
        StreamEnd::Exhausted { offset } => {
            writeln!(out, "# Boot script exhausted at offset 0x{:x}", offset)?
        }
    }
    Ok(end)
}
