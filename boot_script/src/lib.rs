//! # S3 boot script
//!
//! Decoder for the S3 resume boot script, the table of hardware
//! initialisation operations firmware replays when waking from suspend.
//! Two table layouts are understood: the Intel layout (DQ77KB, Q77 chipset
//! firmware) and the EDK layout, recognised by its leading signature byte.

pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod opcode;

pub use decoder::{BootScriptDecoder, Dialect, Instruction, Operation, StreamEnd};
pub use dispatch::{find_dispatch, DispatchRecord};
pub use error::{DecodeError, Result};
pub use opcode::{Opcode, RawOpcode, Width};
