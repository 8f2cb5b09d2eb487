use boot_script::DecodeError;
use data_types::PhysicalAddress;
use hook_engine::error::{HookError, MemoryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("failed to assemble the payload: {0}")]
    Assemble(#[from] iced_x86::IcedError),
    #[error("unsupported payload bitness {0}")]
    UnsupportedBitness(u32),
    #[error("an external payload needs the offset of its data slot")]
    MissingSlotOffset,
    #[error("data slot at 0x{offset:x} does not fit a {length} byte payload")]
    SlotOutOfBounds { offset: usize, length: usize },
    #[error("no data slot sentinel at 0x{offset:x}")]
    MissingSentinel { offset: usize },
    #[error("data slot at 0x{offset:x} is not zero initialised")]
    SlotNotZero { offset: usize },
    #[error("failed to read the payload: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed step of the exploit test.
///
/// Errors up to [`CheckError::Hook`] happen before anything was written.
/// The others are reported after the hook was removed again.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("failed to read the firmware variable {name}: {error}")]
    VariableRead { name: String, error: std::io::Error },
    #[error("firmware variable holds {length} bytes, expected an address of 4 or 8")]
    VariableLength { length: usize },
    #[error("structure at {structure} is too close to the end of the address space for the offset 0x{offset:x}")]
    StructureOutOfRange {
        structure: PhysicalAddress,
        offset: u64,
    },
    #[error("failed to read the ACPI global variable structure: {0}")]
    StructureRead(#[source] MemoryError),
    #[error("unable to locate the boot script table, pointer in the structure at {structure} is zero")]
    BootScriptPointerZero { structure: PhysicalAddress },
    #[error("failed to read the boot script at {address}: {error}")]
    BootScriptRead {
        address: PhysicalAddress,
        error: MemoryError,
    },
    #[error("malformed boot script: {0}")]
    Format(#[from] DecodeError),
    #[error("unable to locate a DISPATCH instruction in the boot script")]
    DispatchNotFound,
    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("failed to hook the dispatch function: {0}")]
    Hook(#[source] HookError),
    #[error("suspend/resume cycle failed: {0}")]
    Suspend(#[source] std::io::Error),
    #[error("failed to read back the payload data slot: {0}")]
    CaptureRead(#[source] MemoryError),
    #[error("data slot read back {length} bytes at {address}, expected {expected}")]
    CaptureTruncated {
        address: PhysicalAddress,
        length: usize,
        expected: usize,
    },
    #[error("the hooked function was not called during resume")]
    InvocationNotObserved,
    #[error("failed to remove the hook: {0}")]
    Restore(#[source] HookError),
}

#[derive(Error, Debug)]
pub enum ListingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed boot script: {0}")]
    Format(#[from] DecodeError),
}
