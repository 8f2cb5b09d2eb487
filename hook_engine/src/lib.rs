//! This crate hooks functions in physical memory.
//!
//! A hook replaces the first instructions of a function with a near jump to a
//! trampoline placed in unused memory nearby. The trampoline runs a payload,
//! then the displaced instructions, then jumps back behind the patched bytes.
//! All memory access goes through a [`MemoryPort`], so the engine works the
//! same on `/dev/mem` and on an in-memory buffer.

pub mod error;
pub mod jump;
pub mod memory;
pub mod patcher;
pub mod prologue;
pub mod region;

pub use error::HookError as Error;
pub use error::{MemoryError, Result};
pub use memory::{MemoryPort, SparseMemory};
pub use patcher::{CodePatcher, HookGuard, HookPatch};
