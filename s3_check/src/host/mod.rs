//! Access to the machine under test
//!
//! The exploit test talks to the host through three interfaces: physical
//! memory ([`hook_engine::MemoryPort`]), firmware variables and the
//! suspend/resume trigger. The Linux implementations live in the submodules.

pub mod dev_mem;
pub mod efivars;
pub mod rtcwake;

pub use dev_mem::DevMem;
pub use efivars::EfiVarFs;
pub use rtcwake::RtcWake;

use std::io;
use std::time::Duration;

/// Read access to UEFI variables.
pub trait VariableStore {
    /// Returns the variable data without its attributes.
    fn read_variable(&mut self, name: &str, guid: &str) -> io::Result<Vec<u8>>;
}

/// Puts the machine to sleep and returns after it woke up again.
pub trait SuspendTrigger {
    /// Blocks for the whole cycle. `wake_after` is the time until resume.
    fn suspend_resume(&mut self, wake_after: Duration) -> io::Result<()>;
}
