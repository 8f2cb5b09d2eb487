//! Checks whether UEFI firmware lets code injected through the S3 resume boot
//! script write to protected chipset registers.
//!
//! The test reads the boot script the firmware replays on resume, hooks the
//! function its DISPATCH instruction calls with a small payload, suspends the
//! machine and reads back what the payload saw while running in firmware
//! context.

pub mod config;
pub mod environment;
pub mod error;
pub mod host;
pub mod listing;
pub mod orchestrator;
pub mod payload;
pub mod report;

pub use config::ExploitConfig;
pub use error::{CheckError, ListingError, PayloadError};
pub use orchestrator::{ExploitTest, Stage, Verdict};
pub use payload::{DataSlotCapture, PayloadImage};
pub use report::TestReport;
