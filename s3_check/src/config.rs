use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Firmware variable holding the address of the ACPI global variable structure.
pub const ACPI_GLOBAL_VARIABLE: &str = "AcpiGlobalVariable";
pub const ACPI_GLOBAL_VARIABLE_GUID: &str = "af9ffd67-ec10-488a-9dfc-6cbf5ee22c2e";

/// Settings of an exploit test run.
///
/// Every field has a default, so a configuration file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploitConfig {
    pub variable_name: String,
    pub variable_guid: String,
    /// Offset of the boot script pointer within the ACPI global variable structure
    pub boot_script_offset: u64,
    /// Upper bound of the boot script read
    pub boot_script_max_len: usize,
    /// Wait before suspending, lets pending output reach the disk
    pub settle_delay_secs: u64,
    /// RTC alarm for the resume, also the time the firmware has to run the hook
    pub wake_after_secs: u64,
    /// Mode the hooked firmware function runs in
    pub prologue_bitness: u32,
    /// Register width the payload is assembled for
    pub payload_bitness: u32,
    /// How far past the hook target free memory is searched for
    pub scan_limit: u64,
    pub dev_mem: PathBuf,
    pub efivars: PathBuf,
    /// Externally assembled payload, used instead of the built-in one
    pub payload: Option<PathBuf>,
    pub data_slot_offset: Option<usize>,
}

impl Default for ExploitConfig {
    fn default() -> Self {
        ExploitConfig {
            variable_name: ACPI_GLOBAL_VARIABLE.to_string(),
            variable_guid: ACPI_GLOBAL_VARIABLE_GUID.to_string(),
            boot_script_offset: 0x18,
            boot_script_max_len: 0x8000,
            settle_delay_secs: 3,
            wake_after_secs: 10,
            prologue_bitness: 64,
            payload_bitness: 32,
            scan_limit: 1024 * 1024,
            dev_mem: PathBuf::from("/dev/mem"),
            efivars: PathBuf::from("/sys/firmware/efi/efivars"),
            payload: None,
            data_slot_offset: None,
        }
    }
}

impl ExploitConfig {
    pub fn from_file<A: AsRef<Path>>(path: A) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    pub fn save<A: AsRef<Path>>(&self, path: A) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        Ok(())
    }
}
