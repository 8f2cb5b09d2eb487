use crate::environment::HostEnvironment;
use crate::orchestrator::{Stage, Verdict};
use crate::payload::DataSlotCapture;
use boot_script::{Dialect, DispatchRecord};
use data_types::PhysicalAddress;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// What an exploit test run found, written out with `--report`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub verdict: Option<Verdict>,
    /// Last stage reached before the verdict
    pub stage: Stage,
    pub error: Option<String>,
    pub environment: Option<HostEnvironment>,
    /// ACPI global variable structure
    pub structure: Option<PhysicalAddress>,
    pub boot_script: Option<PhysicalAddress>,
    pub dialect: Option<Dialect>,
    pub dispatch: Option<DispatchRecord>,
    pub trampoline: Option<PhysicalAddress>,
    pub trampoline_size: Option<usize>,
    pub capture: Option<DataSlotCapture>,
    pub restored: bool,
}

impl TestReport {
    pub fn from_file<A: AsRef<Path>>(path: A) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let report = serde_json::from_reader(reader)?;
        Ok(report)
    }

    pub fn save<A: AsRef<Path>>(&self, path: A) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        Ok(())
    }
}
