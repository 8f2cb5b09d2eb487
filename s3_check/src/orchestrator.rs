//! The S3 boot script exploit test
//!
//! Finds the function the boot script dispatches to during resume, hooks it
//! with the diagnostic payload, suspends the machine and judges the firmware
//! by what the payload captured. The hook is always removed before a verdict
//! is given.

use crate::config::ExploitConfig;
use crate::error::CheckError;
use crate::host::{SuspendTrigger, VariableStore};
use crate::payload::{DataSlotCapture, PayloadImage};
use crate::report::TestReport;
use boot_script::{find_dispatch, Dialect};
use data_types::PhysicalAddress;
use hook_engine::{CodePatcher, HookGuard, MemoryPort};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Progress of an exploit test run. Each stage is reached in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    VariableRead,
    ScriptLocated,
    DispatchFound,
    Hooked,
    AwaitingInvocation,
    Captured,
    Restored,
    Verdict,
}

/// Outcome of an exploit test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Not vulnerable
    Passed,
    /// Vulnerable
    Failed,
    Error,
}

/// Exit code of `check` on a machine the test does not apply to, such as a
/// legacy BIOS system. Distinct from every [`Verdict::exit_code`].
pub const NOT_APPLICABLE_EXIT_CODE: i32 = 3;

impl Verdict {
    /// Process exit code: 0 not vulnerable, 1 vulnerable, 2 test failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Passed => 0,
            Verdict::Failed => 1,
            Verdict::Error => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("PASSED"),
            Verdict::Failed => f.write_str("FAILED"),
            Verdict::Error => f.write_str("ERROR"),
        }
    }
}

impl From<&CheckError> for Verdict {
    fn from(_: &CheckError) -> Self {
        Verdict::Error
    }
}

/// A boot script read from physical memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootScript {
    pub address: PhysicalAddress,
    pub data: Vec<u8>,
}

impl BootScript {
    pub fn dialect(&self) -> Dialect {
        Dialect::detect(&self.data)
    }
}

/// Address of the ACPI global variable structure, stored in a firmware
/// variable as a 4 or 8 byte little endian value.
pub fn read_structure_address<V: VariableStore + ?Sized>(
    config: &ExploitConfig,
    variables: &mut V,
) -> Result<PhysicalAddress, CheckError> {
    let data = variables
        .read_variable(&config.variable_name, &config.variable_guid)
        .map_err(|error| CheckError::VariableRead {
            name: config.variable_name.clone(),
            error,
        })?;

    let address = match data.as_slice() {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]) as u64,
        [a, b, c, d, e, f, g, h] => u64::from_le_bytes([*a, *b, *c, *d, *e, *f, *g, *h]),
        _ => return Err(CheckError::VariableLength { length: data.len() }),
    };

    debug!("{} points to {:#x}", config.variable_name, address);
    Ok(address.into())
}

/// Follows the boot script pointer of the structure at `structure` and reads
/// the script.
pub fn read_boot_script<M: MemoryPort + ?Sized>(
    config: &ExploitConfig,
    memory: &mut M,
    structure: PhysicalAddress,
) -> Result<BootScript, CheckError> {
    let pointer_address = structure
        .checked_add(config.boot_script_offset)
        .ok_or(CheckError::StructureOutOfRange {
            structure,
            offset: config.boot_script_offset,
        })?;
    let pointer = memory
        .read(pointer_address, 4)
        .map_err(CheckError::StructureRead)?;
    let address = match pointer.as_slice() {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
        _ => 0,
    };
    if address == 0 {
        return Err(CheckError::BootScriptPointerZero { structure });
    }

    let address = PhysicalAddress::from(address);
    let data = memory
        .read(address, config.boot_script_max_len)
        .map_err(|error| CheckError::BootScriptRead { address, error })?;
    info!("boot script table at {}", address);

    Ok(BootScript { address, data })
}

fn enter(stage: &mut Stage, next: Stage) {
    debug!("{:?} -> {:?}", stage, next);
    *stage = next;
}

/// One exploit test against a host.
pub struct ExploitTest<M, V, T> {
    config: ExploitConfig,
    patcher: CodePatcher,
    payload: PayloadImage,
    memory: M,
    variables: V,
    trigger: T,
    stage: Stage,
    report: TestReport,
}

impl<M: MemoryPort, V: VariableStore, T: SuspendTrigger> ExploitTest<M, V, T> {
    pub fn new(config: ExploitConfig, payload: PayloadImage, memory: M, variables: V, trigger: T) -> Self {
        let patcher = CodePatcher::new(config.prologue_bitness).with_scan_limit(config.scan_limit);
        ExploitTest {
            config,
            patcher,
            payload,
            memory,
            variables,
            trigger,
            stage: Stage::Idle,
            report: TestReport::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn report(&self) -> &TestReport {
        &self.report
    }

    pub fn into_report(self) -> TestReport {
        self.report
    }

    pub fn memory(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Runs the test to a verdict. Failures are logged, kept in the report
    /// and turn into [`Verdict::Error`].
    pub fn run(&mut self) -> Verdict {
        let verdict = match self.try_run() {
            Ok(verdict) => verdict,
            Err(err) => {
                error!("{}", err);
                self.report.error = Some(err.to_string());
                Verdict::from(&err)
            }
        };

        self.report.stage = self.stage;
        self.report.verdict = Some(verdict);
        enter(&mut self.stage, Stage::Verdict);
        info!("exploit test result: {}", verdict);
        verdict
    }

    /// Runs the test, handing back the error that stopped it.
    pub fn try_run(&mut self) -> Result<Verdict, CheckError> {
        self.stage = Stage::Idle;
        self.report = TestReport::default();

        let structure = read_structure_address(&self.config, &mut self.variables)?;
        self.report.structure = Some(structure);
        enter(&mut self.stage, Stage::VariableRead);

        let script = read_boot_script(&self.config, &mut self.memory, structure)?;
        let dialect = script.dialect();
        self.report.boot_script = Some(script.address);
        self.report.dialect = Some(dialect);
        enter(&mut self.stage, Stage::ScriptLocated);

        let dispatch = find_dispatch(&script.data, dialect)?.ok_or(CheckError::DispatchNotFound)?;
        info!("boot script dispatches to {}", dispatch.target);
        self.report.dispatch = Some(dispatch);
        enter(&mut self.stage, Stage::DispatchFound);

        let mut guard = HookGuard::install(
            &self.patcher,
            &mut self.memory,
            dispatch.target,
            self.payload.bytes(),
        )
        .map_err(CheckError::Hook)?;
        let trampoline = guard.patch().trampoline_address();
        self.report.trampoline = Some(trampoline);
        self.report.trampoline_size = Some(guard.patch().trampoline_size());
        enter(&mut self.stage, Stage::Hooked);

        let capture_address = trampoline + self.payload.capture_offset();
        enter(&mut self.stage, Stage::AwaitingInvocation);
        let observed = self
            .trigger
            .suspend_resume(Duration::from_secs(self.config.wake_after_secs))
            .map_err(CheckError::Suspend)
            .and_then(|()| {
                guard
                    .memory()
                    .read(capture_address, DataSlotCapture::LEN)
                    .map_err(CheckError::CaptureRead)
            })
            .and_then(|data| {
                DataSlotCapture::parse(&data).ok_or(CheckError::CaptureTruncated {
                    address: capture_address,
                    length: data.len(),
                    expected: DataSlotCapture::LEN,
                })
            });
        if let Ok(capture) = &observed {
            info!(
                "payload ran {} times, BIOS_CNTL 0x{:02x}, TSEGMB 0x{:08x}",
                capture.counter, capture.bios_cntl, capture.tsegmb
            );
            self.report.capture = Some(*capture);
            enter(&mut self.stage, Stage::Captured);
        }

        let restored = guard.restore().map_err(CheckError::Restore);
        if restored.is_ok() {
            self.report.restored = true;
            enter(&mut self.stage, Stage::Restored);
        }

        let capture = observed?;
        restored?;

        if !capture.invoked() {
            return Err(CheckError::InvocationNotObserved);
        }

        if capture.bios_lock_enabled() {
            Ok(Verdict::Failed)
        } else {
            Ok(Verdict::Passed)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hook_engine::jump::rel32_target;
    use hook_engine::{MemoryError, SparseMemory};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    const STRUCTURE: u64 = 0x7ffe_0000;
    const SCRIPT: u64 = 0x7ffd_0000;
    const TARGET: u64 = 0x7ff0_3100;
    // push rbp; mov rbp, rsp; push rbx; sub rsp, 0x20; xor eax, eax; ret
    const FUNCTION: [u8; 12] = [
        0x55, 0x48, 0x89, 0xe5, 0x53, 0x48, 0x83, 0xec, 0x20, 0x31, 0xc0, 0xc3,
    ];

    /// Physical memory shared between the test and the simulated firmware.
    #[derive(Clone, Default)]
    struct SharedMemory(Rc<RefCell<SparseMemory>>);

    impl MemoryPort for SharedMemory {
        fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError> {
            self.0.borrow_mut().read(address, length)
        }

        fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
            self.0.borrow_mut().write(address, data)
        }
    }

    struct Variables(Vec<u8>);

    impl VariableStore for Variables {
        fn read_variable(&mut self, name: &str, guid: &str) -> io::Result<Vec<u8>> {
            assert_eq!(name, "AcpiGlobalVariable");
            assert_eq!(guid, "af9ffd67-ec10-488a-9dfc-6cbf5ee22c2e");
            Ok(self.0.clone())
        }
    }

    /// Resumes by calling the dispatch function once, the way the firmware
    /// replays the boot script. Running the payload is simulated by updating
    /// its data slot.
    struct Firmware {
        memory: SharedMemory,
        data_slot_offset: usize,
        bios_cntl: u8,
        calls: usize,
        fail: bool,
    }

    impl SuspendTrigger for Firmware {
        fn suspend_resume(&mut self, wake_after: Duration) -> io::Result<()> {
            assert_eq!(wake_after, Duration::from_secs(10));
            if self.fail {
                return Err(io::Error::other("rtcwake failed"));
            }

            for _ in 0..self.calls {
                let entry = self.memory.read(TARGET.into(), 5).unwrap();
                let Some(trampoline) = rel32_target(TARGET.into(), &entry) else {
                    continue;
                };
                let counter_address = trampoline + self.data_slot_offset + 1usize;
                let slot = self.memory.read(counter_address, 9).unwrap();
                let counter = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]) + 1;
                self.memory
                    .write(counter_address, &counter.to_le_bytes())
                    .unwrap();
                if counter == 1 {
                    let mut captured = vec![self.bios_cntl];
                    captured.extend_from_slice(&0x7f80_0000u32.to_le_bytes());
                    self.memory
                        .write(counter_address + 4u64, &captured)
                        .unwrap();
                }
            }
            Ok(())
        }
    }

    fn intel_instruction(index: u32, opcode: u8, length: u32, operand: Option<u64>) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.push(opcode);
        bytes.resize(16, 0);
        if let Some(operand) = operand {
            bytes.extend_from_slice(&operand.to_le_bytes());
        }
        bytes.resize(length as usize, 0);
        bytes
    }

    fn boot_script(with_dispatch: bool) -> Vec<u8> {
        let mut script = Vec::new();
        // STALL
        script.extend(intel_instruction(0, 0x07, 24, Some(100)));
        if with_dispatch {
            script.extend(intel_instruction(1, 0x08, 24, Some(TARGET)));
        }
        script.extend(intel_instruction(2, 0xff, 9, None));
        script
    }

    fn machine(script: &[u8], script_pointer: u32) -> SharedMemory {
        let mut memory = SharedMemory::default();
        memory
            .write(PhysicalAddress::from(STRUCTURE + 0x18), &script_pointer.to_le_bytes())
            .unwrap();
        memory.write(SCRIPT.into(), script).unwrap();

        let page = PhysicalAddress::from(TARGET).page_base();
        memory.fill(page, 0x1000, 0xcc).unwrap();
        memory.write(TARGET.into(), &FUNCTION).unwrap();
        memory
    }

    fn snapshot(memory: &SharedMemory) -> Vec<u8> {
        let page = PhysicalAddress::from(TARGET).page_base();
        memory.0.borrow_mut().read(page, 0x3000).unwrap()
    }

    fn exploit_test(
        memory: &SharedMemory,
        variable: Vec<u8>,
        bios_cntl: u8,
        calls: usize,
    ) -> ExploitTest<SharedMemory, Variables, Firmware> {
        let payload = PayloadImage::assemble(32).unwrap();
        let firmware = Firmware {
            memory: memory.clone(),
            data_slot_offset: payload.data_slot_offset(),
            bios_cntl,
            calls,
            fail: false,
        };
        ExploitTest::new(
            ExploitConfig::default(),
            payload,
            memory.clone(),
            Variables(variable),
            firmware,
        )
    }

    #[test]
    fn test_not_vulnerable() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 1);

        assert_eq!(test.run(), Verdict::Passed);
        assert_eq!(test.stage(), Stage::Verdict);
        assert_eq!(snapshot(&memory), before);

        let report = test.report();
        assert_eq!(report.verdict, Some(Verdict::Passed));
        assert_eq!(report.stage, Stage::Restored);
        assert_eq!(report.structure, Some(PhysicalAddress::from(STRUCTURE)));
        assert_eq!(report.boot_script, Some(PhysicalAddress::from(SCRIPT)));
        assert_eq!(report.dialect, Some(Dialect::Intel));
        assert_eq!(
            report.dispatch.map(|dispatch| dispatch.target),
            Some(PhysicalAddress::from(TARGET))
        );
        assert_eq!(
            report.capture,
            Some(DataSlotCapture {
                counter: 1,
                bios_cntl: 0,
                tsegmb: 0x7f80_0000,
            })
        );
        assert!(report.restored);
        assert_eq!(report.error, None);
    }

    #[test]
    fn test_vulnerable() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, (STRUCTURE as u32).to_le_bytes().to_vec(), 0x0a, 2);

        assert_eq!(test.run(), Verdict::Failed);
        assert_eq!(snapshot(&memory), before);
        assert_eq!(test.report().capture.map(|capture| capture.counter), Some(2));
    }

    #[test]
    fn test_invocation_not_observed() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 0);

        assert!(matches!(test.try_run(), Err(CheckError::InvocationNotObserved)));
        assert_eq!(test.stage(), Stage::Restored);
        assert_eq!(snapshot(&memory), before);

        assert_eq!(test.run(), Verdict::Error);
        assert!(test.report().error.is_some());
    }

    #[test]
    fn test_failed_suspend_restores() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 1);
        test.trigger.fail = true;

        assert!(matches!(test.try_run(), Err(CheckError::Suspend(_))));
        assert_eq!(test.stage(), Stage::Restored);
        assert!(test.report().restored);
        assert_eq!(test.report().capture, None);
        assert_eq!(snapshot(&memory), before);
    }

    #[test]
    fn test_no_dispatch() {
        let memory = machine(&boot_script(false), SCRIPT as u32);
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 1);

        assert!(matches!(test.try_run(), Err(CheckError::DispatchNotFound)));
        assert_eq!(test.stage(), Stage::ScriptLocated);
        assert_eq!(snapshot(&memory), before);
    }

    #[test]
    fn test_zero_script_pointer() {
        let memory = machine(&boot_script(true), 0);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 1);

        assert!(matches!(
            test.try_run(),
            Err(CheckError::BootScriptPointerZero { .. })
        ));
        assert_eq!(test.stage(), Stage::VariableRead);
    }

    #[test]
    fn test_structure_at_end_of_address_space() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let variable = 0xffff_ffff_ffff_fff0u64.to_le_bytes().to_vec();
        let mut test = exploit_test(&memory, variable, 0x00, 1);

        assert!(matches!(
            test.try_run(),
            Err(CheckError::StructureOutOfRange { offset: 0x18, .. })
        ));
        assert_eq!(test.stage(), Stage::VariableRead);
        assert_eq!(test.run(), Verdict::Error);
    }

    /// Hands back fewer bytes than asked for when the data slot is read.
    struct ShortSlotRead(SharedMemory);

    impl MemoryPort for ShortSlotRead {
        fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError> {
            let mut data = self.0.read(address, length)?;
            if length == DataSlotCapture::LEN {
                data.truncate(4);
            }
            Ok(data)
        }

        fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
            self.0.write(address, data)
        }
    }

    #[test]
    fn test_short_capture_read() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let before = snapshot(&memory);
        let payload = PayloadImage::assemble(32).unwrap();
        let firmware = Firmware {
            memory: memory.clone(),
            data_slot_offset: payload.data_slot_offset(),
            bios_cntl: 0x00,
            calls: 1,
            fail: false,
        };
        let mut test = ExploitTest::new(
            ExploitConfig::default(),
            payload,
            ShortSlotRead(memory.clone()),
            Variables(STRUCTURE.to_le_bytes().to_vec()),
            firmware,
        );

        assert!(matches!(
            test.try_run(),
            Err(CheckError::CaptureTruncated {
                length: 4,
                expected: DataSlotCapture::LEN,
                ..
            })
        ));
        assert_eq!(test.stage(), Stage::Restored);
        assert_eq!(test.report().capture, None);
        assert_eq!(snapshot(&memory), before);
    }

    #[test]
    fn test_bad_variable_length() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        let mut test = exploit_test(&memory, vec![0; 6], 0x00, 1);

        assert!(matches!(
            test.try_run(),
            Err(CheckError::VariableLength { length: 6 })
        ));
        assert_eq!(test.stage(), Stage::Idle);
        assert_eq!(test.run(), Verdict::Error);
        assert_eq!(test.report().stage, Stage::Idle);
    }

    #[test]
    fn test_unsafe_dispatch_target() {
        let memory = machine(&boot_script(true), SCRIPT as u32);
        // call rel32 right at the entry
        let mut shared = memory.clone();
        shared
            .write(TARGET.into(), &[0xe8, 0, 0, 0, 0, 0xc3])
            .unwrap();
        let before = snapshot(&memory);
        let mut test = exploit_test(&memory, STRUCTURE.to_le_bytes().to_vec(), 0x00, 1);

        assert!(matches!(test.try_run(), Err(CheckError::Hook(_))));
        assert_eq!(test.stage(), Stage::DispatchFound);
        assert_eq!(snapshot(&memory), before);
    }

    #[test]
    fn test_verdict_exit_codes() {
        assert_eq!(Verdict::Passed.exit_code(), 0);
        assert_eq!(Verdict::Failed.exit_code(), 1);
        assert_eq!(Verdict::Error.exit_code(), 2);
        for verdict in [Verdict::Passed, Verdict::Failed, Verdict::Error] {
            assert_ne!(verdict.exit_code(), NOT_APPLICABLE_EXIT_CODE);
        }
        assert_eq!(Verdict::from(&CheckError::DispatchNotFound), Verdict::Error);
        assert_eq!(serde_json::to_string(&Verdict::Passed).unwrap(), "\"PASSED\"");
    }
}
