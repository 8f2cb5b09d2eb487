use super::SuspendTrigger;
use log::info;
use std::io;
use std::process::Command;
use std::time::Duration;

/// Suspend to RAM with `rtcwake`, which also arms the RTC alarm for the
/// resume.
#[derive(Debug, Clone)]
pub struct RtcWake {
    program: String,
    settle: Duration,
}

impl RtcWake {
    /// `settle` is waited before suspending.
    pub fn new(settle: Duration) -> Self {
        RtcWake {
            program: "rtcwake".to_string(),
            settle,
        }
    }

    pub fn with_program<S: Into<String>>(mut self, program: S) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, wake_after: Duration) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("-m");
        command.arg("mem");
        command.arg("-s");
        command.arg(wake_after.as_secs().max(1).to_string());
        command
    }
}

impl SuspendTrigger for RtcWake {
    fn suspend_resume(&mut self, wake_after: Duration) -> io::Result<()> {
        std::thread::sleep(self.settle);

        info!("suspending, resume in {}s", wake_after.as_secs());
        let output = self.command(wake_after).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} failed with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("resumed");
        Ok(())
    }
}
