//! Facts about the host, gathered before the exploit test
//!
//! Only a machine booted through UEFI can have an S3 boot script to attack;
//! legacy BIOS machines are reported as not vulnerable right away.

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

lazy_static! {
    static ref KERNEL_VERSION_REGEX: Regex = Regex::new(r"\d+(\d+|\.|-|_|[a-z]|[A-Z])*").unwrap();
}

pub const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";

/// Pulls the version out of a `uname -r` style line.
///
/// One trailing character that is neither a digit nor a letter is dropped.
pub fn extract_kernel_version(line: &str) -> Option<String> {
    let version = KERNEL_VERSION_REGEX.find(line)?.as_str();
    let version = match version.chars().last() {
        Some(last) if !last.is_ascii_alphanumeric() => &version[..version.len() - last.len_utf8()],
        _ => version,
    };
    Some(version.to_string())
}

/// Release of the running kernel.
pub fn current_kernel() -> io::Result<Option<String>> {
    let output = Command::new("uname").arg("-r").output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!("uname failed with {}", output.status)));
    }
    Ok(extract_kernel_version(&String::from_utf8_lossy(&output.stdout)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Rpm,
    Dpkg,
    Pacman,
}

impl PackageManager {
    pub const ALL: [PackageManager; 3] = [
        PackageManager::Rpm,
        PackageManager::Dpkg,
        PackageManager::Pacman,
    ];

    pub fn program(&self) -> &'static str {
        match self {
            PackageManager::Rpm => "rpm",
            PackageManager::Dpkg => "dpkg",
            PackageManager::Pacman => "pacman",
        }
    }

    /// The first package manager whose `--version` succeeds.
    pub fn detect() -> Option<Self> {
        Self::ALL.into_iter().find(|manager| manager.is_installed())
    }

    fn is_installed(&self) -> bool {
        Command::new(self.program())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Firmware {
    Uefi,
    LegacyBios,
}

impl Firmware {
    pub fn detect() -> Self {
        Self::detect_at(EFI_FIRMWARE_DIR)
    }

    /// UEFI if the kernel exposes its EFI directory at `efi_dir`.
    pub fn detect_at<A: AsRef<Path>>(efi_dir: A) -> Self {
        if efi_dir.as_ref().exists() {
            Firmware::Uefi
        } else {
            Firmware::LegacyBios
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEnvironment {
    pub kernel: Option<String>,
    pub package_manager: Option<PackageManager>,
    pub firmware: Firmware,
}

impl HostEnvironment {
    pub fn probe() -> Self {
        let kernel = current_kernel().unwrap_or_else(|err| {
            warn!("unable to determine the kernel version: {}", err);
            None
        });
        let package_manager = PackageManager::detect();
        if package_manager.is_none() {
            warn!("package manager could not be determined");
        }
        let firmware = Firmware::detect();
        debug!("{:?} {:?} {:?}", kernel, package_manager, firmware);

        HostEnvironment {
            kernel,
            package_manager,
            firmware,
        }
    }
}

impl fmt::Display for HostEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Found current kernel: {}",
            self.kernel.as_deref().unwrap_or("unknown")
        )?;
        match self.package_manager {
            Some(manager) => writeln!(f, "Package manager: {}", manager)?,
            None => writeln!(f, "Package manager: unknown")?,
        }
        match self.firmware {
            Firmware::Uefi => write!(f, "Firmware: UEFI"),
            Firmware::LegacyBios => write!(f, "Firmware: legacy BIOS"),
        }
    }
}
