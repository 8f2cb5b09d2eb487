//! PCI configuration space addressing
//!
//! Two packings of the same bus/device/function/register tuple show up here:
//! - the boot script packs it byte-wise into a 64-bit operand
//!   (byte 3 bus, byte 2 device, byte 1 function, byte 0 register)
//! - the legacy configuration mechanism (ports 0xCF8/0xCFC) takes a 32-bit
//!   address with an enable bit, used by the diagnostic payload

use serde::{Deserialize, Serialize};
use std::fmt;

/// I/O port taking the configuration address.
pub const CONFIG_ADDRESS_PORT: u16 = 0xcf8;
/// I/O port carrying the configuration data.
pub const CONFIG_DATA_PORT: u16 = 0xcfc;

const CONFIG_ENABLE: u32 = 1 << 31;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub offset: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8, offset: u8) -> Self {
        PciAddress {
            bus,
            device,
            function,
            offset,
        }
    }

    /// Decodes the packed operand of a boot script PCI_CONFIG_WRITE.
    pub const fn from_boot_script(packed: u64) -> Self {
        PciAddress {
            bus: ((packed >> 24) & 0xff) as u8,
            device: ((packed >> 16) & 0xff) as u8,
            function: ((packed >> 8) & 0xff) as u8,
            offset: (packed & 0xff) as u8,
        }
    }

    /// Packs the address the way the boot script stores it.
    pub const fn to_boot_script(&self) -> u64 {
        ((self.bus as u64) << 24)
            | ((self.device as u64) << 16)
            | ((self.function as u64) << 8)
            | self.offset as u64
    }

    /// Decodes a value written to [`CONFIG_ADDRESS_PORT`].
    pub const fn from_config_address(value: u32) -> Self {
        PciAddress {
            bus: ((value >> 16) & 0xff) as u8,
            device: ((value >> 11) & 0x1f) as u8,
            function: ((value >> 8) & 0x7) as u8,
            offset: (value & 0xff) as u8,
        }
    }

    /// The value to write to [`CONFIG_ADDRESS_PORT`] to select this register.
    ///
    /// The register offset is dword aligned by the hardware, sub-dword
    /// registers are then read from `CONFIG_DATA_PORT + (offset & 3)`.
    pub const fn config_address(&self) -> u32 {
        CONFIG_ENABLE
            | ((self.bus as u32) << 16)
            | (((self.device & 0x1f) as u32) << 11)
            | (((self.function & 0x7) as u32) << 8)
            | self.offset as u32
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus: 0x{:02x}, Device: 0x{:02x}, Function: 0x{:02x}, Offset: 0x{:02x}",
            self.bus, self.device, self.function, self.offset
        )
    }
}

impl fmt::Debug for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{:x}+{:02x}",
            self.bus, self.device, self.function, self.offset
        )
    }
}
