//! Address types shared by the boot script decoder, the hook engine and the
//! exploit test itself.

pub mod addresses;
pub mod pci;

pub use addresses::{Address, PhysicalAddress};
pub use pci::PciAddress;
