use core::ops::{Add, Sub};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x86::bits64::paging::BASE_PAGE_SIZE;

pub trait Address:
    Clone + Copy + PartialEq + Eq + PartialOrd + Ord + fmt::Debug + fmt::Display
{
    /// Get the raw value of the address.
    /// In general, it is concidered bad practice to
    /// do any arithmetic with the raw value.
    fn address(&self) -> u64;
}

const PAGE_MASK: u64 = BASE_PAGE_SIZE as u64 - 1;

// A physical memory address as seen by firmware and /dev/mem.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysicalAddress(u64);
impl Address for PhysicalAddress {
    fn address(&self) -> u64 {
        self.0
    }
}
impl PhysicalAddress {
    pub const fn from_const(value: u64) -> Self {
        PhysicalAddress(value)
    }

    /// The start of the page containing this address.
    pub const fn page_base(&self) -> Self {
        PhysicalAddress(self.0 & !PAGE_MASK)
    }

    /// Offset of this address within its page.
    pub const fn page_offset(&self) -> usize {
        (self.0 & PAGE_MASK) as usize
    }

    /// The first page boundary strictly after this address.
    #[track_caller]
    pub fn next_page(&self) -> Self {
        self.page_base() + BASE_PAGE_SIZE
    }

    /// Like [`PhysicalAddress::next_page`], `None` within the last page.
    pub const fn checked_next_page(&self) -> Option<Self> {
        match self.page_base().0.checked_add(BASE_PAGE_SIZE as u64) {
            Some(value) => Some(PhysicalAddress(value)),
            None => None,
        }
    }

    /// `self + offset`, `None` on overflow. Use this for offsets coming
    /// from firmware tables.
    pub const fn checked_add(&self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(value) => Some(PhysicalAddress(value)),
            None => None,
        }
    }

    /// `self - offset`, `None` on underflow.
    pub const fn checked_sub(&self, offset: u64) -> Option<Self> {
        match self.0.checked_sub(offset) {
            Some(value) => Some(PhysicalAddress(value)),
            None => None,
        }
    }

    /// Signed distance `self - other`, wrapping like the CPU would.
    pub const fn distance_from(&self, other: PhysicalAddress) -> i64 {
        self.0.wrapping_sub(other.0) as i64
    }
}
impl From<u64> for PhysicalAddress {
    fn from(value: u64) -> Self {
        PhysicalAddress::from_const(value)
    }
}
impl From<u32> for PhysicalAddress {
    fn from(value: u32) -> Self {
        PhysicalAddress::from_const(value as u64)
    }
}
impl From<PhysicalAddress> for u64 {
    fn from(value: PhysicalAddress) -> Self {
        value.0
    }
}
impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}
impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{:x}", self.0)
    }
}
impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
impl Add<u64> for PhysicalAddress {
    type Output = Self;

    #[track_caller]
    fn add(self, other: u64) -> Self {
        PhysicalAddress::from_const(self.0 + other)
    }
}
impl Add<usize> for PhysicalAddress {
    type Output = Self;

    #[track_caller]
    fn add(self, other: usize) -> Self {
        PhysicalAddress::from_const(self.0 + other as u64)
    }
}
impl Sub<u64> for PhysicalAddress {
    type Output = Self;

    #[track_caller]
    fn sub(self, other: u64) -> Self {
        PhysicalAddress::from_const(self.0 - other)
    }
}
impl Sub<usize> for PhysicalAddress {
    type Output = Self;

    #[track_caller]
    fn sub(self, other: usize) -> Self {
        PhysicalAddress::from_const(self.0 - other as u64)
    }
}

// Reports are read by humans, so addresses go out as hex strings there.
impl Serialize for PhysicalAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for PhysicalAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            let text = text.trim();
            let text = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            u64::from_str_radix(text, 16)
                .map(PhysicalAddress)
                .map_err(serde::de::Error::custom)
        } else {
            u64::deserialize(deserializer).map(PhysicalAddress)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_page_arithmetic() {
        let tests = vec![
            (0x1234_5678u64, 0x1234_5000u64, 0x678usize, 0x1234_6000u64),
            (0x1000, 0x1000, 0, 0x2000),
            (0xfff, 0x0, 0xfff, 0x1000),
            (0x1_0000_0abc, 0x1_0000_0000, 0xabc, 0x1_0000_1000),
        ];

        for (raw, base, offset, next) in tests {
            let address = PhysicalAddress::from(raw);
            assert_eq!(address.page_base().address(), base, "page base of {raw:x}");
            assert_eq!(address.page_offset(), offset, "page offset of {raw:x}");
            assert_eq!(address.next_page().address(), next, "next page of {raw:x}");
        }
    }

    #[test]
    fn test_checked_arithmetic() {
        let last_page = PhysicalAddress::from(0xffff_ffff_ffff_f100u64);
        assert_eq!(last_page.checked_next_page(), None);
        assert_eq!(last_page.checked_add(0xf00), Some(PhysicalAddress::from(u64::MAX)));
        assert_eq!(last_page.checked_add(0xf00 + 1), None);
        assert_eq!(last_page.checked_sub(0x100), Some(PhysicalAddress::from(0xffff_ffff_ffff_f000u64)));
        assert_eq!(PhysicalAddress::from(0x10u64).checked_sub(0x11), None);

        let address = PhysicalAddress::from(0x1234_5678u64);
        assert_eq!(address.checked_next_page(), Some(address.next_page()));
        assert_eq!(address.checked_add(0x18), Some(address + 0x18u64));
    }

    #[test]
    fn test_distance() {
        let a = PhysicalAddress::from(0x2000u64);
        let b = PhysicalAddress::from(0x1000u64);
        assert_eq!(a.distance_from(b), 0x1000);
        assert_eq!(b.distance_from(a), -0x1000);
    }

    #[test]
    fn test_serde_hex() {
        let address = PhysicalAddress::from(0xdead_b000u64);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0x00000000deadb000\"");
        let back: PhysicalAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
