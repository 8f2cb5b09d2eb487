//! Access to physical memory

use crate::error::MemoryError;
use data_types::{Address, PhysicalAddress};
use std::collections::BTreeMap;
use x86::bits64::paging::BASE_PAGE_SIZE;

/// Read/write access to physical memory by address range.
///
/// Every call is one blocking device transaction. Implementations take care
/// of any alignment the underlying device needs.
pub trait MemoryPort {
    fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError>;

    fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError>;

    /// Sets `length` bytes at `address` to `value`.
    fn fill(&mut self, address: PhysicalAddress, length: usize, value: u8) -> Result<(), MemoryError> {
        self.write(address, &vec![value; length])
    }
}

impl<M: MemoryPort + ?Sized> MemoryPort for &mut M {
    fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError> {
        (**self).read(address, length)
    }

    fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
        (**self).write(address, data)
    }

    fn fill(&mut self, address: PhysicalAddress, length: usize, value: u8) -> Result<(), MemoryError> {
        (**self).fill(address, length, value)
    }
}

/// Page granular in-memory physical address space.
///
/// Pages come into existence on first write. Reading a page that was never
/// written returns the fill byte.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct SparseMemory {
    fill: u8,
    #[derivative(Debug = "ignore")]
    pages: BTreeMap<u64, Box<[u8; BASE_PAGE_SIZE]>>,
}

impl Default for SparseMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::with_fill(0)
    }

    pub fn with_fill(fill: u8) -> Self {
        SparseMemory {
            fill,
            pages: BTreeMap::new(),
        }
    }

    /// Number of pages that were written to.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Walks `[address, address + length)` page by page, handing out the page
    /// number, the offset within the page and the offset within the range.
    fn chunks(
        address: PhysicalAddress,
        length: usize,
    ) -> Result<impl Iterator<Item = (u64, usize, core::ops::Range<usize>)>, MemoryError> {
        let start = address.address();
        start
            .checked_add(length as u64)
            .ok_or(MemoryError::Unmapped { address, length })?;

        let mut done = 0usize;
        Ok(core::iter::from_fn(move || {
            if done >= length {
                return None;
            }
            let current = start + done as u64;
            let in_page = (current % BASE_PAGE_SIZE as u64) as usize;
            let step = (BASE_PAGE_SIZE - in_page).min(length - done);
            let chunk = (current / BASE_PAGE_SIZE as u64, in_page, done..done + step);
            done += step;
            Some(chunk)
        }))
    }
}

impl MemoryPort for SparseMemory {
    fn read(&mut self, address: PhysicalAddress, length: usize) -> Result<Vec<u8>, MemoryError> {
        let mut data = vec![self.fill; length];
        for (page, in_page, range) in Self::chunks(address, length)? {
            if let Some(page) = self.pages.get(&page) {
                data[range.clone()].copy_from_slice(&page[in_page..in_page + range.len()]);
            }
        }
        Ok(data)
    }

    fn write(&mut self, address: PhysicalAddress, data: &[u8]) -> Result<(), MemoryError> {
        let fill = self.fill;
        for (page, in_page, range) in Self::chunks(address, data.len())? {
            let page = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([fill; BASE_PAGE_SIZE]));
            page[in_page..in_page + range.len()].copy_from_slice(&data[range]);
        }
        Ok(())
    }
}
