//! Search for unused memory next to a hook target
//!
//! Code pages often end in zero padding. The trampoline is placed in the tail
//! of such a page so it stays within reach of a 32-bit relative jump.

use crate::error::{HookError, Result};
use crate::memory::MemoryPort;
use data_types::PhysicalAddress;
use log::{debug, trace};
use x86::bits64::paging::BASE_PAGE_SIZE;

/// How far past the target the search goes before giving up.
pub const DEFAULT_SCAN_LIMIT: u64 = 1024 * 1024;

/// Finds `size` zero bytes at the end of a page, starting with the page that
/// contains `near` and moving forward one page at a time.
///
/// Returns the start of the zero run.
pub fn find_free_region<M: MemoryPort + ?Sized>(
    memory: &mut M,
    near: PhysicalAddress,
    size: usize,
    limit: u64,
) -> Result<PhysicalAddress> {
    // the scan ends at the top of the address space
    let mut page_end = near.checked_next_page();
    let mut scanned = 0u64;

    while let Some(end) = page_end.filter(|_| scanned < limit) {
        if let Some(candidate) = end.checked_sub(size as u64) {
            let data = memory.read(candidate, size)?;
            if data.iter().all(|byte| *byte == 0) {
                debug!(
                    "found 0x{:x} free bytes at {} ({} past the page of {})",
                    size, candidate, scanned, near
                );
                return Ok(candidate);
            }
            trace!("tail of the page ending at {} is in use", end);
        }

        page_end = end.checked_add(BASE_PAGE_SIZE as u64);
        scanned += BASE_PAGE_SIZE as u64;
    }

    Err(HookError::NoFreeMemory { near, size, limit })
}
