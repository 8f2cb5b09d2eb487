use crate::error::{HookError, Result};
use crate::jump::{jump_rel32, JUMP_REL32_LEN};
use crate::memory::MemoryPort;
use crate::prologue::{measure_prologue, PROLOGUE_READ_LEN};
use crate::region::{self, DEFAULT_SCAN_LIMIT};
use data_types::{Address, PhysicalAddress};
use log::{debug, error, info, trace, warn};

/// An installed hook, as returned by [`CodePatcher::patch`].
///
/// Holds everything needed to undo the patch. Restoring it a second time does
/// nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPatch {
    target: PhysicalAddress,
    saved: Vec<u8>,
    trampoline_address: PhysicalAddress,
    trampoline_size: usize,
    restored: bool,
}

impl HookPatch {
    pub fn target(&self) -> PhysicalAddress {
        self.target
    }

    /// Length of the relocated instructions, at least a near jump.
    pub fn prologue_len(&self) -> usize {
        self.saved.len()
    }

    /// The original bytes of the relocated instructions.
    pub fn saved(&self) -> &[u8] {
        &self.saved
    }

    pub fn trampoline_address(&self) -> PhysicalAddress {
        self.trampoline_address
    }

    /// Payload, relocated instructions and the jump back.
    pub fn trampoline_size(&self) -> usize {
        self.trampoline_size
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }
}

/// Disassembly guided function hooking on top of a [`MemoryPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePatcher {
    bitness: u32,
    scan_limit: u64,
}

impl Default for CodePatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

impl CodePatcher {
    /// `bitness` is the mode the hooked code runs in.
    pub fn new(bitness: u32) -> Self {
        Self {
            bitness,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Limits how far past the target [`CodePatcher::find_free_region`] looks.
    pub fn with_scan_limit(mut self, scan_limit: u64) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    pub fn scan_limit(&self) -> u64 {
        self.scan_limit
    }

    /// Number of bytes at `address` that can be moved to a trampoline and
    /// replaced by a near jump.
    pub fn measure_safe_prologue<M: MemoryPort + ?Sized>(
        &self,
        memory: &mut M,
        address: PhysicalAddress,
    ) -> Result<usize> {
        let code = memory.read(address, PROLOGUE_READ_LEN)?;
        measure_prologue(&code, address.address(), self.bitness)
    }

    pub fn find_free_region<M: MemoryPort + ?Sized>(
        &self,
        memory: &mut M,
        near: PhysicalAddress,
        size: usize,
    ) -> Result<PhysicalAddress> {
        region::find_free_region(memory, near, size, self.scan_limit)
    }

    /// Redirects the function at `target` through `payload`.
    ///
    /// Nothing is written unless the prologue is safe to move and a free
    /// region was found. If the trampoline or the entry jump cannot be
    /// written, whatever landed is removed again before the error is returned.
    pub fn patch<M: MemoryPort + ?Sized>(
        &self,
        memory: &mut M,
        target: PhysicalAddress,
        payload: &[u8],
    ) -> Result<HookPatch> {
        let code = memory.read(target, PROLOGUE_READ_LEN)?;
        let prologue_len = measure_prologue(&code, target.address(), self.bitness)?;
        let saved = code[..prologue_len].to_vec();
        debug!(
            "relocating {} bytes of {}: {:02x?}",
            prologue_len, target, saved
        );

        let trampoline_size = payload.len() + prologue_len + JUMP_REL32_LEN;
        let trampoline_address = self.find_free_region(memory, target, trampoline_size)?;

        let resume = target
            .checked_add(prologue_len as u64)
            .ok_or(HookError::AddressOverflow {
                address: target,
                offset: prologue_len,
            })?;
        // stays inside the free region
        let return_jump = jump_rel32(trampoline_address + payload.len() + prologue_len, resume)?;
        let entry_jump = jump_rel32(target, trampoline_address)?;

        let mut trampoline = Vec::with_capacity(trampoline_size);
        trampoline.extend_from_slice(payload);
        trampoline.extend_from_slice(&saved);
        trampoline.extend_from_slice(&return_jump);

        trace!("writing trampoline to {}", trampoline_address);
        if let Err(err) = memory.write(trampoline_address, &trampoline) {
            // the region was free before, leave it that way
            clear_trampoline(memory, trampoline_address, trampoline_size);
            return Err(err.into());
        }

        trace!("writing entry jump to {}", target);
        if let Err(err) = memory.write(target, &entry_jump) {
            // the entry write may have landed partially
            if let Err(restore) = memory.write(target, &saved) {
                warn!("unable to restore {} after a failed patch: {}", target, restore);
            }
            clear_trampoline(memory, trampoline_address, trampoline_size);
            return Err(err.into());
        }

        info!(
            "hooked {} with a 0x{:x} byte trampoline at {}",
            target, trampoline_size, trampoline_address
        );

        Ok(HookPatch {
            target,
            saved,
            trampoline_address,
            trampoline_size,
            restored: false,
        })
    }

    /// Writes the saved bytes back and clears the trampoline.
    ///
    /// Both steps are attempted even if one fails; the first error is
    /// returned and the patch stays unrestored so it can be retried.
    pub fn unpatch<M: MemoryPort + ?Sized>(&self, memory: &mut M, patch: &mut HookPatch) -> Result<()> {
        if patch.restored {
            trace!("hook at {} is already restored", patch.target);
            return Ok(());
        }

        let restore = memory.write(patch.target, &patch.saved);
        if let Err(err) = &restore {
            error!("unable to restore the original code at {}: {}", patch.target, err);
        }
        let clear = memory.fill(patch.trampoline_address, patch.trampoline_size, 0);
        if let Err(err) = &clear {
            error!(
                "unable to clear the trampoline at {}: {}",
                patch.trampoline_address, err
            );
        }
        restore.and(clear).map_err(HookError::from)?;

        patch.restored = true;
        info!("removed hook at {}", patch.target);
        Ok(())
    }
}

fn clear_trampoline<M: MemoryPort + ?Sized>(memory: &mut M, address: PhysicalAddress, size: usize) {
    if let Err(err) = memory.fill(address, size, 0) {
        warn!(
            "unable to clear the trampoline at {} after a failed patch: {}",
            address, err
        );
    }
}

/// A hook that is removed when the guard goes out of scope.
///
/// The guard owns the memory borrow for its lifetime, so all access while the
/// hook is live goes through [`HookGuard::memory`].
pub struct HookGuard<'a, M: MemoryPort + ?Sized> {
    patcher: &'a CodePatcher,
    memory: &'a mut M,
    patch: HookPatch,
}

impl<'a, M: MemoryPort + ?Sized> HookGuard<'a, M> {
    pub fn install(
        patcher: &'a CodePatcher,
        memory: &'a mut M,
        target: PhysicalAddress,
        payload: &[u8],
    ) -> Result<Self> {
        let patch = patcher.patch(&mut *memory, target, payload)?;
        Ok(Self {
            patcher,
            memory,
            patch,
        })
    }

    pub fn patch(&self) -> &HookPatch {
        &self.patch
    }

    pub fn memory(&mut self) -> &mut M {
        &mut *self.memory
    }

    /// Removes the hook now and reports whether that worked.
    pub fn restore(mut self) -> Result<HookPatch> {
        self.patcher.unpatch(&mut *self.memory, &mut self.patch)?;
        Ok(self.patch.clone())
    }
}

impl<M: MemoryPort + ?Sized> Drop for HookGuard<'_, M> {
    fn drop(&mut self) {
        if self.patch.is_restored() {
            return;
        }
        warn!("hook at {} still installed, removing it", self.patch.target);
        if let Err(err) = self.patcher.unpatch(&mut *self.memory, &mut self.patch) {
            error!("hook at {} could not be removed: {}", self.patch.target, err);
        }
    }
}
