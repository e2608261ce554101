// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Scratch surface management for one engine context.
//!
//! The surface holds one slot per hardware thread. Slots are a power of two
//! of at least 1 KiB, the granularity MEDIA_VFE_STATE can express.

use std::sync::Arc;

use xe_common::DriverResult;

use crate::allocation::{AllocationRef, AllocationType};
use crate::memory_manager::MemoryManager;

pub const MIN_PER_THREAD_SCRATCH: u32 = 1024;

/// Per-thread slot size for a kernel requirement.
pub fn per_thread_slot_size(required: u32) -> u32 {
    required.max(MIN_PER_THREAD_SCRATCH).next_power_of_two()
}

#[derive(Debug)]
pub struct ScratchSpaceController {
    memory_manager: Arc<MemoryManager>,
    compute_units: u32,
    per_thread_size: u32,
    allocation: Option<AllocationRef>,
}

impl ScratchSpaceController {
    pub fn new(memory_manager: Arc<MemoryManager>, compute_units: u32) -> Self {
        Self {
            memory_manager,
            compute_units: compute_units.max(1),
            per_thread_size: 0,
            allocation: None,
        }
    }

    /// Make sure a surface with `required` bytes per thread is bound.
    ///
    /// Returns `true` when a new surface was allocated, meaning
    /// MEDIA_VFE_STATE has to be reprogrammed. The previous surface is
    /// released to the memory manager; in-flight batches keep it alive
    /// through their residency.
    pub fn ensure(&mut self, required: u32) -> DriverResult<bool> {
        if required == 0 {
            return Ok(false);
        }
        let slot = per_thread_slot_size(required);
        if slot <= self.per_thread_size {
            return Ok(false);
        }
        let size = slot as usize * self.compute_units as usize;
        let allocation = self.memory_manager.allocate(AllocationType::Scratch, size, 1024)?;
        log::debug!(
            "scratch: 0x{:X} bytes/thread x {} threads at 0x{:X}",
            slot,
            self.compute_units,
            allocation.gpu_address()
        );
        if let Some(old) = self.allocation.replace(allocation) {
            self.memory_manager.free(&old);
        }
        self.per_thread_size = slot;
        Ok(true)
    }

    /// Bound per-thread size, 0 before the first kernel needing scratch.
    pub fn per_thread_size(&self) -> u32 {
        self.per_thread_size
    }

    pub fn allocation(&self) -> Option<&AllocationRef> {
        self.allocation.as_ref()
    }

    pub fn gpu_address(&self) -> u64 {
        self.allocation.as_ref().map_or(0, |a| a.gpu_address())
    }
}

impl Drop for ScratchSpaceController {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.memory_manager.free(&allocation);
        }
    }
}
