// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU virtual address space and allocation tracking.
//!
//! Hands out allocations from two bump-allocated windows: the general
//! 48-bit range and a 4 GiB internal-heap window that kernel ISA and the
//! instruction heap live in. Also owns the unified-memory registry that
//! indirect-access kernels resolve residency from.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;
use thiserror::Error;
use xe_common::{align_up, DriverError, DriverResult, PAGE_SIZE_U64};

use crate::allocation::{AllocationId, AllocationRef, AllocationType, GraphicsAllocation};
use crate::residency::ResidencyContainer;

/// Start of the general-purpose GPU VA range (skip the zero page region).
pub const GENERAL_VA_BASE: u64 = 0x0000_0001_0000_0000;

/// End of the general-purpose GPU VA range.
pub const GENERAL_VA_LIMIT: u64 = 0x0000_7F00_0000_0000;

/// Base of the internal-heap window (instruction base address).
pub const INTERNAL_HEAP_BASE: u64 = 0x0000_7F00_0000_0000;

/// Size of the internal-heap window. Kernel start pointers are 32-bit offsets.
pub const INTERNAL_HEAP_SIZE: u64 = 4 << 30;

/// Errors from raw GPU-VA accesses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryFault {
    #[error("unmapped GPU address 0x{0:X}")]
    Unmapped(u64),

    #[error("access 0x{va:X}+0x{len:X} crosses the end of its allocation")]
    OutOfBounds { va: u64, len: usize },
}

pub type MemoryFaultResult<T> = Result<T, MemoryFault>;

// ── Unified memory ─────────────────────────────────────────────────────────

/// Kind of a unified (SVM) allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnifiedMemoryType {
    Host,
    Device,
    Shared,
}

impl UnifiedMemoryType {
    fn allocation_type(self) -> AllocationType {
        match self {
            Self::Host => AllocationType::UnifiedHost,
            Self::Device => AllocationType::UnifiedDevice,
            Self::Shared => AllocationType::UnifiedShared,
        }
    }

    fn mask(self) -> UnifiedMemoryMask {
        match self {
            Self::Host => UnifiedMemoryMask::HOST,
            Self::Device => UnifiedMemoryMask::DEVICE,
            Self::Shared => UnifiedMemoryMask::SHARED,
        }
    }
}

bitflags! {
    /// Which unified-memory kinds a kernel may access indirectly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UnifiedMemoryMask: u32 {
        const HOST = 1 << 0;
        const DEVICE = 1 << 1;
        const SHARED = 1 << 2;
    }
}

struct UnifiedEntry {
    memory_type: UnifiedMemoryType,
    allocation: AllocationRef,
}

// ── Address space ──────────────────────────────────────────────────────────

struct AddressSpace {
    next_va: u64,
    next_internal_va: u64,
    /// Start VA → allocation. Weak so that freeing is driven by the owners.
    allocations: BTreeMap<u64, Weak<GraphicsAllocation>>,
    used_bytes: u64,
}

/// Owner of GPU VA space and the indirect-allocation registry.
pub struct MemoryManager {
    space: Mutex<AddressSpace>,
    unified: Mutex<HashMap<AllocationId, UnifiedEntry>>,
    next_id: AtomicU32,
    budget: Option<u64>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            space: Mutex::new(AddressSpace {
                next_va: GENERAL_VA_BASE,
                next_internal_va: INTERNAL_HEAP_BASE,
                allocations: BTreeMap::new(),
                used_bytes: 0,
            }),
            unified: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            budget: None,
        }
    }

    /// Memory manager that fails allocations once `bytes` are in use.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Base address of the internal-heap window.
    pub fn internal_heap_base(&self) -> u64 {
        INTERNAL_HEAP_BASE
    }

    /// Allocate `size` bytes of GPU memory.
    pub fn allocate(
        &self,
        alloc_type: AllocationType,
        size: usize,
        alignment: usize,
    ) -> DriverResult<AllocationRef> {
        if size == 0 {
            return Err(DriverError::InvalidSize(format!(
                "zero-sized {} allocation",
                alloc_type.name()
            )));
        }
        if !alignment.is_power_of_two() {
            return Err(DriverError::invalid_argument(format!(
                "alignment 0x{:X} is not a power of two",
                alignment
            )));
        }

        let alignment = (alignment as u64).max(PAGE_SIZE_U64);
        let reserved = align_up(size as u64, PAGE_SIZE_U64);

        let mut space = self.space.lock();
        if let Some(budget) = self.budget {
            if space.used_bytes + reserved > budget {
                log::warn!(
                    "memory_manager: out of device memory (used 0x{:X}, requested 0x{:X}, budget 0x{:X})",
                    space.used_bytes,
                    reserved,
                    budget
                );
                return Err(DriverError::OutOfDeviceMemory {
                    requested: size as u64,
                });
            }
        }

        let (gpu_address, base) = if alloc_type.is_internal() {
            let va = align_up(space.next_internal_va, alignment);
            if va + reserved > INTERNAL_HEAP_BASE + INTERNAL_HEAP_SIZE {
                return Err(DriverError::OutOfDeviceMemory {
                    requested: size as u64,
                });
            }
            space.next_internal_va = va + reserved;
            (va, INTERNAL_HEAP_BASE)
        } else {
            let va = align_up(space.next_va, alignment);
            if va + reserved > GENERAL_VA_LIMIT {
                return Err(DriverError::OutOfDeviceMemory {
                    requested: size as u64,
                });
            }
            space.next_va = va + reserved;
            (va, 0)
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let allocation = Arc::new(GraphicsAllocation::new(
            id,
            alloc_type,
            gpu_address,
            base,
            size,
        ));
        space
            .allocations
            .insert(gpu_address, Arc::downgrade(&allocation));
        space.used_bytes += reserved;

        log::trace!(
            "memory_manager: allocate {} id={} va=0x{:X} size=0x{:X}",
            alloc_type.name(),
            id,
            gpu_address,
            size
        );
        Ok(allocation)
    }

    /// Release the manager's tracking of `allocation`.
    ///
    /// Backing storage survives while residency containers or in-flight
    /// submissions still hold a reference.
    pub fn free(&self, allocation: &AllocationRef) {
        {
            let mut space = self.space.lock();
            if space.allocations.remove(&allocation.gpu_address()).is_some() {
                space.used_bytes = space
                    .used_bytes
                    .saturating_sub(align_up(allocation.size() as u64, PAGE_SIZE_U64));
            }
        }
        self.unified.lock().remove(&allocation.id());
        log::trace!(
            "memory_manager: free {} id={} va=0x{:X}",
            allocation.allocation_type().name(),
            allocation.id(),
            allocation.gpu_address()
        );
    }

    /// Bytes currently reserved (page granular).
    pub fn used_bytes(&self) -> u64 {
        self.space.lock().used_bytes
    }

    /// Find the live allocation containing `va`.
    pub fn find_allocation(&self, va: u64) -> Option<AllocationRef> {
        let space = self.space.lock();
        let (_, weak) = space.allocations.range(..=va).next_back()?;
        let allocation = weak.upgrade()?;
        allocation.contains(va).then_some(allocation)
    }

    /// Read GPU memory at `va` into `dst`. The range must not span allocations.
    pub fn read(&self, va: u64, dst: &mut [u8]) -> MemoryFaultResult<()> {
        let allocation = self.find_allocation(va).ok_or(MemoryFault::Unmapped(va))?;
        if !allocation.contains_range(va, dst.len()) {
            return Err(MemoryFault::OutOfBounds { va, len: dst.len() });
        }
        allocation.read((va - allocation.gpu_address()) as usize, dst);
        Ok(())
    }

    /// Write `src` to GPU memory at `va`. The range must not span allocations.
    pub fn write(&self, va: u64, src: &[u8]) -> MemoryFaultResult<()> {
        let allocation = self.find_allocation(va).ok_or(MemoryFault::Unmapped(va))?;
        if !allocation.contains_range(va, src.len()) {
            return Err(MemoryFault::OutOfBounds { va, len: src.len() });
        }
        allocation.write((va - allocation.gpu_address()) as usize, src);
        Ok(())
    }

    // ── Unified memory registry ──

    /// Allocate unified memory and register it for indirect access.
    pub fn allocate_unified(
        &self,
        memory_type: UnifiedMemoryType,
        size: usize,
        alignment: usize,
    ) -> DriverResult<AllocationRef> {
        let allocation = self.allocate(memory_type.allocation_type(), size, alignment)?;
        self.unified.lock().insert(
            allocation.id(),
            UnifiedEntry {
                memory_type,
                allocation: allocation.clone(),
            },
        );
        Ok(allocation)
    }

    /// Snapshot of the registered allocations whose kind is in `mask`.
    pub fn indirect_allocations_matching(&self, mask: UnifiedMemoryMask) -> Vec<AllocationRef> {
        if mask.is_empty() {
            return Vec::new();
        }
        let unified = self.unified.lock();
        let mut matching: Vec<AllocationRef> = unified
            .values()
            .filter(|entry| mask.contains(entry.memory_type.mask()))
            .map(|entry| entry.allocation.clone())
            .collect();
        matching.sort_by_key(|a| a.id());
        matching
    }

    /// Append every registered allocation matching `mask` to `container`.
    pub fn add_indirect_allocations_to_residency(
        &self,
        container: &mut ResidencyContainer,
        mask: UnifiedMemoryMask,
    ) {
        let matching = self.indirect_allocations_matching(mask);
        log::trace!(
            "memory_manager: {} indirect allocations for mask {:?}",
            matching.len(),
            mask
        );
        container.extend(matching.iter());
    }

    /// Number of allocations in the unified registry.
    pub fn unified_allocation_count(&self) -> usize {
        self.unified.lock().len()
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("used_bytes", &self.used_bytes())
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}
