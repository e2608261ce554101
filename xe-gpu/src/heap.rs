// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Indirect heaps and their base-address dirty state.
//!
//! The dispatch hardware reads surface state, dynamic state and indirect
//! object data relative to base addresses programmed by STATE_BASE_ADDRESS.
//! Each heap kind carries a dirty flag that is raised whenever its backing
//! allocation changes and cleared only by the base-address flush in the
//! encoder.

use xe_common::align_up_usize;

use crate::allocation::{AllocationRef, AllocationType};

/// Heap kinds addressed through STATE_BASE_ADDRESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HeapType {
    DynamicState = 0,
    IndirectObject = 1,
    SurfaceState = 2,
    Instruction = 3,
}

impl HeapType {
    pub const COUNT: usize = 4;

    pub const ALL: [HeapType; Self::COUNT] = [
        Self::DynamicState,
        Self::IndirectObject,
        Self::SurfaceState,
        Self::Instruction,
    ];

    /// Allocation type backing a heap of this kind.
    pub fn allocation_type(self) -> AllocationType {
        match self {
            Self::DynamicState => AllocationType::DynamicStateHeap,
            Self::IndirectObject => AllocationType::IndirectObjectHeap,
            Self::SurfaceState => AllocationType::SurfaceStateHeap,
            Self::Instruction => AllocationType::InstructionHeap,
        }
    }
}

/// Per-heap-kind "base address changed since the last flush" flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDirtyState {
    dirty: [bool; HeapType::COUNT],
}

impl HeapDirtyState {
    /// Every heap starts dirty: no base address has been programmed yet.
    pub fn new() -> Self {
        Self {
            dirty: [true; HeapType::COUNT],
        }
    }

    pub fn is_dirty(&self, heap: HeapType) -> bool {
        self.dirty[heap as usize]
    }

    pub fn set_dirty(&mut self, heap: HeapType) {
        self.dirty[heap as usize] = true;
    }

    pub fn is_any_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }

    pub fn set_all_dirty(&mut self) {
        self.dirty = [true; HeapType::COUNT];
    }

    pub(crate) fn clear_all(&mut self) {
        self.dirty = [false; HeapType::COUNT];
    }
}

impl Default for HeapDirtyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear sub-allocator over one backing allocation.
#[derive(Debug)]
pub struct IndirectHeap {
    heap_type: HeapType,
    allocation: AllocationRef,
    used: usize,
}

impl IndirectHeap {
    pub fn new(heap_type: HeapType, allocation: AllocationRef) -> Self {
        Self {
            heap_type,
            allocation,
            used: 0,
        }
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    /// Base address programmed into STATE_BASE_ADDRESS.
    pub fn gpu_base(&self) -> u64 {
        self.allocation.gpu_address()
    }

    pub fn capacity(&self) -> usize {
        self.allocation.size()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    /// Whether `size` bytes fit after aligning the offset to `alignment`.
    pub fn fits(&self, size: usize, alignment: usize) -> bool {
        align_up_usize(self.used, alignment.max(1)) + size <= self.capacity()
    }

    /// Bump the used offset to `alignment`.
    pub fn align(&mut self, alignment: usize) {
        self.used = align_up_usize(self.used, alignment.max(1)).min(self.capacity());
    }

    /// Reserve `size` bytes and return their heap-relative offset.
    ///
    /// Returns `None` when the heap is exhausted; the caller grows the heap.
    pub fn get_space(&mut self, size: usize) -> Option<usize> {
        if self.used + size > self.capacity() {
            return None;
        }
        let offset = self.used;
        self.used += size;
        Some(offset)
    }

    /// Copy `data` into the heap at a previously reserved offset.
    pub fn write(&self, offset: usize, data: &[u8]) {
        self.allocation.write(offset, data);
    }

    /// Attach a new backing allocation and return the retired one.
    pub fn replace_allocation(&mut self, allocation: AllocationRef) -> AllocationRef {
        self.used = 0;
        std::mem::replace(&mut self.allocation, allocation)
    }

    /// Rewind to empty without touching the allocation.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}
