// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU-addressable allocations.
//!
//! A [`GraphicsAllocation`] is a contiguous range of GPU virtual address space
//! backed by host storage. Allocations are shared as [`AllocationRef`]
//! (`Arc`) between the memory manager, command lists and in-flight
//! submissions; the backing storage lives until the last reference drops.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;

/// Shared handle to an allocation.
pub type AllocationRef = Arc<GraphicsAllocation>;

/// Unique residency handle of an allocation (the buffer-object handle).
pub type AllocationId = u32;

/// What an allocation is used for. Drives VA placement and debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationType {
    Buffer,
    HostPointer,
    UnifiedHost,
    UnifiedDevice,
    UnifiedShared,
    Scratch,
    SurfaceStateHeap,
    DynamicStateHeap,
    IndirectObjectHeap,
    InstructionHeap,
    KernelIsa,
    CommandBuffer,
    RingBuffer,
    TagBuffer,
    EventPool,
    PrintfSurface,
}

impl AllocationType {
    /// Allocations that must live inside the internal-heap window so their
    /// addresses can be expressed relative to the instruction base address.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::KernelIsa | Self::InstructionHeap)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Buffer => "BUFFER",
            Self::HostPointer => "HOST_POINTER",
            Self::UnifiedHost => "SVM_CPU",
            Self::UnifiedDevice => "SVM_GPU",
            Self::UnifiedShared => "SVM_ZERO_COPY",
            Self::Scratch => "SCRATCH_SURFACE",
            Self::SurfaceStateHeap => "SURFACE_STATE_HEAP",
            Self::DynamicStateHeap => "DYNAMIC_STATE_HEAP",
            Self::IndirectObjectHeap => "INDIRECT_OBJECT_HEAP",
            Self::InstructionHeap => "INTERNAL_HEAP",
            Self::KernelIsa => "KERNEL_ISA",
            Self::CommandBuffer => "COMMAND_BUFFER",
            Self::RingBuffer => "RING_BUFFER",
            Self::TagBuffer => "TAG_BUFFER",
            Self::EventPool => "EVENT_POOL",
            Self::PrintfSurface => "PRINTF_SURFACE",
        }
    }
}

/// A GPU virtual address range with host-side backing storage.
pub struct GraphicsAllocation {
    id: AllocationId,
    alloc_type: AllocationType,
    gpu_address: u64,
    /// Base that patched addresses are relative to (instruction base for
    /// internal allocations, 0 otherwise).
    gpu_base_address: u64,
    storage: Mutex<Vec<u8>>,
}

impl GraphicsAllocation {
    pub(crate) fn new(
        id: AllocationId,
        alloc_type: AllocationType,
        gpu_address: u64,
        gpu_base_address: u64,
        size: usize,
    ) -> Self {
        Self {
            id,
            alloc_type,
            gpu_address,
            gpu_base_address,
            storage: Mutex::new(vec![0u8; size]),
        }
    }

    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn allocation_type(&self) -> AllocationType {
        self.alloc_type
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Address as programmed into hardware fields that are relative to a
    /// state base address.
    pub fn gpu_address_to_patch(&self) -> u64 {
        self.gpu_address - self.gpu_base_address
    }

    pub fn gpu_base_address(&self) -> u64 {
        self.gpu_base_address
    }

    pub fn size(&self) -> usize {
        self.storage.lock().len()
    }

    /// Whether `va` falls inside this allocation.
    pub fn contains(&self, va: u64) -> bool {
        va >= self.gpu_address && va < self.gpu_address + self.size() as u64
    }

    /// Whether `[va, va + len)` falls inside this allocation.
    pub fn contains_range(&self, va: u64, len: usize) -> bool {
        va >= self.gpu_address && va + len as u64 <= self.gpu_address + self.size() as u64
    }

    /// Copy `src` into the allocation at byte `offset`.
    ///
    /// Panics if the write exceeds the allocation; callers size their writes
    /// from the allocation's capacity.
    pub fn write(&self, offset: usize, src: &[u8]) {
        let mut storage = self.storage.lock();
        let end = offset + src.len();
        assert!(
            end <= storage.len(),
            "write of {} bytes at 0x{:X} overflows {} allocation of 0x{:X} bytes",
            src.len(),
            offset,
            self.alloc_type.name(),
            storage.len()
        );
        storage[offset..end].copy_from_slice(src);
    }

    /// Copy bytes at `offset` into `dst`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        let storage = self.storage.lock();
        let end = offset + dst.len();
        assert!(
            end <= storage.len(),
            "read of {} bytes at 0x{:X} overflows {} allocation of 0x{:X} bytes",
            dst.len(),
            offset,
            self.alloc_type.name(),
            storage.len()
        );
        dst.copy_from_slice(&storage[offset..end]);
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf);
        LittleEndian::read_u32(&buf)
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(offset, &buf);
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf);
        LittleEndian::read_u64(&buf)
    }

    pub fn write_u64(&self, offset: usize, value: u64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write(offset, &buf);
    }

    /// Fill the whole allocation with `value`.
    pub fn fill(&self, value: u8) {
        self.storage.lock().fill(value);
    }

    /// Snapshot of the first `len` bytes.
    pub fn to_vec(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read(0, &mut out);
        out
    }
}

impl std::fmt::Debug for GraphicsAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsAllocation")
            .field("id", &self.id)
            .field("type", &self.alloc_type.name())
            .field("gpu_address", &format_args!("0x{:X}", self.gpu_address))
            .field("size", &format_args!("0x{:X}", self.size()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_dwords() {
        let alloc = GraphicsAllocation::new(1, AllocationType::Buffer, 0x1000_0000, 0, 64);
        alloc.write_u32(4, 0xDEAD_BEEF);
        alloc.write_u64(8, 0x0123_4567_89AB_CDEF);
        assert_eq!(alloc.read_u32(4), 0xDEAD_BEEF);
        assert_eq!(alloc.read_u64(8), 0x0123_4567_89AB_CDEF);
        assert_eq!(alloc.to_vec(8)[4..8], [0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_patch_address_relative_to_base() {
        let base = 0x7F00_0000_0000;
        let alloc = GraphicsAllocation::new(2, AllocationType::KernelIsa, base + 0x2000, base, 0x1000);
        assert_eq!(alloc.gpu_address_to_patch(), 0x2000);
        assert!(alloc.allocation_type().is_internal());
    }

    #[test]
    fn test_contains() {
        let alloc = GraphicsAllocation::new(3, AllocationType::Buffer, 0x4000, 0, 0x1000);
        assert!(alloc.contains(0x4000));
        assert!(alloc.contains(0x4FFF));
        assert!(!alloc.contains(0x5000));
        assert!(alloc.contains_range(0x4F00, 0x100));
        assert!(!alloc.contains_range(0x4F00, 0x101));
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn test_write_past_end_panics() {
        let alloc = GraphicsAllocation::new(4, AllocationType::Buffer, 0x4000, 0, 16);
        alloc.write(12, &[0u8; 8]);
    }
}
