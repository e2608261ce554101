// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Storage behind one command list: chained command buffers, the
//! surface/dynamic/indirect-object heaps, and the residency container.
//!
//! Instruction state lives in the device-wide internal heap; only its base
//! address and dirty flag are tracked here.

use std::sync::Arc;

use xe_common::settings::Settings;
use xe_common::{align_up_usize, DriverError, DriverResult, CACHELINE_SIZE};

use crate::allocation::{AllocationRef, AllocationType};
use crate::heap::{HeapDirtyState, HeapType, IndirectHeap};
use crate::hw::commands::{BaseAddress, InterfaceDescriptorData, StateBaseAddress, MI_BATCH_BUFFER_END};
use crate::linear_stream::LinearStream;
use crate::memory_manager::MemoryManager;
use crate::residency::ResidencyContainer;

/// Bytes reserved at the end of every command buffer for the terminator.
pub const BATCH_BUFFER_END_SIZE: usize = 4;

/// Interface descriptor slot reserved for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IddSlot {
    /// Offset of the descriptor in the dynamic-state heap.
    pub heap_offset: usize,
    /// Index within the current block, programmed into the walker.
    pub index: u32,
    /// The block is new and must be loaded before the walker.
    pub new_block: bool,
}

#[derive(Debug)]
pub struct CommandContainer {
    memory_manager: Arc<MemoryManager>,
    copy_only: bool,
    command_buffer_size: usize,
    heap_size: usize,
    command_buffers: Vec<AllocationRef>,
    stream: LinearStream,
    heaps: [Option<IndirectHeap>; HeapType::COUNT],
    dirty: HeapDirtyState,
    residency: ResidencyContainer,
    retired_heaps: Vec<AllocationRef>,
    /// Data the recorded commands read, such as fill patterns.
    staging: Vec<AllocationRef>,
    instruction_heap_base: u64,
    slm_size: Option<u32>,
    num_idd_per_block: u32,
    idd_block_offset: Option<usize>,
    next_idd_in_block: u32,
}

impl CommandContainer {
    pub fn new(memory_manager: Arc<MemoryManager>, settings: &Settings, copy_only: bool) -> DriverResult<Self> {
        let first = memory_manager.allocate(
            AllocationType::CommandBuffer,
            settings.command_buffer_size,
            CACHELINE_SIZE,
        )?;
        let mut heaps: [Option<IndirectHeap>; HeapType::COUNT] = [None, None, None, None];
        if !copy_only {
            for heap_type in [HeapType::DynamicState, HeapType::IndirectObject, HeapType::SurfaceState] {
                let allocation = memory_manager.allocate(heap_type.allocation_type(), settings.heap_size, CACHELINE_SIZE)?;
                heaps[heap_type as usize] = Some(IndirectHeap::new(heap_type, allocation));
            }
        }

        let mut container = Self {
            instruction_heap_base: memory_manager.internal_heap_base(),
            memory_manager,
            copy_only,
            command_buffer_size: settings.command_buffer_size,
            heap_size: settings.heap_size,
            stream: LinearStream::new(first.clone()),
            command_buffers: vec![first],
            heaps,
            dirty: HeapDirtyState::new(),
            residency: ResidencyContainer::new(),
            retired_heaps: Vec::new(),
            staging: Vec::new(),
            slm_size: None,
            num_idd_per_block: settings.num_idd_per_block.clamp(1, 64),
            idd_block_offset: None,
            next_idd_in_block: 0,
        };
        container.add_owned_allocations_to_residency();
        Ok(container)
    }

    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.memory_manager
    }

    pub fn is_copy_only(&self) -> bool {
        self.copy_only
    }

    // ── Command buffers ──

    pub fn stream(&self) -> &LinearStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut LinearStream {
        &mut self.stream
    }

    /// Every command buffer of the list, in execution order.
    pub fn command_buffers(&self) -> &[AllocationRef] {
        &self.command_buffers
    }

    /// Chain to a fresh command buffer unless `size` bytes remain.
    ///
    /// `size` must include [`BATCH_BUFFER_END_SIZE`].
    pub fn ensure_space(&mut self, size: usize) -> DriverResult<()> {
        if self.stream.available_space() < size {
            self.close_and_allocate_next_command_buffer()?;
        }
        Ok(())
    }

    /// Terminate the current buffer and continue in a new one.
    pub fn close_and_allocate_next_command_buffer(&mut self) -> DriverResult<()> {
        let next = self.memory_manager.allocate(
            AllocationType::CommandBuffer,
            self.command_buffer_size,
            CACHELINE_SIZE,
        )?;
        self.stream.write_dwords(&[MI_BATCH_BUFFER_END]);
        log::debug!(
            "container: command buffer {} full (0x{:X} used), continuing at 0x{:X}",
            self.command_buffers.len() - 1,
            self.stream.used(),
            next.gpu_address()
        );
        self.residency.add(&next);
        self.stream.replace_buffer(next.clone());
        self.command_buffers.push(next);
        Ok(())
    }

    /// Terminate the last command buffer.
    pub fn close(&mut self) {
        self.stream.write_dwords(&[MI_BATCH_BUFFER_END]);
    }

    // ── Heaps ──

    pub fn heap(&self, heap_type: HeapType) -> Option<&IndirectHeap> {
        self.heaps[heap_type as usize].as_ref()
    }

    /// Reserve `size` bytes aligned to `alignment`, growing the heap when it
    /// is exhausted. Returns the heap-relative offset.
    pub fn get_heap_space(&mut self, heap_type: HeapType, size: usize, alignment: usize) -> DriverResult<usize> {
        let fits = match self.heap(heap_type) {
            Some(heap) => heap.fits(size, alignment),
            None => return Err(missing_heap(heap_type)),
        };
        if !fits {
            self.grow_heap(heap_type, size + alignment)?;
        }
        let heap = self.heaps[heap_type as usize]
            .as_mut()
            .ok_or_else(|| missing_heap(heap_type))?;
        heap.align(alignment);
        heap.get_space(size).ok_or(DriverError::OutOfDeviceMemory {
            requested: size as u64,
        })
    }

    fn grow_heap(&mut self, heap_type: HeapType, min_size: usize) -> DriverResult<()> {
        let size = self.heap_size.max(align_up_usize(min_size, CACHELINE_SIZE));
        let allocation = self
            .memory_manager
            .allocate(heap_type.allocation_type(), size, CACHELINE_SIZE)?;
        self.residency.add(&allocation);
        if let Some(heap) = self.heaps[heap_type as usize].as_mut() {
            let old = heap.replace_allocation(allocation);
            log::debug!(
                "container: {:?} heap grown, 0x{:X} -> 0x{:X} (0x{:X} bytes)",
                heap_type,
                old.gpu_address(),
                heap.gpu_base(),
                size
            );
            // Still referenced by commands already encoded.
            self.retired_heaps.push(old);
        }
        self.dirty.set_dirty(heap_type);
        if heap_type == HeapType::DynamicState {
            self.idd_block_offset = None;
        }
        Ok(())
    }

    /// Copy `data` into `heap_type` at a reserved offset.
    pub fn write_heap(&self, heap_type: HeapType, offset: usize, data: &[u8]) {
        if let Some(heap) = self.heap(heap_type) {
            heap.write(offset, data);
        }
    }

    pub fn heap_gpu_base(&self, heap_type: HeapType) -> u64 {
        match heap_type {
            HeapType::Instruction => self.instruction_heap_base,
            _ => self.heap(heap_type).map_or(0, |h| h.gpu_base()),
        }
    }

    pub fn instruction_heap_base(&self) -> u64 {
        self.instruction_heap_base
    }

    pub fn dirty_heaps(&self) -> &HeapDirtyState {
        &self.dirty
    }

    /// Only the base-address flush in the encoder clears dirty state.
    pub(crate) fn clear_dirty_heaps(&mut self) {
        self.dirty.clear_all();
    }

    /// STATE_BASE_ADDRESS covering the heaps currently marked dirty.
    pub fn state_base_address_for_dirty_heaps(&self) -> StateBaseAddress {
        let base_of = |heap_type: HeapType| -> Option<BaseAddress> {
            if !self.dirty.is_dirty(heap_type) {
                return None;
            }
            match heap_type {
                HeapType::Instruction => Some(BaseAddress {
                    base: self.instruction_heap_base,
                    size: u32::MAX,
                }),
                _ => self.heap(heap_type).map(|h| BaseAddress {
                    base: h.gpu_base(),
                    size: h.capacity() as u32,
                }),
            }
        };
        StateBaseAddress {
            general_state: Some(BaseAddress { base: 0, size: u32::MAX }),
            surface_state: base_of(HeapType::SurfaceState).map(|b| b.base),
            dynamic_state: base_of(HeapType::DynamicState),
            indirect_object: base_of(HeapType::IndirectObject),
            instruction: base_of(HeapType::Instruction),
            stateless_mocs: 0,
        }
    }

    pub fn slm_size(&self) -> Option<u32> {
        self.slm_size
    }

    pub fn set_slm_size(&mut self, slm_size: u32) {
        self.slm_size = Some(slm_size);
    }

    // ── Interface descriptors ──

    pub fn num_idd_per_block(&self) -> u32 {
        self.num_idd_per_block
    }

    pub fn idd_block_size(&self) -> usize {
        self.num_idd_per_block as usize * InterfaceDescriptorData::SIZE
    }

    pub fn idd_block_offset(&self) -> Option<usize> {
        self.idd_block_offset
    }

    /// Make room for `size` bytes of dynamic state followed by the next
    /// interface descriptor in the current dynamic-state heap. Both then land
    /// under one base address even when the heap has to grow.
    pub fn ensure_dynamic_state_space(&mut self, size: usize) -> DriverResult<()> {
        let size = align_up_usize(size, CACHELINE_SIZE);
        let idd_size = if self.idd_block_has_room() { 0 } else { self.idd_block_size() };
        let fits = match self.heap(HeapType::DynamicState) {
            Some(heap) => heap.fits(size + idd_size, CACHELINE_SIZE),
            None => return Err(missing_heap(HeapType::DynamicState)),
        };
        if !fits {
            // Growth invalidates the block, so the new heap needs a whole one.
            self.grow_heap(HeapType::DynamicState, size + self.idd_block_size() + CACHELINE_SIZE)?;
        }
        Ok(())
    }

    fn idd_block_has_room(&self) -> bool {
        self.idd_block_offset.is_some() && self.next_idd_in_block < self.num_idd_per_block
    }

    /// Reserve the next interface descriptor, starting a new block in the
    /// dynamic-state heap when the current one is full or was invalidated.
    pub fn reserve_idd(&mut self) -> DriverResult<IddSlot> {
        let mut new_block = false;
        if !self.idd_block_has_room() {
            let offset = self.get_heap_space(HeapType::DynamicState, self.idd_block_size(), CACHELINE_SIZE)?;
            self.idd_block_offset = Some(offset);
            self.next_idd_in_block = 0;
            new_block = true;
        }
        let block = self.idd_block_offset.unwrap_or_default();
        let index = self.next_idd_in_block;
        self.next_idd_in_block += 1;
        Ok(IddSlot {
            heap_offset: block + index as usize * InterfaceDescriptorData::SIZE,
            index,
            new_block,
        })
    }

    // ── Residency ──

    pub fn residency(&self) -> &ResidencyContainer {
        &self.residency
    }

    pub fn residency_mut(&mut self) -> &mut ResidencyContainer {
        &mut self.residency
    }

    pub fn add_to_residency(&mut self, allocation: &AllocationRef) {
        self.residency.add(allocation);
    }

    /// Copy `data` into a new resident allocation owned until reset.
    pub fn allocate_staging(&mut self, data: &[u8]) -> DriverResult<AllocationRef> {
        let allocation = self
            .memory_manager
            .allocate(AllocationType::Buffer, data.len(), CACHELINE_SIZE)?;
        allocation.write(0, data);
        self.residency.add(&allocation);
        self.staging.push(allocation.clone());
        Ok(allocation)
    }

    fn add_owned_allocations_to_residency(&mut self) {
        self.residency.extend(self.command_buffers.iter());
        for heap in self.heaps.iter().flatten() {
            self.residency.add(heap.allocation());
        }
    }

    /// Return to the freshly created state, keeping the first command buffer
    /// and the current heap allocations.
    pub fn reset(&mut self) {
        for extra in self.command_buffers.drain(1..) {
            self.memory_manager.free(&extra);
        }
        for retired in self.retired_heaps.drain(..).chain(self.staging.drain(..)) {
            self.memory_manager.free(&retired);
        }
        if let Some(first) = self.command_buffers.first() {
            self.stream.replace_buffer(first.clone());
        }
        for heap in self.heaps.iter_mut().flatten() {
            heap.reset();
        }
        self.residency.clear();
        self.add_owned_allocations_to_residency();
        self.dirty.set_all_dirty();
        self.slm_size = None;
        self.idd_block_offset = None;
        self.next_idd_in_block = 0;
    }
}

fn missing_heap(heap_type: HeapType) -> DriverError {
    DriverError::invalid_argument(format!("{:?} heap is unavailable on a copy-only list", heap_type))
}

impl Drop for CommandContainer {
    fn drop(&mut self) {
        for allocation in self
            .command_buffers
            .iter()
            .chain(self.retired_heaps.iter())
            .chain(self.staging.iter())
        {
            self.memory_manager.free(allocation);
        }
        for heap in self.heaps.iter().flatten() {
            self.memory_manager.free(heap.allocation());
        }
    }
}
