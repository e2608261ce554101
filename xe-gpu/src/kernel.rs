// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Kernels as seen by the dispatch encoder.
//!
//! A [`KernelDescriptor`] is the compiler's metadata for one entry point. It
//! is bound to its ISA allocation in [`KernelImmutableData`], shared by every
//! [`Kernel`] instance; a `Kernel` carries the mutable per-launch state
//! (group size, argument payload, residency).

use std::sync::Arc;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use xe_common::{DriverError, DriverResult, CACHELINE_SIZE, GRF_SIZE};

use crate::allocation::{AllocationRef, AllocationType};
use crate::memory_manager::{MemoryManager, UnifiedMemoryMask};
use crate::printf::{PrintfHandle, PRINTF_SURFACE_SIZE};

bitflags! {
    /// Compiler-reported kernel properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KernelFlags: u32 {
        const USES_BARRIERS = 1 << 0;
        const USES_PRINTF = 1 << 1;
        const USES_VME = 1 << 2;
        const DISABLE_MID_THREAD_PREEMPTION = 1 << 3;
        /// Kernel reads a cross-thread payload.
        const PASSES_CROSS_THREAD_DATA = 1 << 4;
        /// Kernel reads per-thread local ids.
        const PASSES_PER_THREAD_DATA = 1 << 5;
    }
}

/// Cross-thread offsets the runtime patches with launch geometry.
/// Each slot holds three `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchTraits {
    pub num_work_groups: Option<u16>,
    pub local_work_size: Option<u16>,
    pub global_work_size: Option<u16>,
    pub work_dim: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgDescriptor {
    /// Stateless pointer, patched with a 64-bit GPU address.
    Pointer { cross_thread_offset: u16 },
    /// By-value argument of `size` bytes.
    Value { cross_thread_offset: u16, size: u16 },
}

impl ArgDescriptor {
    fn offset_and_size(&self) -> (usize, usize) {
        match *self {
            Self::Pointer { cross_thread_offset } => (cross_thread_offset as usize, 8),
            Self::Value {
                cross_thread_offset,
                size,
            } => (cross_thread_offset as usize, size as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingTableLayout {
    pub num_entries: u32,
    /// Offset of the binding table inside the surface-state template.
    pub table_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerTableLayout {
    pub num_samplers: u32,
    /// Offset of the sampler states inside the dynamic-state template.
    pub table_offset: u32,
    pub border_color_offset: u32,
}

/// Compiler metadata for one kernel entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDescriptor {
    pub name: String,
    pub simd_size: u32,
    pub flags: KernelFlags,
    pub slm_size: u32,
    pub per_thread_scratch_size: u32,
    pub cross_thread_data_size: u32,
    /// Local id channels (x, y, z) delivered as per-thread data.
    pub num_local_id_channels: u32,
    pub binding_table: BindingTableLayout,
    pub sampler_table: SamplerTableLayout,
    pub dispatch_traits: DispatchTraits,
    pub args: Vec<ArgDescriptor>,
    /// Surface states followed by the binding table.
    pub surface_state_heap: Vec<u8>,
    /// Border colors and sampler states.
    pub dynamic_state_heap: Vec<u8>,
    pub printf_strings: Vec<String>,
    pub printf_surface_offset: Option<u16>,
}

impl KernelDescriptor {
    /// Descriptor with a 32-byte cross-thread payload and no arguments.
    pub fn new(name: impl Into<String>, simd_size: u32) -> Self {
        Self {
            name: name.into(),
            simd_size,
            flags: KernelFlags::PASSES_CROSS_THREAD_DATA,
            slm_size: 0,
            per_thread_scratch_size: 0,
            cross_thread_data_size: GRF_SIZE,
            num_local_id_channels: 0,
            binding_table: BindingTableLayout::default(),
            sampler_table: SamplerTableLayout::default(),
            dispatch_traits: DispatchTraits::default(),
            args: Vec::new(),
            surface_state_heap: Vec::new(),
            dynamic_state_heap: Vec::new(),
            printf_strings: Vec::new(),
            printf_surface_offset: None,
        }
    }

    /// GRFs per local-id channel for one hardware thread.
    pub fn grfs_per_channel(&self) -> u32 {
        if self.simd_size == 32 {
            2
        } else {
            1
        }
    }

    /// Per-thread payload size for one hardware thread.
    pub fn per_thread_data_size(&self) -> u32 {
        self.num_local_id_channels * self.grfs_per_channel() * GRF_SIZE
    }
}

/// Descriptor bound to its ISA allocation. Shared by every kernel instance.
#[derive(Debug)]
pub struct KernelImmutableData {
    descriptor: KernelDescriptor,
    isa: AllocationRef,
}

impl KernelImmutableData {
    /// Upload `isa` into the internal heap.
    pub fn new(
        memory_manager: &MemoryManager,
        descriptor: KernelDescriptor,
        isa: &[u8],
    ) -> DriverResult<Arc<Self>> {
        if !matches!(descriptor.simd_size, 1 | 8 | 16 | 32) {
            return Err(DriverError::invalid_argument(format!(
                "kernel '{}' has unsupported SIMD size {}",
                descriptor.name, descriptor.simd_size
            )));
        }
        if isa.is_empty() {
            return Err(DriverError::InvalidSize(format!(
                "kernel '{}' has an empty ISA",
                descriptor.name
            )));
        }
        let allocation = memory_manager.allocate(AllocationType::KernelIsa, isa.len(), CACHELINE_SIZE)?;
        allocation.write(0, isa);
        log::debug!(
            "kernel: uploaded '{}' ISA (0x{:X} bytes) at 0x{:X}",
            descriptor.name,
            isa.len(),
            allocation.gpu_address()
        );
        Ok(Arc::new(Self {
            descriptor,
            isa: allocation,
        }))
    }

    pub fn descriptor(&self) -> &KernelDescriptor {
        &self.descriptor
    }

    pub fn isa_allocation(&self) -> &AllocationRef {
        &self.isa
    }
}

/// Which unified-memory kinds the kernel may dereference without them being
/// passed as arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnifiedMemoryControls {
    pub indirect_host_allowed: bool,
    pub indirect_device_allowed: bool,
    pub indirect_shared_allowed: bool,
}

impl UnifiedMemoryControls {
    pub fn mask(&self) -> UnifiedMemoryMask {
        let mut mask = UnifiedMemoryMask::empty();
        mask.set(UnifiedMemoryMask::HOST, self.indirect_host_allowed);
        mask.set(UnifiedMemoryMask::DEVICE, self.indirect_device_allowed);
        mask.set(UnifiedMemoryMask::SHARED, self.indirect_shared_allowed);
        mask
    }
}

// ── Thread geometry ────────────────────────────────────────────────────────

/// Hardware threads needed for a group of `local_work_size` work items.
pub fn threads_per_group(simd_size: u32, local_work_size: u32) -> u32 {
    local_work_size.div_ceil(simd_size.max(1))
}

/// Lane mask of the last (possibly partial) thread in a group.
pub fn thread_execution_mask(simd_size: u32, local_work_size: u32) -> u32 {
    let remainder = local_work_size & (simd_size.max(1) - 1);
    if remainder == 0 {
        u32::MAX
    } else {
        (1u32 << remainder) - 1
    }
}

/// Local ids for every lane of every thread of a group, laid out one GRF
/// (or two for SIMD32) per channel.
pub fn generate_local_ids(descriptor: &KernelDescriptor, group_size: [u32; 3]) -> Vec<u8> {
    let channels = descriptor.num_local_id_channels as usize;
    if channels == 0 {
        return Vec::new();
    }
    let simd = descriptor.simd_size.max(1);
    let lanes = if simd == 1 { 1 } else { simd as usize };
    let channel_bytes = (descriptor.grfs_per_channel() * GRF_SIZE) as usize;
    let per_thread = channels * channel_bytes;
    let lws = group_size[0] * group_size[1] * group_size[2];
    let threads = threads_per_group(simd, lws) as usize;

    let mut out = vec![0u8; threads * per_thread];
    for thread in 0..threads {
        for lane in 0..lanes {
            let id = (thread * lanes + lane) as u32;
            let local = [
                id % group_size[0],
                (id / group_size[0]) % group_size[1],
                id / (group_size[0] * group_size[1]),
            ];
            for (channel, value) in local.iter().take(channels).enumerate() {
                let at = thread * per_thread + channel * channel_bytes + lane * 2;
                LittleEndian::write_u16(&mut out[at..at + 2], *value as u16);
            }
        }
    }
    out
}

// ── Kernel instance ────────────────────────────────────────────────────────

/// Mutable launch state for one kernel.
#[derive(Debug)]
pub struct Kernel {
    immutable: Arc<KernelImmutableData>,
    max_work_group_size: u32,
    group_size: [u32; 3],
    group_count: [u32; 3],
    cross_thread_data: Vec<u8>,
    per_thread_data: Vec<u8>,
    arg_allocations: Vec<Option<AllocationRef>>,
    unified_memory_controls: UnifiedMemoryControls,
    printf_buffer: Option<AllocationRef>,
}

impl Kernel {
    pub fn new(
        immutable: Arc<KernelImmutableData>,
        memory_manager: &MemoryManager,
        max_work_group_size: u32,
    ) -> DriverResult<Self> {
        let desc = immutable.descriptor();
        let printf_buffer = if desc.flags.contains(KernelFlags::USES_PRINTF) {
            let buffer = memory_manager.allocate(AllocationType::PrintfSurface, PRINTF_SURFACE_SIZE, 1)?;
            PrintfHandle::initialize_buffer(&buffer);
            Some(buffer)
        } else {
            None
        };

        let mut kernel = Self {
            max_work_group_size,
            group_size: [1, 1, 1],
            group_count: [0, 0, 0],
            cross_thread_data: vec![0u8; desc.cross_thread_data_size as usize],
            per_thread_data: Vec::new(),
            arg_allocations: vec![None; desc.args.len()],
            unified_memory_controls: UnifiedMemoryControls::default(),
            printf_buffer,
            immutable,
        };

        if let (Some(offset), Some(buffer)) = (
            kernel.descriptor().printf_surface_offset,
            kernel.printf_buffer.clone(),
        ) {
            kernel.patch_u64(offset as usize, buffer.gpu_address());
        }
        kernel.set_group_size(1, 1, 1)?;
        Ok(kernel)
    }

    pub fn descriptor(&self) -> &KernelDescriptor {
        self.immutable.descriptor()
    }

    pub fn immutable_data(&self) -> &Arc<KernelImmutableData> {
        &self.immutable
    }

    pub fn isa_allocation(&self) -> &AllocationRef {
        self.immutable.isa_allocation()
    }

    pub fn set_group_size(&mut self, x: u32, y: u32, z: u32) -> DriverResult<()> {
        let total = x as u64 * y as u64 * z as u64;
        if x == 0 || y == 0 || z == 0 || total > self.max_work_group_size as u64 {
            return Err(DriverError::InvalidGroupSize {
                x,
                y,
                z,
                max: self.max_work_group_size,
            });
        }
        self.group_size = [x, y, z];
        if let Some(offset) = self.descriptor().dispatch_traits.local_work_size {
            self.patch_u32x3(offset as usize, self.group_size);
        }
        self.per_thread_data = generate_local_ids(self.immutable.descriptor(), self.group_size);
        log::trace!("kernel '{}': group size {}x{}x{}", self.descriptor().name, x, y, z);
        Ok(())
    }

    pub fn group_size(&self) -> [u32; 3] {
        self.group_size
    }

    /// Record launch dimensions and patch them into the payload.
    pub fn set_group_count(&mut self, count: [u32; 3]) {
        self.group_count = count;
        let traits = self.descriptor().dispatch_traits;
        if let Some(offset) = traits.num_work_groups {
            self.patch_u32x3(offset as usize, count);
        }
        if let Some(offset) = traits.global_work_size {
            // The payload field is 32 bits wide; larger sizes wrap.
            let gws = [
                count[0].wrapping_mul(self.group_size[0]),
                count[1].wrapping_mul(self.group_size[1]),
                count[2].wrapping_mul(self.group_size[2]),
            ];
            self.patch_u32x3(offset as usize, gws);
        }
        if let Some(offset) = traits.work_dim {
            let extent = |i: usize| count[i] as u64 * self.group_size[i] as u64;
            let dims = if extent(2) > 1 {
                3
            } else if extent(1) > 1 {
                2
            } else {
                1
            };
            self.patch_u32(offset as usize, dims);
        }
    }

    pub fn group_count(&self) -> [u32; 3] {
        self.group_count
    }

    pub fn local_work_size(&self) -> u32 {
        self.group_size.iter().product()
    }

    pub fn num_threads_per_group(&self) -> u32 {
        threads_per_group(self.descriptor().simd_size, self.local_work_size())
    }

    pub fn thread_execution_mask(&self) -> u32 {
        thread_execution_mask(self.descriptor().simd_size, self.local_work_size())
    }

    /// Copy `value` into argument `index`.
    pub fn set_argument_value(&mut self, index: u32, value: &[u8]) -> DriverResult<()> {
        let arg = *self
            .descriptor()
            .args
            .get(index as usize)
            .ok_or(DriverError::InvalidKernelArgumentIndex(index))?;
        let (offset, size) = arg.offset_and_size();
        if value.len() != size {
            return Err(DriverError::InvalidKernelArgumentSize {
                index,
                expected: size,
                actual: value.len(),
            });
        }
        self.cross_thread_data[offset..offset + size].copy_from_slice(value);
        self.arg_allocations[index as usize] = None;
        Ok(())
    }

    /// Bind a buffer to pointer argument `index`. `None` binds a null pointer.
    pub fn set_argument_buffer(&mut self, index: u32, buffer: Option<&AllocationRef>) -> DriverResult<()> {
        match self.descriptor().args.get(index as usize) {
            Some(ArgDescriptor::Pointer { .. }) => {}
            Some(ArgDescriptor::Value { size, .. }) => {
                return Err(DriverError::InvalidKernelArgumentSize {
                    index,
                    expected: *size as usize,
                    actual: 8,
                })
            }
            None => return Err(DriverError::InvalidKernelArgumentIndex(index)),
        }
        let address = buffer.map_or(0, |b| b.gpu_address());
        self.set_argument_value(index, &address.to_le_bytes())?;
        self.arg_allocations[index as usize] = buffer.cloned();
        Ok(())
    }

    pub fn set_indirect_access(&mut self, controls: UnifiedMemoryControls) {
        self.unified_memory_controls = controls;
    }

    pub fn unified_memory_controls(&self) -> UnifiedMemoryControls {
        self.unified_memory_controls
    }

    pub fn has_indirect_allocations_allowed(&self) -> bool {
        !self.unified_memory_controls.mask().is_empty()
    }

    /// Allocations the kernel references directly: bound arguments plus the
    /// printf surface.
    pub fn residency(&self) -> Vec<AllocationRef> {
        self.arg_allocations
            .iter()
            .flatten()
            .chain(self.printf_buffer.iter())
            .cloned()
            .collect()
    }

    pub fn cross_thread_data(&self) -> &[u8] {
        &self.cross_thread_data
    }

    pub fn per_thread_data(&self) -> &[u8] {
        &self.per_thread_data
    }

    pub fn printf_buffer(&self) -> Option<&AllocationRef> {
        self.printf_buffer.as_ref()
    }

    /// Handle for draining this kernel's printf output after execution.
    pub fn printf_handle(&self) -> Option<PrintfHandle> {
        self.printf_buffer
            .as_ref()
            .map(|buffer| PrintfHandle::new(buffer.clone(), self.immutable.clone()))
    }

    fn patch_u32(&mut self, offset: usize, value: u32) {
        if offset + 4 <= self.cross_thread_data.len() {
            LittleEndian::write_u32(&mut self.cross_thread_data[offset..offset + 4], value);
        }
    }

    fn patch_u32x3(&mut self, offset: usize, values: [u32; 3]) {
        for (i, v) in values.iter().enumerate() {
            self.patch_u32(offset + i * 4, *v);
        }
    }

    fn patch_u64(&mut self, offset: usize, value: u64) {
        if offset + 8 <= self.cross_thread_data.len() {
            LittleEndian::write_u64(&mut self.cross_thread_data[offset..offset + 8], value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_descriptor() -> KernelDescriptor {
        let mut desc = KernelDescriptor::new("test", 16);
        desc.cross_thread_data_size = 64;
        desc.num_local_id_channels = 3;
        desc.flags |= KernelFlags::PASSES_PER_THREAD_DATA;
        desc.dispatch_traits = DispatchTraits {
            num_work_groups: Some(16),
            local_work_size: Some(28),
            global_work_size: Some(40),
            work_dim: Some(52),
        };
        desc.args = vec![
            ArgDescriptor::Pointer { cross_thread_offset: 0 },
            ArgDescriptor::Value {
                cross_thread_offset: 8,
                size: 4,
            },
        ];
        desc
    }

    fn make_kernel(desc: KernelDescriptor) -> (MemoryManager, Kernel) {
        let mm = MemoryManager::new();
        let immutable = KernelImmutableData::new(&mm, desc, &[0u8; 64]).unwrap();
        let kernel = Kernel::new(immutable, &mm, 256).unwrap();
        (mm, kernel)
    }

    fn ctd_u32(kernel: &Kernel, offset: usize) -> u32 {
        LittleEndian::read_u32(&kernel.cross_thread_data()[offset..offset + 4])
    }

    #[test]
    fn test_thread_geometry() {
        assert_eq!(threads_per_group(16, 16), 1);
        assert_eq!(threads_per_group(16, 17), 2);
        assert_eq!(threads_per_group(32, 1), 1);
        assert_eq!(thread_execution_mask(32, 64), u32::MAX);
        assert_eq!(thread_execution_mask(16, 17), 0x1);
        assert_eq!(thread_execution_mask(8, 5), 0x1F);
        assert_eq!(thread_execution_mask(16, 16), u32::MAX);
    }

    #[test]
    fn test_rejects_bad_simd_and_empty_isa() {
        let mm = MemoryManager::new();
        assert!(KernelImmutableData::new(&mm, KernelDescriptor::new("k", 12), &[0u8; 4]).is_err());
        assert!(KernelImmutableData::new(&mm, KernelDescriptor::new("k", 8), &[]).is_err());
    }

    #[test]
    fn test_isa_lives_in_internal_heap() {
        let (_mm, kernel) = make_kernel(test_descriptor());
        assert_eq!(kernel.isa_allocation().allocation_type(), AllocationType::KernelIsa);
        assert_eq!(kernel.isa_allocation().gpu_address_to_patch() % 64, 0);
    }

    #[test]
    fn test_group_size_validation_and_patching() {
        let (_mm, mut kernel) = make_kernel(test_descriptor());
        assert!(matches!(
            kernel.set_group_size(0, 1, 1),
            Err(DriverError::InvalidGroupSize { .. })
        ));
        assert!(kernel.set_group_size(32, 16, 1).is_err());
        kernel.set_group_size(8, 2, 1).unwrap();
        assert_eq!(ctd_u32(&kernel, 28), 8);
        assert_eq!(ctd_u32(&kernel, 32), 2);
        assert_eq!(kernel.num_threads_per_group(), 1);

        kernel.set_group_count([4, 3, 1]);
        assert_eq!(ctd_u32(&kernel, 16), 4);
        assert_eq!(ctd_u32(&kernel, 40), 32);
        assert_eq!(ctd_u32(&kernel, 44), 6);
        assert_eq!(ctd_u32(&kernel, 52), 2);
    }

    #[test]
    fn test_large_group_counts_wrap_global_size() {
        let (_mm, mut kernel) = make_kernel(test_descriptor());
        kernel.set_group_size(16, 1, 1).unwrap();
        kernel.set_group_count([0x1000_0000, 1, 1]);
        assert_eq!(ctd_u32(&kernel, 16), 0x1000_0000);
        assert_eq!(ctd_u32(&kernel, 40), 0);
        assert_eq!(ctd_u32(&kernel, 52), 1);

        kernel.set_group_count([1, 0x2000_0000, 1]);
        assert_eq!(ctd_u32(&kernel, 44), 0x2000_0000);
        assert_eq!(ctd_u32(&kernel, 52), 2);
    }

    #[test]
    fn test_local_ids_layout() {
        let mut desc = test_descriptor();
        desc.simd_size = 8;
        let ids = generate_local_ids(&desc, [4, 3, 1]);
        // 12 work items over SIMD8 -> 2 threads, 3 channels of one GRF.
        assert_eq!(ids.len(), 2 * 3 * 32);
        let read = |at: usize| LittleEndian::read_u16(&ids[at..at + 2]);
        // Thread 1, lane 1 is work item 9 -> (1, 2, 0).
        assert_eq!(read(96 + 2), 1);
        assert_eq!(read(96 + 32 + 2), 2);
        assert_eq!(read(96 + 64 + 2), 0);
    }

    #[test]
    fn test_arguments() {
        let mm = MemoryManager::new();
        let immutable = KernelImmutableData::new(&mm, test_descriptor(), &[0u8; 64]).unwrap();
        let mut kernel = Kernel::new(immutable, &mm, 256).unwrap();
        let buffer = mm.allocate(AllocationType::Buffer, 64, 1).unwrap();

        kernel.set_argument_buffer(0, Some(&buffer)).unwrap();
        assert_eq!(
            LittleEndian::read_u64(&kernel.cross_thread_data()[0..8]),
            buffer.gpu_address()
        );
        assert_eq!(kernel.residency().len(), 1);

        kernel.set_argument_value(1, &7u32.to_le_bytes()).unwrap();
        assert_eq!(ctd_u32(&kernel, 8), 7);

        assert_eq!(
            kernel.set_argument_value(5, &[0]),
            Err(DriverError::InvalidKernelArgumentIndex(5))
        );
        assert!(matches!(
            kernel.set_argument_value(1, &[0u8; 2]),
            Err(DriverError::InvalidKernelArgumentSize { index: 1, .. })
        ));
        assert!(kernel.set_argument_buffer(1, Some(&buffer)).is_err());

        kernel.set_argument_buffer(0, None).unwrap();
        assert!(kernel.residency().is_empty());
    }

    #[test]
    fn test_indirect_access_mask() {
        let (_mm, mut kernel) = make_kernel(test_descriptor());
        assert!(!kernel.has_indirect_allocations_allowed());
        kernel.set_indirect_access(UnifiedMemoryControls {
            indirect_device_allowed: true,
            ..Default::default()
        });
        assert!(kernel.has_indirect_allocations_allowed());
        assert_eq!(kernel.unified_memory_controls().mask(), UnifiedMemoryMask::DEVICE);
    }

    #[test]
    fn test_printf_surface_patched() {
        let mut desc = test_descriptor();
        desc.flags |= KernelFlags::USES_PRINTF;
        desc.printf_surface_offset = Some(56);
        let (_mm, kernel) = make_kernel(desc);
        let buffer = kernel.printf_buffer().unwrap();
        assert_eq!(
            LittleEndian::read_u64(&kernel.cross_thread_data()[56..64]),
            buffer.gpu_address()
        );
        assert!(kernel.printf_handle().is_some());
        assert_eq!(kernel.residency().len(), 1);
    }
}
