// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Kernel dispatch encoding.
//!
//! One dispatch produces, in order:
//!
//! 1. surface states and the binding table in the surface-state heap
//! 2. sampler states in the dynamic-state heap
//! 3. cross-thread and per-thread payload in the indirect-object heap
//! 4. an interface descriptor slot in the dynamic-state heap
//! 5. when the SLM size changed or a heap moved: PIPE_CONTROL, then the L3
//!    configuration and STATE_BASE_ADDRESS for the dirty heaps
//! 6. MEDIA_INTERFACE_DESCRIPTOR_LOAD for a new descriptor block
//! 7. for indirect launches, group counts loaded into the dispatch
//!    registers and stored into the payload
//! 8. GPGPU_WALKER wrapped in the generation's preemption workaround,
//!    followed by MEDIA_STATE_FLUSH
//!
//! Heap reservations all happen before step 5 so that any heap growth they
//! cause is covered by the same base-address flush.

use byteorder::{ByteOrder, LittleEndian};
use xe_common::{align_up_usize, DriverResult, CACHELINE_SIZE, GRF_SIZE};

use crate::command_container::{CommandContainer, BATCH_BUFFER_END_SIZE};
use crate::heap::HeapType;
use crate::hw::commands::{
    registers, GpgpuWalker, InterfaceDescriptorData, MediaInterfaceDescriptorLoad, MiLoadRegisterImm,
    MiLoadRegisterMem, MiStoreRegisterMem, PipeControl, SimdSize, MEDIA_STATE_FLUSH,
};
use crate::hw::{HwFamily, MAX_BINDING_TABLE_PREFETCH};
use crate::kernel::{Kernel, KernelFlags};
use crate::preemption::PreemptionMode;

const DISPATCH_DIM_REGISTERS: [u32; 3] = [
    registers::GPGPU_DISPATCHDIMX,
    registers::GPGPU_DISPATCHDIMY,
    registers::GPGPU_DISPATCHDIMZ,
];

/// Size of one sampler state.
const SAMPLER_STATE_SIZE: usize = 16;
/// Offset of the border-color pointer inside a sampler state.
const SAMPLER_BORDER_COLOR_OFFSET: usize = 8;

/// Per-launch parameters not carried by the kernel itself.
#[derive(Debug, Clone, Copy)]
pub struct DispatchArgs<'a> {
    pub family: &'a dyn HwFamily,
    /// GPU address of three `u32` group counts read at execution time.
    pub indirect_group_counts: Option<u64>,
    /// Walker executes only when the render predicate is set.
    pub predicate: bool,
    pub preemption_mode: PreemptionMode,
    pub binding_table_prefetch: bool,
}

/// Where a dispatch landed, for callers that patch or inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchInfo {
    pub walker_address: u64,
    pub indirect_data_offset: usize,
    pub interface_descriptor_offset: usize,
}

/// Worst-case command bytes of one [`encode_dispatch_kernel`].
pub fn estimate_encode_dispatch_kernel_cmds_size(family: &dyn HwFamily) -> usize {
    let walker = GpgpuWalker::DWORDS * 4 + family.preemption_wa_size();
    let media_state_flush = MEDIA_STATE_FLUSH.len() * 4;
    let idd_load = media_state_flush + MediaInterfaceDescriptorLoad::DWORDS * 4;
    let flush = PipeControl::DWORDS * 4 + MiLoadRegisterImm::DWORDS * 4 + family.state_base_address_dwords() * 4;
    let indirect_params = 3 * (MiLoadRegisterMem::DWORDS + MiStoreRegisterMem::DWORDS) * 4;
    walker + media_state_flush + idd_load + flush + indirect_params + BATCH_BUFFER_END_SIZE
}

/// Encode one kernel dispatch into `container`.
pub fn encode_dispatch_kernel(
    container: &mut CommandContainer,
    kernel: &Kernel,
    args: &DispatchArgs<'_>,
) -> DriverResult<DispatchInfo> {
    let family = args.family;
    let desc = kernel.descriptor();

    container.ensure_space(estimate_encode_dispatch_kernel_cmds_size(family))?;

    // ── Residency ──
    container.add_to_residency(kernel.isa_allocation());
    for allocation in kernel.residency() {
        container.add_to_residency(&allocation);
    }
    if kernel.has_indirect_allocations_allowed() {
        let memory_manager = container.memory_manager().clone();
        memory_manager.add_indirect_allocations_to_residency(
            container.residency_mut(),
            kernel.unified_memory_controls().mask(),
        );
    }

    let mut idd = InterfaceDescriptorData {
        kernel_start_pointer: kernel.isa_allocation().gpu_address_to_patch(),
        thread_preemption_disable: args.preemption_mode.thread_preemption_disabled(),
        barrier_enable: desc.flags.contains(KernelFlags::USES_BARRIERS),
        number_of_threads_in_gpgpu_thread_group: kernel.num_threads_per_group(),
        shared_local_memory_size: family.slm_encoding(desc.slm_size),
        ..InterfaceDescriptorData::default()
    };

    // ── Surface state ──
    if desc.binding_table.num_entries > 0 && !desc.surface_state_heap.is_empty() {
        let ssh = &desc.surface_state_heap;
        let offset = container.get_heap_space(HeapType::SurfaceState, ssh.len(), CACHELINE_SIZE)?;
        let mut copy = ssh.clone();
        // Binding table entries are offsets into the template; rebase them.
        let table = desc.binding_table.table_offset as usize;
        for entry in 0..desc.binding_table.num_entries as usize {
            let at = table + entry * 4;
            if at + 4 <= copy.len() {
                let value = LittleEndian::read_u32(&copy[at..at + 4]);
                LittleEndian::write_u32(&mut copy[at..at + 4], value + offset as u32);
            }
        }
        container.write_heap(HeapType::SurfaceState, offset, &copy);
        idd.binding_table_pointer = (offset + table) as u32;
        idd.binding_table_entry_count = if args.binding_table_prefetch {
            desc.binding_table.num_entries.min(MAX_BINDING_TABLE_PREFETCH)
        } else {
            0
        };
    }

    // ── Dynamic state ──
    if desc.sampler_table.num_samplers > 0 && !desc.dynamic_state_heap.is_empty() {
        let dsh = &desc.dynamic_state_heap;
        // Samplers and the descriptor slot must share one heap base.
        container.ensure_dynamic_state_space(dsh.len())?;
        let offset = container.get_heap_space(HeapType::DynamicState, dsh.len(), CACHELINE_SIZE)?;
        let mut copy = dsh.clone();
        let table = desc.sampler_table.table_offset as usize;
        let border_color = (offset + desc.sampler_table.border_color_offset as usize) as u32;
        for sampler in 0..desc.sampler_table.num_samplers as usize {
            let at = table + sampler * SAMPLER_STATE_SIZE + SAMPLER_BORDER_COLOR_OFFSET;
            if at + 4 <= copy.len() {
                LittleEndian::write_u32(&mut copy[at..at + 4], border_color);
            }
        }
        container.write_heap(HeapType::DynamicState, offset, &copy);
        idd.sampler_state_pointer = (offset + table) as u32;
        idd.sampler_count = desc.sampler_table.num_samplers.div_ceil(4);
    }

    // ── Indirect object data ──
    let cross_thread = kernel.cross_thread_data();
    let per_thread = kernel.per_thread_data();
    let cross_thread_size = align_up_usize(cross_thread.len(), GRF_SIZE as usize);
    let cross_thread_read_length = (cross_thread_size / GRF_SIZE as usize) as u32;
    let per_thread_read_length = desc.per_thread_data_size() / GRF_SIZE;
    if desc.flags.contains(KernelFlags::PASSES_CROSS_THREAD_DATA) {
        assert!(
            cross_thread_read_length != 0,
            "kernel '{}' declares cross-thread data but its read length is zero",
            desc.name
        );
    }
    if desc.flags.contains(KernelFlags::PASSES_PER_THREAD_DATA) {
        assert!(
            per_thread_read_length != 0,
            "kernel '{}' declares per-thread data but its read length is zero",
            desc.name
        );
    }
    idd.cross_thread_constant_data_read_length = cross_thread_read_length;
    idd.constant_urb_entry_read_length = per_thread_read_length;

    let indirect_data_length = cross_thread_size + per_thread.len();
    let ioh_offset = if indirect_data_length > 0 {
        let offset = container.get_heap_space(HeapType::IndirectObject, indirect_data_length, CACHELINE_SIZE)?;
        container.write_heap(HeapType::IndirectObject, offset, cross_thread);
        container.write_heap(HeapType::IndirectObject, offset + cross_thread_size, per_thread);
        offset
    } else {
        0
    };

    // ── Interface descriptor slot ──
    let slot = container.reserve_idd()?;

    // ── State flush ──
    let slm_changed = container.slm_size() != Some(desc.slm_size);
    if slm_changed || container.dirty_heaps().is_any_dirty() {
        container.stream_mut().write_dwords(&PipeControl::barrier(true).encode());
        if slm_changed {
            let l3 = family.encode_l3_config(desc.slm_size > 0);
            container.stream_mut().write_dwords(&l3.encode());
            container.set_slm_size(desc.slm_size);
        }
        if container.dirty_heaps().is_any_dirty() {
            let sba = container.state_base_address_for_dirty_heaps();
            log::trace!("encoder: reprogramming base addresses {:?}", sba);
            let dwords = family.encode_state_base_address(&sba);
            container.stream_mut().write_dwords(&dwords);
            container.clear_dirty_heaps();
        }
    }

    if slot.new_block || slm_changed {
        let block_offset = slot.heap_offset - slot.index as usize * InterfaceDescriptorData::SIZE;
        let load = MediaInterfaceDescriptorLoad {
            total_length: container.idd_block_size() as u32,
            start_address: block_offset as u32,
        };
        container.stream_mut().write_dwords(&MEDIA_STATE_FLUSH);
        container.stream_mut().write_dwords(&load.encode());
    }

    let mut idd_bytes = [0u8; InterfaceDescriptorData::SIZE];
    LittleEndian::write_u32_into(&idd.encode(), &mut idd_bytes);
    container.write_heap(HeapType::DynamicState, slot.heap_offset, &idd_bytes);

    // ── Indirect group counts ──
    if let Some(counts) = args.indirect_group_counts {
        let ioh_base = container.heap_gpu_base(HeapType::IndirectObject);
        for (i, register) in DISPATCH_DIM_REGISTERS.iter().enumerate() {
            let load = MiLoadRegisterMem {
                register: *register,
                address: counts + 4 * i as u64,
            };
            container.stream_mut().write_dwords(&load.encode());
            if let Some(nwg) = desc.dispatch_traits.num_work_groups {
                let store = MiStoreRegisterMem {
                    register: *register,
                    address: ioh_base + (ioh_offset + nwg as usize + 4 * i) as u64,
                };
                container.stream_mut().write_dwords(&store.encode());
            }
        }
    }

    // ── Walker ──
    let group_count = if args.indirect_group_counts.is_some() {
        [0, 0, 0]
    } else {
        kernel.group_count()
    };
    let walker = GpgpuWalker {
        indirect_parameter_enable: args.indirect_group_counts.is_some(),
        predicate_enable: args.predicate,
        interface_descriptor_offset: slot.index,
        indirect_data_length: indirect_data_length as u32,
        indirect_data_start_address: ioh_offset as u32,
        simd_size: SimdSize::from_width(desc.simd_size),
        thread_width_counter_maximum: kernel.num_threads_per_group().saturating_sub(1),
        thread_group_id_x_dimension: group_count[0],
        thread_group_id_y_dimension: group_count[1],
        thread_group_id_z_dimension: group_count[2],
        right_execution_mask: kernel.thread_execution_mask(),
        bottom_execution_mask: u32::MAX,
    };

    let wa_begin = family.preemption_wa_begin();
    if !wa_begin.is_empty() {
        container.stream_mut().write_dwords(&wa_begin);
    }
    let walker_address = container.stream_mut().write_dwords(&walker.encode());
    let wa_end = family.preemption_wa_end();
    if !wa_end.is_empty() {
        container.stream_mut().write_dwords(&wa_end);
    }
    container.stream_mut().write_dwords(&MEDIA_STATE_FLUSH);

    log::trace!(
        "encoder: '{}' groups={:?} indirect={} idd={} ioh=0x{:X}+0x{:X}",
        desc.name,
        group_count,
        args.indirect_group_counts.is_some(),
        slot.index,
        ioh_offset,
        indirect_data_length
    );

    Ok(DispatchInfo {
        walker_address,
        indirect_data_offset: ioh_offset,
        interface_descriptor_offset: slot.heap_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use xe_common::settings::Settings;

    use crate::allocation::AllocationType;
    use crate::hw::commands::{command_length, StateBaseAddress};
    use crate::hw::{family_for, GfxCoreFamily};
    use crate::kernel::{
        ArgDescriptor, BindingTableLayout, DispatchTraits, KernelDescriptor, KernelImmutableData,
        SamplerTableLayout, UnifiedMemoryControls,
    };
    use crate::memory_manager::{MemoryManager, UnifiedMemoryType};

    struct Fixture {
        mm: Arc<MemoryManager>,
        container: CommandContainer,
        family: Box<dyn HwFamily>,
    }

    impl Fixture {
        fn new(core: GfxCoreFamily) -> Self {
            let mm = Arc::new(MemoryManager::new());
            let container = CommandContainer::new(mm.clone(), &Settings::default(), false).unwrap();
            Self {
                mm,
                container,
                family: family_for(core),
            }
        }

        fn kernel(&self, desc: KernelDescriptor) -> Kernel {
            let immutable = KernelImmutableData::new(&self.mm, desc, &[0u8; 64]).unwrap();
            Kernel::new(immutable, &self.mm, 1024).unwrap()
        }

        /// Split the current stream into commands.
        fn commands(&self) -> Vec<Vec<u32>> {
            split(&self.container.stream().dwords())
        }

        fn idd(&self, info: &DispatchInfo) -> InterfaceDescriptorData {
            let dsh = self.container.heap(HeapType::DynamicState).unwrap().allocation();
            let mut dw = [0u32; 8];
            for (i, d) in dw.iter_mut().enumerate() {
                *d = dsh.read_u32(info.interface_descriptor_offset + i * 4);
            }
            InterfaceDescriptorData::decode(&dw)
        }
    }

    fn split(dwords: &[u32]) -> Vec<Vec<u32>> {
        let mut out = Vec::new();
        let mut at = 0;
        while at < dwords.len() {
            let len = command_length(dwords[at]);
            out.push(dwords[at..at + len].to_vec());
            at += len;
        }
        out
    }

    fn headers(cmds: &[Vec<u32>]) -> Vec<u32> {
        cmds.iter().map(|c| c[0]).collect()
    }

    fn simple_descriptor(simd: u32) -> KernelDescriptor {
        let mut desc = KernelDescriptor::new("simple", simd);
        desc.cross_thread_data_size = 32;
        desc.dispatch_traits = DispatchTraits {
            num_work_groups: Some(0),
            ..DispatchTraits::default()
        };
        desc
    }

    fn dispatch(f: &mut Fixture, kernel: &Kernel, mode: PreemptionMode, indirect: Option<u64>) -> DispatchInfo {
        let args = DispatchArgs {
            family: f.family.as_ref(),
            indirect_group_counts: indirect,
            predicate: false,
            preemption_mode: mode,
            binding_table_prefetch: f.family.binding_table_prefetch(),
        };
        encode_dispatch_kernel(&mut f.container, kernel, &args).unwrap()
    }

    fn encode_with(f: &mut Fixture, kernel: &Kernel, mode: PreemptionMode) -> DispatchInfo {
        dispatch(f, kernel, mode, None)
    }

    #[test]
    fn test_first_dispatch_flushes_state_then_walks() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut kernel = f.kernel(simple_descriptor(16));
        kernel.set_group_size(20, 1, 1).unwrap();
        kernel.set_group_count([4, 2, 1]);

        let info = encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let cmds = f.commands();
        let h = headers(&cmds);
        assert_eq!(h[0], PipeControl::HEADER);
        assert_eq!(h[1], MiLoadRegisterImm::HEADER);
        assert_eq!(h[2] & 0xFFFF_0000, StateBaseAddress::HEADER_BASE & 0xFFFF_0000);
        assert_eq!(h[3], MEDIA_STATE_FLUSH[0]);
        assert_eq!(h[4], MediaInterfaceDescriptorLoad::HEADER);
        assert_eq!(h[5], GpgpuWalker::HEADER);
        assert_eq!(h[6], MEDIA_STATE_FLUSH[0]);

        assert!(PipeControl::decode(&cmds[0]).cs_stall);
        assert!(PipeControl::decode(&cmds[0]).dc_flush);
        assert!(!f.container.dirty_heaps().is_any_dirty());

        let walker = GpgpuWalker::decode(&cmds[5]);
        assert_eq!(walker.thread_group_id_x_dimension, 4);
        assert_eq!(walker.thread_group_id_y_dimension, 2);
        assert_eq!(walker.simd_size, SimdSize::Simd16);
        // 20 work items on SIMD16: two threads, four lanes in the last.
        assert_eq!(walker.thread_width_counter_maximum, 1);
        assert_eq!(walker.right_execution_mask, 0xF);
        assert_eq!(walker.indirect_data_length, 32);
        let walker_offset = cmds[..5].iter().map(Vec::len).sum::<usize>() * 4;
        assert_eq!(info.walker_address, f.container.stream().gpu_base() + walker_offset as u64);

        let idd = f.idd(&info);
        assert_eq!(idd.kernel_start_pointer, kernel.isa_allocation().gpu_address_to_patch());
        assert_eq!(idd.number_of_threads_in_gpgpu_thread_group, 2);
        assert_eq!(idd.cross_thread_constant_data_read_length, 1);
        assert!(!idd.thread_preemption_disable);
    }

    #[test]
    fn test_second_dispatch_skips_flush() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let kernel = f.kernel(simple_descriptor(16));
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let before = f.commands().len();
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let cmds = f.commands();
        assert_eq!(headers(&cmds[before..]), vec![GpgpuWalker::HEADER, MEDIA_STATE_FLUSH[0]]);
        assert_eq!(GpgpuWalker::decode(&cmds[before]).interface_descriptor_offset, 1);
    }

    #[test]
    fn test_slm_change_reprograms_l3_and_reloads_descriptors() {
        let mut f = Fixture::new(GfxCoreFamily::Gen9);
        let plain = f.kernel(simple_descriptor(8));
        let mut slm_desc = simple_descriptor(8);
        slm_desc.slm_size = 4096;
        let slm = f.kernel(slm_desc);

        encode_with(&mut f, &plain, PreemptionMode::MidThread);
        let before = f.commands().len();
        let info = encode_with(&mut f, &slm, PreemptionMode::MidThread);
        let cmds = f.commands();
        let h = headers(&cmds[before..]);
        assert_eq!(h[0], PipeControl::HEADER);
        let l3 = MiLoadRegisterImm::decode(&cmds[before + 1]);
        assert_eq!(l3.register, registers::L3CNTL_GEN9);
        assert_eq!(l3.data, 0x6000_0121);
        assert!(h.contains(&MediaInterfaceDescriptorLoad::HEADER));
        assert_eq!(f.container.slm_size(), Some(4096));
        assert_eq!(f.idd(&info).shared_local_memory_size, 3);
    }

    #[test]
    fn test_gen9_wraps_walker_in_preemption_workaround() {
        let mut f = Fixture::new(GfxCoreFamily::Gen9);
        let kernel = f.kernel(simple_descriptor(8));
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let cmds = f.commands();
        let walker_at = cmds.iter().position(|c| c[0] == GpgpuWalker::HEADER).unwrap();
        let begin = MiLoadRegisterImm::decode(&cmds[walker_at - 1]);
        let end = MiLoadRegisterImm::decode(&cmds[walker_at + 1]);
        assert_eq!(begin.register, registers::CS_GPR_R0);
        assert_eq!(begin.data, 0xFFFF_FFFF);
        assert_eq!(end.data, 0);
    }

    #[test]
    fn test_preemption_disable_bit_follows_mode() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let kernel = f.kernel(simple_descriptor(16));
        let mid_thread = encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let thread_group = encode_with(&mut f, &kernel, PreemptionMode::ThreadGroup);
        assert!(!f.idd(&mid_thread).thread_preemption_disable);
        assert!(f.idd(&thread_group).thread_preemption_disable);
    }

    #[test]
    fn test_binding_table_prefetch_and_rebase() {
        let mut desc = simple_descriptor(16);
        desc.binding_table = BindingTableLayout {
            num_entries: 40,
            table_offset: 64 * 40,
        };
        let mut ssh = vec![0u8; 64 * 40 + 4 * 40];
        for i in 0..40u32 {
            let at = (64 * 40 + 4 * i) as usize;
            ssh[at..at + 4].copy_from_slice(&(i * 64).to_le_bytes());
        }
        desc.surface_state_heap = ssh;

        for (core, expected) in [(GfxCoreFamily::Gen9, 31), (GfxCoreFamily::Gen12Lp, 0)] {
            let mut f = Fixture::new(core);
            f.container.get_heap_space(HeapType::SurfaceState, 100, 64).unwrap();
            let kernel = f.kernel(desc.clone());
            let info = encode_with(&mut f, &kernel, PreemptionMode::MidThread);
            let idd = f.idd(&info);
            assert_eq!(idd.binding_table_entry_count, expected);
            // Template placed at 128; entry 1 now points at 128 + 64.
            assert_eq!(idd.binding_table_pointer, 128 + 64 * 40);
            let ssh = f.container.heap(HeapType::SurfaceState).unwrap().allocation();
            assert_eq!(ssh.read_u32(128 + 64 * 40 + 4), 128 + 64);
        }
    }

    #[test]
    fn test_samplers_follow_descriptor_into_grown_heap() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut desc = simple_descriptor(16);
        desc.sampler_table = SamplerTableLayout {
            num_samplers: 1,
            table_offset: 0,
            border_color_offset: 32,
        };
        desc.dynamic_state_heap = vec![0u8; 64];
        let kernel = f.kernel(desc);

        // Room for the samplers but not for a descriptor block after them.
        let capacity = f.container.heap(HeapType::DynamicState).unwrap().capacity();
        f.container.get_heap_space(HeapType::DynamicState, capacity - 64, 64).unwrap();
        let old_base = f.container.heap_gpu_base(HeapType::DynamicState);

        let info = encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        assert_ne!(f.container.heap_gpu_base(HeapType::DynamicState), old_base);
        let idd = f.idd(&info);
        assert_eq!(idd.kernel_start_pointer, kernel.isa_allocation().gpu_address_to_patch());
        assert_eq!(idd.sampler_count, 1);
        let dsh = f.container.heap(HeapType::DynamicState).unwrap().allocation();
        let sampler = idd.sampler_state_pointer as usize;
        assert_eq!(dsh.read_u32(sampler + 8), sampler as u32 + 32);
        assert!(!f.container.dirty_heaps().is_any_dirty());
    }

    #[test]
    fn test_payload_lands_in_indirect_object_heap() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut desc = simple_descriptor(8);
        desc.flags |= KernelFlags::PASSES_PER_THREAD_DATA;
        desc.num_local_id_channels = 1;
        desc.args = vec![ArgDescriptor::Value {
            cross_thread_offset: 16,
            size: 4,
        }];
        let mut kernel = f.kernel(desc);
        kernel.set_group_size(16, 1, 1).unwrap();
        kernel.set_argument_value(0, &0xABCDu32.to_le_bytes()).unwrap();

        let info = encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let ioh = f.container.heap(HeapType::IndirectObject).unwrap().allocation();
        assert_eq!(ioh.read_u32(info.indirect_data_offset + 16), 0xABCD);
        // Second thread, lane 0 holds local id x = 8.
        let second_thread = info.indirect_data_offset + 32 + 32;
        assert_eq!(ioh.read_u32(second_thread) & 0xFFFF, 8);
        assert_eq!(f.idd(&info).constant_urb_entry_read_length, 1);
    }

    #[test]
    #[should_panic(expected = "read length is zero")]
    fn test_zero_cross_thread_read_length_is_fatal() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut desc = simple_descriptor(16);
        desc.cross_thread_data_size = 0;
        desc.dispatch_traits = DispatchTraits::default();
        let kernel = f.kernel(desc);
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
    }

    #[test]
    #[should_panic(expected = "read length is zero")]
    fn test_zero_per_thread_read_length_is_fatal() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut desc = simple_descriptor(16);
        desc.flags |= KernelFlags::PASSES_PER_THREAD_DATA;
        desc.num_local_id_channels = 0;
        let kernel = f.kernel(desc);
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
    }

    #[test]
    fn test_indirect_dispatch_patches_group_counts() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let kernel = f.kernel(simple_descriptor(16));
        let counts = f.mm.allocate(AllocationType::Buffer, 12, 4).unwrap();

        let info = dispatch(&mut f, &kernel, PreemptionMode::MidThread, Some(counts.gpu_address()));

        let cmds = f.commands();
        let loads: Vec<_> = cmds
            .iter()
            .filter(|c| c[0] == MiLoadRegisterMem::HEADER)
            .map(|c| MiLoadRegisterMem::decode(c))
            .collect();
        let stores: Vec<_> = cmds
            .iter()
            .filter(|c| c[0] == MiStoreRegisterMem::HEADER)
            .map(|c| MiStoreRegisterMem::decode(c))
            .collect();
        assert_eq!(loads.len(), 3);
        assert_eq!(loads[1].register, registers::GPGPU_DISPATCHDIMY);
        assert_eq!(loads[1].address, counts.gpu_address() + 4);
        let ioh_base = f.container.heap_gpu_base(HeapType::IndirectObject);
        assert_eq!(stores[2].address, ioh_base + info.indirect_data_offset as u64 + 8);

        let walker = cmds.iter().find(|c| c[0] & !(1 << 10) == GpgpuWalker::HEADER).unwrap();
        assert!(GpgpuWalker::decode(walker).indirect_parameter_enable);
        assert_eq!(GpgpuWalker::decode(walker).thread_group_id_x_dimension, 0);
    }

    #[test]
    fn test_residency_includes_isa_args_and_indirect_allocations() {
        let mut f = Fixture::new(GfxCoreFamily::Gen12Lp);
        let mut desc = simple_descriptor(16);
        desc.args = vec![ArgDescriptor::Pointer { cross_thread_offset: 8 }];
        let mut kernel = f.kernel(desc);
        let buffer = f.mm.allocate(AllocationType::Buffer, 64, 1).unwrap();
        kernel.set_argument_buffer(0, Some(&buffer)).unwrap();
        let shared = f.mm.allocate_unified(UnifiedMemoryType::Shared, 64, 1).unwrap();
        let device = f.mm.allocate_unified(UnifiedMemoryType::Device, 64, 1).unwrap();
        kernel.set_indirect_access(UnifiedMemoryControls {
            indirect_shared_allowed: true,
            ..Default::default()
        });

        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        let residency = f.container.residency();
        assert!(residency.contains(kernel.isa_allocation()));
        assert!(residency.contains(&buffer));
        assert!(residency.contains(&shared));
        assert!(!residency.contains(&device));
    }

    #[test]
    fn test_overflow_chains_to_new_buffer() {
        let mut f = Fixture::new(GfxCoreFamily::Gen9);
        let kernel = f.kernel(simple_descriptor(8));
        encode_with(&mut f, &kernel, PreemptionMode::MidThread);

        let estimate = estimate_encode_dispatch_kernel_cmds_size(f.family.as_ref());
        let free = f.container.stream().available_space();
        f.container.stream_mut().get_space(free - (estimate - 1));
        let first = f.container.command_buffers()[0].clone();
        let end_offset = f.container.stream().used();

        encode_with(&mut f, &kernel, PreemptionMode::MidThread);
        assert_eq!(f.container.command_buffers().len(), 2);
        assert_eq!(first.read_u32(end_offset), crate::hw::commands::MI_BATCH_BUFFER_END);

        let cmds = f.commands();
        // No state changed: the new buffer starts with the walker sequence.
        let begin = MiLoadRegisterImm::decode(&cmds[0]);
        assert_eq!(begin.register, registers::CS_GPR_R0);
        assert_eq!(cmds[1][0], GpgpuWalker::HEADER);
    }

    #[test]
    fn test_estimate_covers_worst_case() {
        let mut f = Fixture::new(GfxCoreFamily::Gen9);
        let mut desc = simple_descriptor(8);
        desc.slm_size = 1024;
        let kernel = f.kernel(desc);
        let counts = f.mm.allocate(AllocationType::Buffer, 12, 4).unwrap();
        dispatch(&mut f, &kernel, PreemptionMode::MidThread, Some(counts.gpu_address()));
        let used = f.container.stream().used();
        assert!(used + BATCH_BUFFER_END_SIZE <= estimate_encode_dispatch_kernel_cmds_size(f.family.as_ref()));
    }
}
