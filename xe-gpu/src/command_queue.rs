// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command queues: submission of closed command lists to one engine.
//!
//! Every `execute_command_lists` call writes a small primary batch into a
//! ring allocation:
//!
//! 1. one-time state (PIPELINE_SELECT, STATE_BASE_ADDRESS, L3) on compute
//!    queues, and MEDIA_VFE_STATE whenever the receiver's scratch surface
//!    differs from the one this queue last programmed
//! 2. per list, the preemption register when the list's mode differs from
//!    the last programmed one, then a second-level MI_BATCH_BUFFER_START for
//!    each of its command buffers
//! 3. the task-count write to the receiver's tag, then MI_BATCH_BUFFER_END
//!
//! Rings are reused only once the task that last used them has completed.

use std::sync::Arc;

use xe_common::{timeout_from_ns, DriverError, DriverResult, SyncStatus};

use crate::allocation::{AllocationRef, AllocationType};
use crate::command_list::{CommandList, CommandListState};
use crate::command_stream_receiver::CommandStreamReceiver;
use crate::device::{CommandQueueDesc, Device, QueueMode};
use crate::fence::Fence;
use crate::hw::commands::{
    BaseAddress, MediaVfeState, MiBatchBufferStart, MiFlushDw, MiLoadRegisterImm, Pipeline, PipeControl,
    PipelineSelect, PostSyncOp, StateBaseAddress, MI_BATCH_BUFFER_END,
};
use crate::hw::HwFamily;
use crate::linear_stream::LinearStream;
use crate::preemption::{program_preemption_mode, PreemptionMode};
use crate::printf::PrintfHandle;
use crate::residency::ResidencyContainer;
use crate::task_count::task_count_reached;

const RING_BUFFER_SIZE: usize = 16 * 1024;

/// Bound size programmed for the general-state and instruction bases.
const MAX_BASE_SIZE: u32 = 0xFFFF_F000;

#[derive(Debug)]
struct Ring {
    allocation: AllocationRef,
    /// Task whose batch last lived in this ring.
    last_task_count: u32,
}

#[derive(Debug)]
pub struct CommandQueue {
    device: Arc<Device>,
    csr: Arc<CommandStreamReceiver>,
    ordinal: u32,
    copy_only: bool,
    synchronous: bool,
    rings: Vec<Ring>,
    state_programmed: bool,
    /// Per-thread scratch size MEDIA_VFE_STATE was last programmed with.
    programmed_scratch: u32,
    preemption_mode: PreemptionMode,
    task_count: u32,
    pending_printf: Vec<(u32, PrintfHandle)>,
}

impl CommandQueue {
    pub fn new(device: Arc<Device>, csr: Arc<CommandStreamReceiver>, desc: CommandQueueDesc) -> DriverResult<Self> {
        let synchronous = desc.mode == QueueMode::Synchronous || device.settings().make_each_enqueue_blocking;
        log::debug!(
            "queue: {} ordinal {} on context {}{}",
            if desc.copy_only { "copy" } else { "compute" },
            desc.ordinal,
            csr.context().context_id,
            if synchronous { ", synchronous" } else { "" }
        );
        Ok(Self {
            device,
            csr,
            ordinal: desc.ordinal,
            copy_only: desc.copy_only,
            synchronous,
            rings: Vec::new(),
            state_programmed: false,
            programmed_scratch: 0,
            preemption_mode: PreemptionMode::Initial,
            task_count: 0,
            pending_printf: Vec::new(),
        })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn is_copy_only(&self) -> bool {
        self.copy_only
    }

    pub fn csr(&self) -> &Arc<CommandStreamReceiver> {
        &self.csr
    }

    /// Task count of the most recent submission, 0 before the first.
    pub fn task_count(&self) -> u32 {
        self.task_count
    }

    pub fn create_fence(&self) -> Fence {
        Fence::new(self.csr.clone())
    }

    /// Submit `lists` in order as one batch.
    pub fn execute_command_lists(
        &mut self,
        lists: &mut [&mut CommandList],
        fence: Option<&Fence>,
    ) -> DriverResult<()> {
        self.validate(lists, fence)?;

        let memory_manager = self.device.memory_manager().clone();
        let mut residency = ResidencyContainer::new();
        let mut max_scratch = 0;
        for list in lists.iter() {
            residency.merge(list.residency());
            let mask = list.indirect_mask();
            if !mask.is_empty() {
                // Allocations created after the list was recorded count too.
                memory_manager.add_indirect_allocations_to_residency(&mut residency, mask);
            }
            max_scratch = max_scratch.max(list.max_scratch_size());
        }
        residency.deduplicate();

        let csr = self.csr.clone();
        let device = self.device.clone();
        let family = device.family();
        let mut submission = csr.begin_submission();
        if !self.copy_only {
            submission.ensure_scratch(max_scratch)?;
        }

        let ring_index = self.acquire_ring(self.estimate_ring_size(family, lists))?;
        let ring = self.rings[ring_index].allocation.clone();
        let mut stream = LinearStream::new(ring.clone());

        let mut preemption_mode = self.preemption_mode;
        let mut programmed_scratch = self.programmed_scratch;
        if !self.copy_only {
            if !self.state_programmed {
                self.program_one_time_state(&mut stream, family);
            }
            // A surface grown by an earlier rejected submit was never bound.
            let scratch_size = submission.scratch().per_thread_size();
            if !self.state_programmed || scratch_size != programmed_scratch {
                programmed_scratch = scratch_size;
                let vfe = MediaVfeState {
                    scratch_address: submission.scratch().gpu_address(),
                    per_thread_scratch_space: MediaVfeState::encode_scratch_size(programmed_scratch),
                    max_threads: device.hw_info().compute_units(),
                    num_urb_entries: 1,
                    urb_entry_allocation_size: 1,
                    curbe_allocation_size: 0,
                };
                stream.write_dwords(&vfe.encode());
            }
        }

        for list in lists.iter() {
            if !self.copy_only {
                program_preemption_mode(&mut stream, family, list.preemption_mode(), preemption_mode);
                preemption_mode = list.preemption_mode();
            }
            for buffer in list.command_buffers() {
                let start = MiBatchBufferStart {
                    address: buffer.gpu_address(),
                    second_level: true,
                };
                stream.write_dwords(&start.encode());
            }
        }

        let task_count = submission.next_task_count();
        if self.copy_only {
            let flush = MiFlushDw {
                post_sync: PostSyncOp::WriteImmediate,
                address: csr.tag_address(),
                immediate: task_count as u64,
            };
            stream.write_dwords(&flush.encode());
        } else {
            stream.write_dwords(&PipeControl::with_post_sync(csr.tag_address(), task_count as u64, true).encode());
        }
        stream.write_dwords(&[MI_BATCH_BUFFER_END]);

        if device.settings().print_execution_buffer {
            log::info!("queue: ring 0x{:X} {:08X?}", ring.gpu_address(), stream.dwords());
        }

        submission.make_resident(&ring);
        submission.make_resident_all(residency.iter());
        let task_count = submission.submit_batch_buffer(ring.gpu_address(), stream.used())?;

        self.rings[ring_index].last_task_count = task_count;
        self.state_programmed = self.state_programmed || !self.copy_only;
        self.programmed_scratch = programmed_scratch;
        self.preemption_mode = preemption_mode;
        self.task_count = task_count;
        if let Some(fence) = fence {
            fence.assign(task_count);
        }
        for list in lists.iter_mut() {
            list.record_submission(csr.clone(), task_count);
            self.pending_printf
                .extend(list.printf_handles().iter().map(|h| (task_count, h.clone())));
        }
        log::debug!(
            "queue: {} list(s) submitted as task {} on context {}",
            lists.len(),
            task_count,
            csr.context().context_id
        );

        if self.synchronous {
            self.synchronize(u64::MAX)?;
        } else {
            self.drain_completed_printf();
        }
        Ok(())
    }

    /// Wait for the last submission. Zero polls; `u64::MAX` waits forever.
    pub fn synchronize(&mut self, timeout_ns: u64) -> DriverResult<SyncStatus> {
        let status = self
            .csr
            .wait_for_task_count(self.task_count, timeout_from_ns(timeout_ns))?;
        if status.is_ready() {
            self.drain_completed_printf();
        }
        Ok(status)
    }

    fn validate(&self, lists: &[&mut CommandList], fence: Option<&Fence>) -> DriverResult<()> {
        if lists.is_empty() {
            return Err(DriverError::invalid_argument("no command lists to execute"));
        }
        if let Some(fence) = fence {
            if !Arc::ptr_eq(fence.csr(), &self.csr) {
                return Err(DriverError::invalid_argument("fence belongs to another queue's engine"));
            }
        }
        for (i, list) in lists.iter().enumerate() {
            if list.is_copy_only() != self.copy_only {
                log::warn!(
                    "queue: list {} is {} but the queue is {}",
                    i,
                    if list.is_copy_only() { "copy-only" } else { "compute" },
                    if self.copy_only { "copy-only" } else { "compute" }
                );
                return Err(DriverError::WrongCommandListType {
                    list_copy_only: list.is_copy_only(),
                    queue_copy_only: self.copy_only,
                });
            }
            if list.state() != CommandListState::Closed {
                return Err(DriverError::invalid_argument(format!(
                    "command list {} is not closed ({:?})",
                    i,
                    list.state()
                )));
            }
        }
        Ok(())
    }

    fn estimate_ring_size(&self, family: &dyn HwFamily, lists: &[&mut CommandList]) -> usize {
        let state = PipelineSelect::DWORDS
            + PipeControl::DWORDS
            + family.state_base_address_dwords()
            + MiLoadRegisterImm::DWORDS
            + MediaVfeState::DWORDS;
        let lists: usize = lists
            .iter()
            .map(|l| MiLoadRegisterImm::DWORDS + l.command_buffers().len() * MiBatchBufferStart::DWORDS)
            .sum();
        let tail = PipeControl::DWORDS.max(MiFlushDw::DWORDS) + 1;
        (state + lists + tail) * 4
    }

    /// Index of a ring of at least `size` bytes whose last batch completed.
    fn acquire_ring(&mut self, size: usize) -> DriverResult<usize> {
        let free = self
            .rings
            .iter()
            .position(|ring| ring.allocation.size() >= size && self.ring_idle(ring));
        if let Some(index) = free {
            return Ok(index);
        }
        let allocation = self.device.memory_manager().allocate(
            AllocationType::RingBuffer,
            size.max(RING_BUFFER_SIZE),
            xe_common::CACHELINE_SIZE,
        )?;
        log::debug!(
            "queue: ring {} at 0x{:X} ({} bytes)",
            self.rings.len(),
            allocation.gpu_address(),
            allocation.size()
        );
        self.rings.push(Ring {
            allocation,
            last_task_count: 0,
        });
        Ok(self.rings.len() - 1)
    }

    fn ring_idle(&self, ring: &Ring) -> bool {
        ring.last_task_count == 0 || task_count_reached(self.csr.completed_task_count(), ring.last_task_count)
    }

    fn program_one_time_state(&self, stream: &mut LinearStream, family: &dyn HwFamily) {
        let sba = StateBaseAddress {
            general_state: Some(BaseAddress {
                base: 0,
                size: MAX_BASE_SIZE,
            }),
            instruction: Some(BaseAddress {
                base: self.device.memory_manager().internal_heap_base(),
                size: MAX_BASE_SIZE,
            }),
            ..StateBaseAddress::default()
        };
        stream.write_dwords(
            &PipelineSelect {
                pipeline: Pipeline::Gpgpu,
            }
            .encode(),
        );
        stream.write_dwords(&PipeControl::barrier(true).encode());
        stream.write_dwords(&family.encode_state_base_address(&sba));
        stream.write_dwords(&family.encode_l3_config(false).encode());
    }

    fn drain_completed_printf(&mut self) {
        if self.pending_printf.is_empty() {
            return;
        }
        let completed = self.csr.completed_task_count();
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_printf)
            .into_iter()
            .partition(|(task_count, _)| task_count_reached(completed, *task_count));
        self.pending_printf = pending;
        for (_, handle) in done {
            self.device.push_printf_output(handle.drain());
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if !self.pending_printf.is_empty() {
            if let Err(e) = self.csr.flush() {
                log::warn!("queue: flush on destroy failed: {}", e);
            }
        }
        self.drain_completed_printf();
        // Rings still referenced by in-flight batches stay mapped.
        for ring in self.rings.iter().filter(|ring| self.ring_idle(ring)) {
            self.device.memory_manager().free(&ring.allocation);
        }
    }
}
