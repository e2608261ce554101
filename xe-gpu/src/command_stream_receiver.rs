// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command stream receiver: the driver side of one engine context.
//!
//! Owns the tag allocation (first dword = last completed task count), the
//! latest-sent task count, the allocations to make resident for the next
//! submission and the context's scratch surface.
//!
//! A submission is built under [`CommandStreamReceiver::begin_submission`],
//! which holds the receiver's state lock until the batch has been handed to
//! the backend, so task counts leave in the order they were assigned.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use xe_common::{DriverResult, SyncStatus};

use crate::allocation::{AllocationRef, AllocationType};
use crate::backend::{FenceWait, SubmissionBackend, SubmitArgs, WaitStatus};
use crate::memory_manager::MemoryManager;
use crate::residency::ResidencyContainer;
use crate::scratch_space::ScratchSpaceController;
use crate::task_count::task_count_reached;

const TAG_ALLOCATION_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Rcs,
    /// Compute command streamer with its instance index.
    Ccs(u32),
    Bcs,
}

impl EngineType {
    pub fn is_copy(self) -> bool {
        matches!(self, Self::Bcs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineContext {
    pub context_id: u32,
    pub engine_type: EngineType,
}

#[derive(Debug)]
struct CsrState {
    latest_sent_task_count: u32,
    resident: ResidencyContainer,
    scratch: ScratchSpaceController,
}

#[derive(Debug)]
pub struct CommandStreamReceiver {
    context: EngineContext,
    backend: Arc<dyn SubmissionBackend>,
    memory_manager: Arc<MemoryManager>,
    tag_allocation: AllocationRef,
    state: Mutex<CsrState>,
}

impl CommandStreamReceiver {
    pub fn new(
        context: EngineContext,
        backend: Arc<dyn SubmissionBackend>,
        memory_manager: Arc<MemoryManager>,
        compute_units: u32,
    ) -> DriverResult<Self> {
        let tag_allocation = memory_manager.allocate(AllocationType::TagBuffer, TAG_ALLOCATION_SIZE, 64)?;
        log::debug!(
            "csr: context {} ({:?}) tag at 0x{:X}, backend {}",
            context.context_id,
            context.engine_type,
            tag_allocation.gpu_address(),
            backend.name()
        );
        let scratch = ScratchSpaceController::new(memory_manager.clone(), compute_units);
        Ok(Self {
            context,
            backend,
            memory_manager,
            tag_allocation,
            state: Mutex::new(CsrState {
                latest_sent_task_count: 0,
                resident: ResidencyContainer::new(),
                scratch,
            }),
        })
    }

    pub fn context(&self) -> EngineContext {
        self.context
    }

    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.memory_manager
    }

    pub fn tag_allocation(&self) -> &AllocationRef {
        &self.tag_allocation
    }

    /// Where batches write their task count on completion.
    pub fn tag_address(&self) -> u64 {
        self.tag_allocation.gpu_address()
    }

    pub fn completed_task_count(&self) -> u32 {
        self.tag_allocation.read_u32(0)
    }

    pub fn latest_sent_task_count(&self) -> u32 {
        self.state.lock().latest_sent_task_count
    }

    pub fn begin_submission(&self) -> Submission<'_> {
        Submission {
            csr: self,
            state: self.state.lock(),
        }
    }

    /// Wait until the tag reaches `task_count`.
    ///
    /// `Some(Duration::ZERO)` only polls and never blocks; `None` waits
    /// forever.
    pub fn wait_for_task_count(&self, task_count: u32, timeout: Option<Duration>) -> DriverResult<SyncStatus> {
        if task_count_reached(self.completed_task_count(), task_count) {
            return Ok(SyncStatus::Ready);
        }
        if timeout == Some(Duration::ZERO) {
            return Ok(SyncStatus::NotReady);
        }
        self.backend.flush()?;
        let fence = FenceWait {
            context: self.context,
            tag_address: self.tag_address(),
            task_count,
        };
        match self.backend.wait(&fence, timeout)? {
            WaitStatus::Ready => Ok(SyncStatus::Ready),
            WaitStatus::TimedOut => {
                log::debug!(
                    "csr: context {} timed out waiting for task {} (completed {})",
                    self.context.context_id,
                    task_count,
                    self.completed_task_count()
                );
                Ok(SyncStatus::NotReady)
            }
        }
    }

    pub fn flush(&self) -> DriverResult<()> {
        self.backend.flush()?;
        Ok(())
    }
}

impl Drop for CommandStreamReceiver {
    fn drop(&mut self) {
        self.memory_manager.free(&self.tag_allocation);
    }
}

/// Exclusive access to a receiver while one batch is assembled.
pub struct Submission<'a> {
    csr: &'a CommandStreamReceiver,
    state: MutexGuard<'a, CsrState>,
}

impl Submission<'_> {
    /// Task count the batch being built will complete.
    pub fn next_task_count(&self) -> u32 {
        self.state.latest_sent_task_count.wrapping_add(1)
    }

    pub fn latest_sent_task_count(&self) -> u32 {
        self.state.latest_sent_task_count
    }

    /// Bind a scratch surface of at least `required` bytes per thread.
    /// Returns whether a new surface was allocated.
    pub fn ensure_scratch(&mut self, required: u32) -> DriverResult<bool> {
        self.state.scratch.ensure(required)
    }

    pub fn scratch(&self) -> &ScratchSpaceController {
        &self.state.scratch
    }

    pub fn make_resident(&mut self, allocation: &AllocationRef) {
        self.state.resident.add(allocation);
    }

    pub fn make_resident_all<'b>(&mut self, allocations: impl IntoIterator<Item = &'b AllocationRef>) {
        self.state.resident.extend(allocations);
    }

    /// Hand the batch to the backend. The resident set is cleared whether
    /// or not the backend accepts it; the task count only advances on
    /// success.
    pub fn submit_batch_buffer(mut self, batch_address: u64, batch_length: usize) -> DriverResult<u32> {
        let csr = self.csr;
        let state = &mut *self.state;
        state.resident.add(&csr.tag_allocation);
        if let Some(scratch) = state.scratch.allocation() {
            state.resident.add(scratch);
        }
        let args = SubmitArgs {
            batch_address,
            batch_length,
            residency: state.resident.deduplicated(),
            context: csr.context,
        };
        state.resident.clear();

        log::debug!(
            "csr: context {} submit 0x{:X} ({} bytes, {} resident) as task {}",
            csr.context.context_id,
            batch_address,
            batch_length,
            args.residency.len(),
            state.latest_sent_task_count.wrapping_add(1)
        );
        csr.backend.submit(&args)?;
        state.latest_sent_task_count = state.latest_sent_task_count.wrapping_add(1);
        Ok(state.latest_sent_task_count)
    }
}
