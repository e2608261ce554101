// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-process execution of submitted batches.
//!
//! Each submission is turned into an exec-object list from its residency
//! set, and the batch is then run by a [`CommandProcessor`] bound to the
//! engine model of the submitting context. Memory accesses are checked
//! against the resident allocations only; touching anything else is a page
//! fault, which loses the device.
//!
//! In [`ExecutionMode::Deferred`] submissions queue up until `flush()`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use parking_lot::Mutex;
use xe_common::settings::Settings;

use super::{BackendError, FenceWait, SubmissionBackend, SubmitArgs, WaitStatus};
use crate::allocation::AllocationRef;
use crate::command_processor::CommandProcessor;
use crate::command_stream_receiver::{EngineContext, EngineType};
use crate::engines::blitter::BlitterEngine;
use crate::engines::compute::{ComputeEngine, DispatchLog, DispatchRecord, KernelHandler, KernelHandlers};
use crate::engines::{Engine, ExecResult, ExecutionError, GpuMemory, RegisterFile};
use crate::task_count::TaskCountMonitor;

/// How long MI_SEMAPHORE_WAIT polls before the batch counts as hung.
pub const DEFAULT_SEMAPHORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Granularity at which `wait` re-checks for device loss.
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Execute inside `submit`.
    #[default]
    Immediate,
    /// Queue until `flush`.
    Deferred,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecObjectFlags: u32 {
        const SUPPORTS_48B_ADDRESS = 1 << 3;
        const PINNED = 1 << 4;
    }
}

/// One entry of the exec-object list built for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecObject {
    pub handle: u32,
    pub offset: u64,
    pub size: usize,
    pub flags: ExecObjectFlags,
}

// ── Resident memory ──

/// GPU memory restricted to the allocations of one submission.
struct ResidentMemory {
    allocations: BTreeMap<u64, AllocationRef>,
}

impl ResidentMemory {
    fn new(residency: &[AllocationRef]) -> Self {
        Self {
            allocations: residency.iter().map(|a| (a.gpu_address(), a.clone())).collect(),
        }
    }

    fn locate(&self, va: u64, len: usize) -> ExecResult<(&AllocationRef, usize)> {
        self.allocations
            .range(..=va)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.contains_range(va, len))
            .map(|a| (a, (va - a.gpu_address()) as usize))
            .ok_or(ExecutionError::PageFault { va, len })
    }
}

impl GpuMemory for ResidentMemory {
    fn read(&self, va: u64, dst: &mut [u8]) -> ExecResult<()> {
        let (allocation, offset) = self.locate(va, dst.len())?;
        allocation.read(offset, dst);
        Ok(())
    }

    fn write(&self, va: u64, src: &[u8]) -> ExecResult<()> {
        let (allocation, offset) = self.locate(va, src.len())?;
        allocation.write(offset, src);
        Ok(())
    }
}

// ── Backend ──

struct ContextState {
    engine: Box<dyn Engine>,
    registers: RegisterFile,
}

pub struct SimulatedBackend {
    mode: ExecutionMode,
    print_execution_buffer: bool,
    semaphore_timeout: Duration,
    contexts: Mutex<HashMap<u32, Arc<Mutex<ContextState>>>>,
    pending: Mutex<VecDeque<SubmitArgs>>,
    monitor: TaskCountMonitor,
    handlers: Arc<KernelHandlers>,
    dispatches: DispatchLog,
    lost: AtomicBool,
    injected_failure: Mutex<Option<BackendError>>,
    submissions: AtomicU64,
    last_exec_objects: Mutex<Vec<ExecObject>>,
}

impl SimulatedBackend {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            print_execution_buffer: false,
            semaphore_timeout: DEFAULT_SEMAPHORE_TIMEOUT,
            contexts: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            monitor: TaskCountMonitor::new(),
            handlers: Arc::new(KernelHandlers::new()),
            dispatches: DispatchLog::default(),
            lost: AtomicBool::new(false),
            injected_failure: Mutex::new(None),
            submissions: AtomicU64::new(0),
            last_exec_objects: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(mode: ExecutionMode, settings: &Settings) -> Self {
        Self {
            print_execution_buffer: settings.print_execution_buffer,
            ..Self::new(mode)
        }
    }

    pub fn with_semaphore_timeout(mut self, timeout: Duration) -> Self {
        self.semaphore_timeout = timeout;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Run `handler` whenever a walker dispatches the kernel whose ISA
    /// starts at `kernel_start`.
    pub fn register_kernel_handler(&self, kernel_start: u64, handler: KernelHandler) {
        self.handlers.register(kernel_start, handler);
    }

    pub fn unregister_kernel_handler(&self, kernel_start: u64) {
        self.handlers.unregister(kernel_start);
    }

    /// Every walker executed so far, in execution order.
    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.dispatches.lock().clone()
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn last_exec_objects(&self) -> Vec<ExecObject> {
        self.last_exec_objects.lock().clone()
    }

    pub fn completed_task_count(&self, context: &EngineContext) -> u32 {
        self.monitor.value(context.context_id)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Make the next `submit` fail with `error` before anything executes.
    pub fn fail_next_submit(&self, error: BackendError) {
        *self.injected_failure.lock() = Some(error);
    }

    fn context_state(&self, context: &EngineContext) -> Arc<Mutex<ContextState>> {
        self.contexts
            .lock()
            .entry(context.context_id)
            .or_insert_with(|| {
                let engine: Box<dyn Engine> = match context.engine_type {
                    EngineType::Bcs => Box::new(BlitterEngine::new()),
                    EngineType::Rcs | EngineType::Ccs(_) => Box::new(ComputeEngine::new(
                        context.context_id,
                        self.handlers.clone(),
                        self.dispatches.clone(),
                    )),
                };
                log::debug!(
                    "sim: context {} created ({:?}, {} engine)",
                    context.context_id,
                    context.engine_type,
                    engine.name()
                );
                Arc::new(Mutex::new(ContextState {
                    engine,
                    registers: RegisterFile::new(),
                }))
            })
            .clone()
    }

    fn build_exec_objects(&self, args: &SubmitArgs) -> Vec<ExecObject> {
        let objects: Vec<ExecObject> = args
            .residency
            .iter()
            .map(|a| ExecObject {
                handle: a.id(),
                offset: a.gpu_address(),
                size: a.size(),
                flags: ExecObjectFlags::PINNED | ExecObjectFlags::SUPPORTS_48B_ADDRESS,
            })
            .collect();
        if self.print_execution_buffer {
            log::info!(
                "exec buffer: context {} batch 0x{:X} len {} objects {}",
                args.context.context_id,
                args.batch_address,
                args.batch_length,
                objects.len()
            );
            for (i, o) in objects.iter().enumerate() {
                log::info!(
                    "  [{}] handle {} offset 0x{:X} size 0x{:X} flags {:?}",
                    i,
                    o.handle,
                    o.offset,
                    o.size,
                    o.flags
                );
            }
        }
        objects
    }

    fn execute(&self, args: &SubmitArgs) -> Result<(), BackendError> {
        if self.is_lost() {
            return Err(BackendError::DeviceLost);
        }
        let memory = ResidentMemory::new(&args.residency);
        let state = self.context_state(&args.context);
        let result = {
            let mut state = state.lock();
            let ContextState { engine, registers } = &mut *state;
            CommandProcessor::new(&memory, engine.as_mut(), registers, self.semaphore_timeout)
                .execute_batch(args.batch_address)
        };
        match result {
            Ok(stats) => {
                let task_count = self.monitor.increment(args.context.context_id);
                log::trace!(
                    "sim: context {} completed task {} ({} commands)",
                    args.context.context_id,
                    task_count,
                    stats.commands
                );
                Ok(())
            }
            Err(err) => {
                log::error!(
                    "sim: batch 0x{:X} on context {} failed: {}",
                    args.batch_address,
                    args.context.context_id,
                    err
                );
                self.lost.store(true, Ordering::Release);
                Err(err.into())
            }
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(ExecutionMode::Immediate)
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("mode", &self.mode)
            .field("submissions", &self.submission_count())
            .field("lost", &self.is_lost())
            .finish_non_exhaustive()
    }
}

impl SubmissionBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn submit(&self, args: &SubmitArgs) -> Result<(), BackendError> {
        if let Some(err) = self.injected_failure.lock().take() {
            log::warn!("sim: injected submit failure: {}", err);
            return Err(err);
        }
        if self.is_lost() {
            return Err(BackendError::DeviceLost);
        }
        *self.last_exec_objects.lock() = self.build_exec_objects(args);
        self.submissions.fetch_add(1, Ordering::Relaxed);

        match self.mode {
            ExecutionMode::Immediate => self.execute(args),
            ExecutionMode::Deferred => {
                self.pending.lock().push_back(args.clone());
                Ok(())
            }
        }
    }

    fn wait(&self, fence: &FenceWait, timeout: Option<Duration>) -> Result<WaitStatus, BackendError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_lost() {
                return Err(BackendError::DeviceLost);
            }
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(WAIT_SLICE),
                None => WAIT_SLICE,
            };
            if self.monitor.wait(fence.context.context_id, fence.task_count, Some(slice)) {
                return Ok(WaitStatus::Ready);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(WaitStatus::TimedOut);
            }
        }
    }

    fn flush(&self) -> Result<(), BackendError> {
        loop {
            let Some(args) = self.pending.lock().pop_front() else {
                return Ok(());
            };
            self.execute(&args)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationType;
    use crate::hw::commands::{MiStoreDataImm, XyCopyBlt, MI_BATCH_BUFFER_END};
    use crate::memory_manager::MemoryManager;

    const RCS: EngineContext = EngineContext {
        context_id: 0,
        engine_type: EngineType::Rcs,
    };
    const BCS: EngineContext = EngineContext {
        context_id: 1,
        engine_type: EngineType::Bcs,
    };

    fn batch(mm: &MemoryManager, dwords: &[u32]) -> AllocationRef {
        let alloc = mm.allocate(AllocationType::CommandBuffer, 4096, 4096).unwrap();
        for (i, dw) in dwords.iter().enumerate() {
            alloc.write_u32(i * 4, *dw);
        }
        alloc
    }

    fn args(batch: &AllocationRef, residency: &[&AllocationRef], context: EngineContext) -> SubmitArgs {
        let mut all = vec![batch.clone()];
        all.extend(residency.iter().map(|a| (*a).clone()));
        SubmitArgs {
            batch_address: batch.gpu_address(),
            batch_length: 64,
            residency: all,
            context,
        }
    }

    fn store(address: u64, data: u32) -> Vec<u32> {
        let mut dw = MiStoreDataImm { address, data }.encode().to_vec();
        dw.push(MI_BATCH_BUFFER_END);
        dw
    }

    fn fence(context: EngineContext, task_count: u32) -> FenceWait {
        FenceWait {
            context,
            tag_address: 0,
            task_count,
        }
    }

    #[test]
    fn test_immediate_execution_completes_task() {
        let mm = MemoryManager::new();
        let target = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let bb = batch(&mm, &store(target.gpu_address(), 0xCAFE));

        let backend = SimulatedBackend::new(ExecutionMode::Immediate);
        backend.submit(&args(&bb, &[&target], RCS)).unwrap();
        assert_eq!(target.read_u32(0), 0xCAFE);
        assert_eq!(backend.completed_task_count(&RCS), 1);
        assert_eq!(
            backend.wait(&fence(RCS, 1), Some(Duration::ZERO)),
            Ok(WaitStatus::Ready)
        );
        assert_eq!(
            backend.wait(&fence(RCS, 2), Some(Duration::from_millis(1))),
            Ok(WaitStatus::TimedOut)
        );
    }

    #[test]
    fn test_exec_objects_cover_residency() {
        let mm = MemoryManager::new();
        let target = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let bb = batch(&mm, &store(target.gpu_address(), 1));
        let backend = SimulatedBackend::from_settings(
            ExecutionMode::Immediate,
            &Settings {
                print_execution_buffer: true,
                ..Settings::default()
            },
        );
        backend.submit(&args(&bb, &[&target], RCS)).unwrap();
        let objects = backend.last_exec_objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].handle, target.id());
        assert_eq!(objects[1].offset, target.gpu_address());
        assert!(objects[0]
            .flags
            .contains(ExecObjectFlags::PINNED | ExecObjectFlags::SUPPORTS_48B_ADDRESS));
    }

    #[test]
    fn test_non_resident_access_loses_device() {
        let mm = MemoryManager::new();
        let target = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let bb = batch(&mm, &store(target.gpu_address(), 1));

        let backend = SimulatedBackend::new(ExecutionMode::Immediate);
        assert_eq!(
            backend.submit(&args(&bb, &[], RCS)),
            Err(BackendError::PageFault {
                va: target.gpu_address()
            })
        );
        assert_eq!(target.read_u32(0), 0);
        assert!(backend.is_lost());
        assert_eq!(
            backend.submit(&args(&bb, &[&target], RCS)),
            Err(BackendError::DeviceLost)
        );
        assert_eq!(backend.wait(&fence(RCS, 1), None), Err(BackendError::DeviceLost));
    }

    #[test]
    fn test_deferred_runs_on_flush() {
        let mm = MemoryManager::new();
        let target = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let bb = batch(&mm, &store(target.gpu_address(), 7));

        let backend = SimulatedBackend::new(ExecutionMode::Deferred);
        backend.submit(&args(&bb, &[&target], RCS)).unwrap();
        assert_eq!(backend.pending_count(), 1);
        assert_eq!(target.read_u32(0), 0);
        assert_eq!(
            backend.wait(&fence(RCS, 1), Some(Duration::ZERO)),
            Ok(WaitStatus::TimedOut)
        );

        backend.flush().unwrap();
        assert_eq!(backend.pending_count(), 0);
        assert_eq!(target.read_u32(0), 7);
        assert_eq!(backend.wait(&fence(RCS, 1), None), Ok(WaitStatus::Ready));
    }

    #[test]
    fn test_copy_context_runs_blits() {
        let mm = MemoryManager::new();
        let src = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let dst = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        src.write(0, b"0123456789");
        let blt = XyCopyBlt {
            src_address: src.gpu_address(),
            dst_address: dst.gpu_address(),
            dst_x2: 10,
            dst_y2: 1,
            src_pitch: 10,
            dst_pitch: 10,
            ..XyCopyBlt::default()
        };
        let mut dwords = blt.encode().to_vec();
        dwords.push(MI_BATCH_BUFFER_END);
        let bb = batch(&mm, &dwords);

        let backend = SimulatedBackend::new(ExecutionMode::Immediate);
        backend.submit(&args(&bb, &[&src, &dst], BCS)).unwrap();
        assert_eq!(dst.to_vec(10), b"0123456789");
        assert_eq!(backend.completed_task_count(&BCS), 1);
        assert_eq!(backend.completed_task_count(&RCS), 0);

        // The same blit on a compute context is rejected.
        assert!(matches!(
            backend.submit(&args(&bb, &[&src, &dst], RCS)),
            Err(BackendError::ExecutionFailed(_))
        ));
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let mm = MemoryManager::new();
        let target = mm.allocate(AllocationType::Buffer, 64, 64).unwrap();
        let bb = batch(&mm, &store(target.gpu_address(), 3));

        let backend = SimulatedBackend::new(ExecutionMode::Immediate);
        backend.fail_next_submit(BackendError::OutOfResources);
        assert_eq!(
            backend.submit(&args(&bb, &[&target], RCS)),
            Err(BackendError::OutOfResources)
        );
        assert_eq!(backend.submission_count(), 0);
        backend.submit(&args(&bb, &[&target], RCS)).unwrap();
        assert_eq!(target.read_u32(0), 3);
    }
}
