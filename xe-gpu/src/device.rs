// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! One GPU as seen by the driver.
//!
//! A device owns its generation strategy, one command stream receiver per
//! compute ordinal plus an optional copy engine, and the builtin kernels.
//! Lists, queues, kernels and allocations are created through it.

use std::sync::Arc;

use parking_lot::Mutex;
use xe_common::settings::Settings;
use xe_common::{DriverError, DriverResult};

use crate::allocation::AllocationRef;
use crate::backend::SubmissionBackend;
use crate::builtins::{Builtin, BuiltinKernels};
use crate::command_list::CommandList;
use crate::command_queue::CommandQueue;
use crate::command_stream_receiver::{CommandStreamReceiver, EngineContext, EngineType};
use crate::event::{EventPool, EventPoolFlags};
use crate::hw::{family_for, HwFamily};
use crate::hw_info::HardwareInfo;
use crate::kernel::{Kernel, KernelDescriptor, KernelImmutableData};
use crate::memory_manager::{MemoryManager, UnifiedMemoryType};
use crate::preemption::PreemptionMode;

/// Engine contexts reserved per device.
const CONTEXTS_PER_DEVICE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    #[default]
    Default,
    /// Every `execute_command_lists` waits for completion.
    Synchronous,
    Asynchronous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandQueueDesc {
    pub ordinal: u32,
    pub copy_only: bool,
    pub mode: QueueMode,
}

#[derive(Debug)]
pub struct Device {
    index: u32,
    hw_info: HardwareInfo,
    family: Box<dyn HwFamily>,
    settings: Settings,
    memory_manager: Arc<MemoryManager>,
    compute_engines: Vec<Arc<CommandStreamReceiver>>,
    copy_engine: Option<Arc<CommandStreamReceiver>>,
    builtins: BuiltinKernels,
    preemption_mode: PreemptionMode,
    binding_table_prefetch: bool,
    printf_output: Mutex<Vec<String>>,
}

impl Device {
    pub fn new(
        index: u32,
        hw_info: HardwareInfo,
        memory_manager: Arc<MemoryManager>,
        backend: Arc<dyn SubmissionBackend>,
        settings: &Settings,
    ) -> DriverResult<Arc<Self>> {
        let family = family_for(hw_info.core_family);
        let compute_units = hw_info.compute_units();

        let mut compute_engines = Vec::with_capacity(hw_info.compute_engine_count as usize);
        for ordinal in 0..hw_info.compute_engine_count {
            let engine_type = if hw_info.uses_ccs {
                EngineType::Ccs(ordinal)
            } else {
                EngineType::Rcs
            };
            let context = EngineContext {
                context_id: index * CONTEXTS_PER_DEVICE + ordinal,
                engine_type,
            };
            compute_engines.push(Arc::new(CommandStreamReceiver::new(
                context,
                backend.clone(),
                memory_manager.clone(),
                compute_units,
            )?));
        }
        let copy_engine = if hw_info.has_blitter {
            let context = EngineContext {
                context_id: index * CONTEXTS_PER_DEVICE + hw_info.compute_engine_count,
                engine_type: EngineType::Bcs,
            };
            Some(Arc::new(CommandStreamReceiver::new(
                context,
                backend.clone(),
                memory_manager.clone(),
                compute_units,
            )?))
        } else {
            None
        };

        let preemption_mode = match settings.force_preemption_mode.map(PreemptionMode::from_raw) {
            Some(Some(mode)) => {
                log::debug!("device {}: preemption forced to {:?}", index, mode);
                mode
            }
            Some(None) => {
                log::warn!(
                    "device {}: ignoring invalid forced preemption mode {:?}",
                    index,
                    settings.force_preemption_mode
                );
                hw_info.default_preemption_mode
            }
            None => hw_info.default_preemption_mode,
        };
        let binding_table_prefetch = settings
            .enable_binding_table_prefetch
            .unwrap_or_else(|| family.binding_table_prefetch());

        let builtins = BuiltinKernels::new(&memory_manager)?;
        log::info!(
            "device {}: {} ({:?}), {} compute engine(s){}, preemption {:?}",
            index,
            hw_info.name,
            hw_info.core_family,
            compute_engines.len(),
            if copy_engine.is_some() { " + blitter" } else { "" },
            preemption_mode
        );

        Ok(Arc::new(Self {
            index,
            hw_info,
            family,
            settings: settings.clone(),
            memory_manager,
            compute_engines,
            copy_engine,
            builtins,
            preemption_mode,
            binding_table_prefetch,
            printf_output: Mutex::new(Vec::new()),
        }))
    }

    // ── Properties ──

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn hw_info(&self) -> &HardwareInfo {
        &self.hw_info
    }

    pub fn family(&self) -> &dyn HwFamily {
        self.family.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.memory_manager
    }

    /// Effective device preemption mode.
    pub fn preemption_mode(&self) -> PreemptionMode {
        self.preemption_mode
    }

    pub fn binding_table_prefetch(&self) -> bool {
        self.binding_table_prefetch
    }

    pub fn num_compute_engines(&self) -> u32 {
        self.compute_engines.len() as u32
    }

    pub fn num_copy_engines(&self) -> u32 {
        self.copy_engine.is_some() as u32
    }

    pub fn compute_engine(&self, ordinal: u32) -> Option<&Arc<CommandStreamReceiver>> {
        self.compute_engines.get(ordinal as usize)
    }

    pub fn copy_engine(&self) -> Option<&Arc<CommandStreamReceiver>> {
        self.copy_engine.as_ref()
    }

    pub fn builtin(&self, builtin: Builtin) -> &Arc<KernelImmutableData> {
        self.builtins.get(builtin)
    }

    // ── Object creation ──

    pub fn create_command_list(self: &Arc<Self>, copy_only: bool) -> DriverResult<CommandList> {
        if copy_only && self.copy_engine.is_none() {
            return Err(DriverError::UnsupportedFeature("copy engine"));
        }
        CommandList::new(self.clone(), copy_only)
    }

    /// Queue bound to `desc.ordinal`. Out-of-range ordinals are rejected.
    pub fn create_command_queue(self: &Arc<Self>, desc: CommandQueueDesc) -> DriverResult<CommandQueue> {
        let csr = if desc.copy_only {
            self.copy_engine.as_ref().filter(|_| desc.ordinal < self.num_copy_engines())
        } else {
            self.compute_engines.get(desc.ordinal as usize)
        };
        let Some(csr) = csr else {
            return Err(DriverError::invalid_argument(format!(
                "{} engine ordinal {} out of range ({} available)",
                if desc.copy_only { "copy" } else { "compute" },
                desc.ordinal,
                if desc.copy_only {
                    self.num_copy_engines()
                } else {
                    self.num_compute_engines()
                }
            )));
        };
        CommandQueue::new(self.clone(), csr.clone(), desc)
    }

    /// Upload a kernel's ISA and bind it to its descriptor.
    pub fn create_module_kernel(&self, desc: KernelDescriptor, isa: &[u8]) -> DriverResult<Arc<KernelImmutableData>> {
        KernelImmutableData::new(&self.memory_manager, desc, isa)
    }

    pub fn create_kernel(&self, immutable: &Arc<KernelImmutableData>) -> DriverResult<Kernel> {
        Kernel::new(immutable.clone(), &self.memory_manager, self.hw_info.max_work_group_size)
    }

    pub fn create_event_pool(&self, count: u32, flags: EventPoolFlags) -> DriverResult<Arc<EventPool>> {
        EventPool::new(&self.memory_manager, count, flags)
    }

    // ── Unified memory ──

    pub fn alloc_device_memory(&self, size: usize, alignment: usize) -> DriverResult<AllocationRef> {
        self.alloc_unified(UnifiedMemoryType::Device, size, alignment)
    }

    pub fn alloc_host_memory(&self, size: usize, alignment: usize) -> DriverResult<AllocationRef> {
        self.alloc_unified(UnifiedMemoryType::Host, size, alignment)
    }

    pub fn alloc_shared_memory(&self, size: usize, alignment: usize) -> DriverResult<AllocationRef> {
        self.alloc_unified(UnifiedMemoryType::Shared, size, alignment)
    }

    fn alloc_unified(&self, memory_type: UnifiedMemoryType, size: usize, alignment: usize) -> DriverResult<AllocationRef> {
        if size == 0 {
            return Err(DriverError::InvalidSize("zero-sized allocation".into()));
        }
        if alignment != 0 && !alignment.is_power_of_two() {
            return Err(DriverError::invalid_argument(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }
        self.memory_manager.allocate_unified(memory_type, size, alignment.max(1))
    }

    pub fn free_memory(&self, allocation: &AllocationRef) {
        self.memory_manager.free(allocation);
    }

    // ── Printf ──

    /// Printf lines drained so far, oldest first.
    pub fn take_printf_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.printf_output.lock())
    }

    pub(crate) fn push_printf_output(&self, lines: Vec<String>) {
        if !lines.is_empty() {
            self.printf_output.lock().extend(lines);
        }
    }
}
