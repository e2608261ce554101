// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command lists: recorded, reusable sequences of GPU work.
//!
//! | State     | Reached by                    | Appends | Submit | Destroy |
//! |-----------|-------------------------------|---------|--------|---------|
//! | Initial   | creation                      | yes     | no     | yes     |
//! | Recording | first append after (re)start  | yes     | no     | no      |
//! | Closed    | `close`                       | no      | yes    | yes     |
//! | Reset     | `reset`                       | yes     | no     | yes     |
//!
//! Compute lists dispatch kernels and route copies and fills through builtin
//! kernels. Copy-only lists emit blitter commands and reject kernel launches.

use std::sync::Arc;

use xe_common::{DriverError, DriverResult};

use crate::allocation::AllocationRef;
use crate::builtins::{Builtin, COPY_GROUP_SIZE, FILL_IMMEDIATE_MAX_PATTERN};
use crate::command_container::{CommandContainer, BATCH_BUFFER_END_SIZE};
use crate::command_stream_receiver::CommandStreamReceiver;
use crate::device::Device;
use crate::encoder::{encode_dispatch_kernel, DispatchArgs};
use crate::event::{offsets, Event, STATE_CLEARED, STATE_SIGNALED};
use crate::hw::commands::{
    registers, ColorDepth, MiFlushDw, MiLoadRegisterImm, MiLoadRegisterMem, MiPredicate, MiSemaphoreWait,
    MiStoreDataImm, MiStoreRegisterMem, PipeControl, PostSyncOp, PredicateCombineOp, PredicateCompareOp,
    PredicateLoadOp, SemaphoreCompare, XyColorBlt, XyCopyBlt,
};
use crate::kernel::Kernel;
use crate::memory_manager::UnifiedMemoryMask;
use crate::preemption::{kernel_preemption_mode, PreemptionMode};
use crate::printf::PrintfHandle;
use crate::residency::ResidencyContainer;

/// Blitter pitch field width.
const MAX_BLT_PITCH: u32 = 0xFFFF;

pub const MAX_FILL_PATTERN_SIZE: usize = 128;

/// Upper bound of the staging copy a large-pattern blit fill reads from.
const FILL_STAGING_SIZE: usize = 64 * 1024;

/// Patterns wider than a pixel are filled by copying them, not by color blits.
fn use_copy_for_fill(pattern_size: usize) -> bool {
    pattern_size > FILL_IMMEDIATE_MAX_PATTERN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    Initial,
    Recording,
    Closed,
    Reset,
}

/// Rectangle of a 2D copy, in bytes and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyRegion {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl CopyRegion {
    /// Bytes from the start of the surface to one past the region's last byte.
    fn extent(&self, pitch: u32) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        (self.origin_y + self.height - 1) as usize * pitch as usize + (self.origin_x + self.width) as usize
    }
}

#[derive(Debug)]
pub struct CommandList {
    device: Arc<Device>,
    container: CommandContainer,
    state: CommandListState,
    copy_only: bool,
    preemption_mode: PreemptionMode,
    max_scratch_size: u32,
    indirect_mask: UnifiedMemoryMask,
    printf_kernels: Vec<PrintfHandle>,
    last_submission: Option<(Arc<CommandStreamReceiver>, u32)>,
}

impl CommandList {
    pub fn new(device: Arc<Device>, copy_only: bool) -> DriverResult<Self> {
        let container = CommandContainer::new(device.memory_manager().clone(), device.settings(), copy_only)?;
        let preemption_mode = device.preemption_mode();
        log::debug!(
            "cmdlist: created on device {} ({})",
            device.index(),
            if copy_only { "copy" } else { "compute" }
        );
        Ok(Self {
            device,
            container,
            state: CommandListState::Initial,
            copy_only,
            preemption_mode,
            max_scratch_size: 0,
            indirect_mask: UnifiedMemoryMask::empty(),
            printf_kernels: Vec::new(),
            last_submission: None,
        })
    }

    // ── Accessors ──

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_copy_only(&self) -> bool {
        self.copy_only
    }

    /// Most restrictive preemption mode any appended kernel requires.
    pub fn preemption_mode(&self) -> PreemptionMode {
        self.preemption_mode
    }

    /// Largest per-thread scratch size of any appended kernel.
    pub fn max_scratch_size(&self) -> u32 {
        self.max_scratch_size
    }

    /// Unified-memory kinds appended kernels may reach indirectly.
    pub fn indirect_mask(&self) -> UnifiedMemoryMask {
        self.indirect_mask
    }

    pub fn container(&self) -> &CommandContainer {
        &self.container
    }

    pub(crate) fn container_mut(&mut self) -> &mut CommandContainer {
        &mut self.container
    }

    pub fn command_buffers(&self) -> &[AllocationRef] {
        self.container.command_buffers()
    }

    pub fn residency(&self) -> &ResidencyContainer {
        self.container.residency()
    }

    pub fn printf_handles(&self) -> &[PrintfHandle] {
        &self.printf_kernels
    }

    pub(crate) fn record_submission(&mut self, csr: Arc<CommandStreamReceiver>, task_count: u32) {
        self.last_submission = Some((csr, task_count));
    }

    // ── Kernel launches ──

    pub fn append_launch_kernel(
        &mut self,
        kernel: &mut Kernel,
        group_count: [u32; 3],
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_kernel_appendable()?;
        self.begin_recording();
        kernel.set_group_count(group_count);
        self.append_wait_commands(waits)?;
        self.append_timestamp(signal, TimestampPhase::Start)?;
        self.encode_launch(kernel, None, false)?;
        self.append_timestamp(signal, TimestampPhase::End)?;
        self.append_signal_commands(signal)
    }

    /// Launch with group counts read from `args_va` (three `u32`s) when the
    /// batch executes.
    pub fn append_launch_kernel_indirect(
        &mut self,
        kernel: &Kernel,
        args_va: u64,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_kernel_appendable()?;
        self.resolve(args_va, 12, "launch arguments")?;
        self.begin_recording();
        self.append_wait_commands(waits)?;
        self.append_timestamp(signal, TimestampPhase::Start)?;
        self.encode_launch(kernel, Some(args_va), false)?;
        self.append_timestamp(signal, TimestampPhase::End)?;
        self.append_signal_commands(signal)
    }

    /// Launch `kernels[i]` with group counts at `args_va + 12 * i`, for every
    /// `i` below the `u32` count stored at `count_va`.
    pub fn append_launch_multiple_kernels_indirect(
        &mut self,
        kernels: &[&Kernel],
        count_va: u64,
        args_va: u64,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_kernel_appendable()?;
        if kernels.is_empty() {
            return Err(DriverError::invalid_argument("no kernels to launch"));
        }
        self.resolve(count_va, 4, "launch count")?;
        self.resolve(args_va, 12 * kernels.len(), "launch arguments")?;
        self.begin_recording();
        self.append_wait_commands(waits)?;
        self.append_timestamp(signal, TimestampPhase::Start)?;

        let lri = |register, data| MiLoadRegisterImm {
            register,
            data,
            mmio_remap: false,
        };
        let mut setup = Vec::new();
        setup.extend(
            MiLoadRegisterMem {
                register: registers::MI_PREDICATE_SRC0,
                address: count_va,
            }
            .encode(),
        );
        setup.extend(lri(registers::MI_PREDICATE_SRC0 + 4, 0).encode());
        setup.extend(lri(registers::MI_PREDICATE_SRC1, 0).encode());
        setup.extend(lri(registers::MI_PREDICATE_SRC1 + 4, 0).encode());
        self.emit(&setup)?;

        for (i, kernel) in kernels.iter().enumerate() {
            let mut step = Vec::new();
            let combine = if i == 0 {
                PredicateCombineOp::Set
            } else {
                step.extend(lri(registers::MI_PREDICATE_SRC1, i as u32).encode());
                PredicateCombineOp::And
            };
            // predicate &= count != i
            step.extend(
                MiPredicate {
                    load: PredicateLoadOp::LoadInverted,
                    combine,
                    compare: PredicateCompareOp::SrcsEqual,
                }
                .encode(),
            );
            self.emit(&step)?;
            self.encode_launch(kernel, Some(args_va + 12 * i as u64), true)?;
        }

        self.append_timestamp(signal, TimestampPhase::End)?;
        self.append_signal_commands(signal)
    }

    fn check_kernel_appendable(&self) -> DriverResult<()> {
        self.check_appendable()?;
        if self.copy_only {
            return Err(DriverError::invalid_argument("kernel launch on a copy-only command list"));
        }
        Ok(())
    }

    fn encode_launch(&mut self, kernel: &Kernel, indirect: Option<u64>, predicate: bool) -> DriverResult<()> {
        let desc = kernel.descriptor();
        let required = kernel_preemption_mode(self.device.preemption_mode(), desc.flags);
        if required < self.preemption_mode {
            log::debug!(
                "cmdlist: kernel '{}' lowers preemption {:?} -> {:?}",
                desc.name,
                self.preemption_mode,
                required
            );
            self.preemption_mode = required;
        }
        self.max_scratch_size = self.max_scratch_size.max(desc.per_thread_scratch_size);
        self.indirect_mask |= kernel.unified_memory_controls().mask();

        let device = self.device.clone();
        let args = DispatchArgs {
            family: device.family(),
            indirect_group_counts: indirect,
            predicate,
            preemption_mode: self.preemption_mode,
            binding_table_prefetch: device.binding_table_prefetch(),
        };
        let info = encode_dispatch_kernel(&mut self.container, kernel, &args)?;
        log::trace!(
            "cmdlist: '{}' walker at 0x{:X}, groups {:?}{}",
            desc.name,
            info.walker_address,
            kernel.group_count(),
            if indirect.is_some() { " (indirect)" } else { "" }
        );

        if let Some(handle) = kernel.printf_handle() {
            let id = handle.buffer().id();
            if !self.printf_kernels.iter().any(|h| h.buffer().id() == id) {
                self.printf_kernels.push(handle);
            }
        }
        Ok(())
    }

    // ── Events and barriers ──

    pub fn append_signal_event(&mut self, event: &Event) -> DriverResult<()> {
        self.begin_append()?;
        self.append_signal_commands(Some(event))
    }

    pub fn append_wait_on_events(&mut self, events: &[&Event]) -> DriverResult<()> {
        self.begin_append()?;
        self.append_wait_commands(events)
    }

    pub fn append_event_reset(&mut self, event: &Event) -> DriverResult<()> {
        self.begin_append()?;
        self.container.add_to_residency(event.allocation());
        let mut dwords = MiStoreDataImm {
            address: event.gpu_address(),
            data: STATE_CLEARED,
        }
        .encode()
        .to_vec();
        if event.has_timestamps() {
            for offset in [
                offsets::CONTEXT_START,
                offsets::GLOBAL_START,
                offsets::CONTEXT_END,
                offsets::GLOBAL_END,
            ] {
                for half in [0, 4] {
                    dwords.extend(
                        MiStoreDataImm {
                            address: event.field_address(offset) + half,
                            data: 0,
                        }
                        .encode(),
                    );
                }
            }
        }
        self.emit(&dwords)?;
        Ok(())
    }

    /// Wait for `waits`, drain all prior work, then signal `signal`.
    pub fn append_barrier(&mut self, signal: Option<&Event>, waits: &[&Event]) -> DriverResult<()> {
        self.begin_append()?;
        self.append_wait_commands(waits)?;
        if self.copy_only {
            self.emit(&MiFlushDw::default().encode())?;
        } else {
            self.emit(&PipeControl::barrier(true).encode())?;
        }
        self.append_signal_commands(signal)
    }

    fn append_wait_commands(&mut self, events: &[&Event]) -> DriverResult<()> {
        for event in events {
            self.container.add_to_residency(event.allocation());
            let wait = MiSemaphoreWait {
                address: event.gpu_address(),
                data: STATE_SIGNALED,
                compare: SemaphoreCompare::Equal,
            };
            self.emit(&wait.encode())?;
        }
        Ok(())
    }

    fn append_signal_commands(&mut self, event: Option<&Event>) -> DriverResult<()> {
        let Some(event) = event else {
            return Ok(());
        };
        self.container.add_to_residency(event.allocation());
        if self.copy_only {
            let flush = MiFlushDw {
                post_sync: PostSyncOp::WriteImmediate,
                address: event.gpu_address(),
                immediate: STATE_SIGNALED as u64,
            };
            self.emit(&flush.encode())?;
        } else {
            self.emit(&PipeControl::with_post_sync(event.gpu_address(), STATE_SIGNALED as u64, true).encode())?;
        }
        Ok(())
    }

    fn append_timestamp(&mut self, event: Option<&Event>, phase: TimestampPhase) -> DriverResult<()> {
        let Some(event) = event.filter(|e| e.has_timestamps()) else {
            return Ok(());
        };
        self.container.add_to_residency(event.allocation());
        let store_registers = |global: usize, context: usize| {
            let mut dwords = Vec::new();
            for (register, offset) in [
                (registers::REG_GLOBAL_TIMESTAMP_LDW, global),
                (registers::GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW, context),
            ] {
                for half in [0, 4] {
                    let store = MiStoreRegisterMem {
                        register: register + half,
                        address: event.field_address(offset) + half as u64,
                    };
                    dwords.extend(store.encode());
                }
            }
            dwords
        };

        let dwords = match phase {
            TimestampPhase::Start => store_registers(offsets::GLOBAL_START, offsets::CONTEXT_START),
            // The copy engine has no context timestamp; only the global end is written.
            TimestampPhase::End if self.copy_only => MiFlushDw {
                post_sync: PostSyncOp::WriteTimestamp,
                address: event.field_address(offsets::GLOBAL_END),
                immediate: 0,
            }
            .encode()
            .to_vec(),
            TimestampPhase::End => {
                // Stall until the walker retires before sampling.
                let mut dwords = PipeControl::barrier(false).encode().to_vec();
                dwords.extend(store_registers(offsets::GLOBAL_END, offsets::CONTEXT_END));
                if !event.signal_scope().is_empty() {
                    dwords.extend(PipeControl::barrier(true).encode());
                }
                dwords
            }
        };
        self.emit(&dwords)?;
        Ok(())
    }

    /// Write the GPU timestamp to `dst_va` once prior work has drained.
    pub fn append_write_global_timestamp(
        &mut self,
        dst_va: u64,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_appendable()?;
        self.resolve(dst_va, 8, "timestamp destination")?;
        self.begin_recording();
        self.append_wait_commands(waits)?;
        if self.copy_only {
            let flush = MiFlushDw {
                post_sync: PostSyncOp::WriteTimestamp,
                address: dst_va,
                immediate: 0,
            };
            self.emit(&flush.encode())?;
        } else {
            let pc = PipeControl {
                cs_stall: true,
                post_sync: PostSyncOp::WriteTimestamp,
                address: dst_va,
                ..PipeControl::default()
            };
            self.emit(&pc.encode())?;
        }
        self.append_signal_commands(signal)
    }

    // ── Memory copies ──

    /// Copy `size` bytes from `src_va` to `dst_va`.
    pub fn append_memory_copy(
        &mut self,
        dst_va: u64,
        src_va: u64,
        size: usize,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_appendable()?;
        if size > 0 {
            self.resolve(src_va, size, "copy source")?;
            self.resolve(dst_va, size, "copy destination")?;
        }
        self.begin_recording();
        self.append_wait_commands(waits)?;
        if size > 0 {
            if self.copy_only {
                self.blit_linear(dst_va, src_va, size)?;
            } else {
                self.copy_with_kernel(dst_va, src_va, size)?;
            }
        }
        self.append_signal_commands(signal)
    }

    /// Copy a rectangle between two pitched surfaces. Both regions must have
    /// the same width and height.
    #[allow(clippy::too_many_arguments)]
    pub fn append_memory_copy_region(
        &mut self,
        dst_va: u64,
        dst_region: CopyRegion,
        dst_pitch: u32,
        src_va: u64,
        src_region: CopyRegion,
        src_pitch: u32,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_appendable()?;
        if (dst_region.width, dst_region.height) != (src_region.width, src_region.height) {
            return Err(DriverError::invalid_argument(format!(
                "copy regions differ in size: {}x{} vs {}x{}",
                dst_region.width, dst_region.height, src_region.width, src_region.height
            )));
        }
        if dst_region.origin_x + dst_region.width > dst_pitch || src_region.origin_x + src_region.width > src_pitch {
            return Err(DriverError::invalid_argument("copy region wider than its pitch"));
        }
        let empty = dst_region.width == 0 || dst_region.height == 0;
        if !empty {
            self.resolve(src_va, src_region.extent(src_pitch), "copy source")?;
            self.resolve(dst_va, dst_region.extent(dst_pitch), "copy destination")?;
        }
        self.begin_recording();
        self.append_wait_commands(waits)?;
        if !empty {
            if self.copy_only {
                self.blit_region(dst_va, dst_region, dst_pitch, src_va, src_region, src_pitch)?;
            } else {
                self.copy_region_with_kernel(dst_va, dst_region, dst_pitch, src_va, src_region, src_pitch)?;
            }
        }
        self.append_signal_commands(signal)
    }

    // ── Memory fills ──

    /// Fill `size` bytes at `dst_va` with repetitions of `pattern`. The
    /// pattern size must be a power of two no larger than
    /// [`MAX_FILL_PATTERN_SIZE`] and must divide `size`.
    pub fn append_memory_fill(
        &mut self,
        dst_va: u64,
        pattern: &[u8],
        size: usize,
        signal: Option<&Event>,
        waits: &[&Event],
    ) -> DriverResult<()> {
        self.check_appendable()?;
        if !pattern.len().is_power_of_two() || pattern.len() > MAX_FILL_PATTERN_SIZE {
            return Err(DriverError::invalid_argument(format!(
                "fill pattern of {} bytes",
                pattern.len()
            )));
        }
        if size % pattern.len() != 0 {
            return Err(DriverError::InvalidSize(format!(
                "fill of {} bytes with a {}-byte pattern",
                size,
                pattern.len()
            )));
        }
        if size > 0 {
            self.resolve(dst_va, size, "fill destination")?;
        }
        self.begin_recording();
        self.append_wait_commands(waits)?;
        if size > 0 {
            match (self.copy_only, use_copy_for_fill(pattern.len())) {
                (true, false) => self.blit_color_fill(dst_va, pattern, size)?,
                (true, true) => self.blit_copy_fill(dst_va, pattern, size)?,
                (false, _) => self.fill_with_kernel(dst_va, pattern, size)?,
            }
        }
        self.append_signal_commands(signal)
    }

    fn blit_color_fill(&mut self, dst_va: u64, pattern: &[u8], size: usize) -> DriverResult<()> {
        let depth = ColorDepth::from_bytes(pattern.len())
            .ok_or_else(|| DriverError::invalid_argument("no color depth for the fill pattern"))?;
        let bpp = depth.bytes();
        let mut color = [0u8; 4];
        color[..bpp].copy_from_slice(pattern);
        let pixels = size / bpp;
        let mut done = 0usize;
        while done < pixels {
            let remaining = pixels - done;
            let width = remaining.min(XyColorBlt::MAX_ROW_BYTES as usize / bpp);
            let height = (remaining / width).min(XyColorBlt::MAX_HEIGHT as usize);
            let blt = XyColorBlt {
                dst_address: dst_va + (done * bpp) as u64,
                dst_pitch: (width * bpp) as u32,
                dst_x2: width as u32,
                dst_y2: height as u32,
                color_depth: depth,
                color: u32::from_le_bytes(color),
                ..XyColorBlt::default()
            };
            self.emit(&blt.encode())?;
            done += width * height;
        }
        Ok(())
    }

    /// Replicate the pattern into a staging buffer and blit it over the
    /// destination chunk by chunk.
    fn blit_copy_fill(&mut self, dst_va: u64, pattern: &[u8], size: usize) -> DriverResult<()> {
        let chunk = size.min(FILL_STAGING_SIZE / pattern.len() * pattern.len());
        let data: Vec<u8> = pattern.iter().copied().cycle().take(chunk).collect();
        let staging = self.container.allocate_staging(&data)?;
        let mut offset = 0usize;
        while offset < size {
            let len = chunk.min(size - offset);
            self.blit_linear(dst_va + offset as u64, staging.gpu_address(), len)?;
            offset += len;
        }
        Ok(())
    }

    fn fill_with_kernel(&mut self, dst_va: u64, pattern: &[u8], size: usize) -> DriverResult<()> {
        let builtin = if use_copy_for_fill(pattern.len()) {
            Builtin::FillBufferPattern
        } else {
            Builtin::FillBufferImmediate
        };
        let mut kernel = self.builtin_kernel(builtin)?;
        kernel.set_group_size(COPY_GROUP_SIZE, 1, 1)?;
        kernel.set_argument_value(0, &dst_va.to_le_bytes())?;
        kernel.set_argument_value(1, &(size as u64).to_le_bytes())?;
        if builtin == Builtin::FillBufferImmediate {
            let mut word = [0u8; 4];
            for (i, byte) in word.iter_mut().enumerate() {
                *byte = pattern[i % pattern.len()];
            }
            kernel.set_argument_value(2, &word)?;
        } else {
            let staging = self.container.allocate_staging(pattern)?;
            kernel.set_argument_value(2, &staging.gpu_address().to_le_bytes())?;
            kernel.set_argument_value(3, &(pattern.len() as u64).to_le_bytes())?;
        }
        let groups = size.div_ceil(COPY_GROUP_SIZE as usize);
        let groups = u32::try_from(groups).map_err(|_| DriverError::InvalidSize(format!("fill of {} bytes", size)))?;
        kernel.set_group_count([groups, 1, 1]);
        log::trace!(
            "cmdlist: fill 0x{:X} ({} bytes, {}-byte pattern) via {}",
            dst_va,
            size,
            pattern.len(),
            builtin.name()
        );
        self.encode_launch(&kernel, None, false)
    }

    fn blit_linear(&mut self, dst_va: u64, src_va: u64, size: usize) -> DriverResult<()> {
        let mut offset = 0usize;
        while offset < size {
            let remaining = size - offset;
            let width = remaining.min(XyCopyBlt::MAX_WIDTH as usize);
            let height = (remaining / width).min(XyCopyBlt::MAX_HEIGHT as usize);
            let blt = XyCopyBlt {
                dst_address: dst_va + offset as u64,
                dst_pitch: width as u32,
                dst_x2: width as u32,
                dst_y2: height as u32,
                src_address: src_va + offset as u64,
                src_pitch: width as u32,
                ..XyCopyBlt::default()
            };
            self.emit(&blt.encode())?;
            offset += width * height;
        }
        Ok(())
    }

    fn blit_region(
        &mut self,
        dst_va: u64,
        dst: CopyRegion,
        dst_pitch: u32,
        src_va: u64,
        src: CopyRegion,
        src_pitch: u32,
    ) -> DriverResult<()> {
        if dst_pitch > MAX_BLT_PITCH || src_pitch > MAX_BLT_PITCH {
            return Err(DriverError::invalid_argument(format!(
                "pitch exceeds the blitter limit of {} bytes",
                MAX_BLT_PITCH
            )));
        }
        // Origins fold into the base addresses so only the extent is bounded.
        let dst_base = dst_va + dst.origin_y as u64 * dst_pitch as u64 + dst.origin_x as u64;
        let src_base = src_va + src.origin_y as u64 * src_pitch as u64 + src.origin_x as u64;
        let mut y = 0;
        while y < dst.height {
            let rows = (dst.height - y).min(XyCopyBlt::MAX_HEIGHT);
            let mut x = 0;
            while x < dst.width {
                let cols = (dst.width - x).min(XyCopyBlt::MAX_WIDTH);
                let blt = XyCopyBlt {
                    dst_address: dst_base + y as u64 * dst_pitch as u64 + x as u64,
                    dst_pitch,
                    dst_x2: cols,
                    dst_y2: rows,
                    src_address: src_base + y as u64 * src_pitch as u64 + x as u64,
                    src_pitch,
                    ..XyCopyBlt::default()
                };
                self.emit(&blt.encode())?;
                x += cols;
            }
            y += rows;
        }
        Ok(())
    }

    fn builtin_kernel(&self, builtin: Builtin) -> DriverResult<Kernel> {
        self.device.create_kernel(self.device.builtin(builtin))
    }

    fn copy_with_kernel(&mut self, dst_va: u64, src_va: u64, size: usize) -> DriverResult<()> {
        let mut kernel = self.builtin_kernel(Builtin::CopyBufferToBuffer)?;
        kernel.set_group_size(COPY_GROUP_SIZE, 1, 1)?;
        kernel.set_argument_value(0, &src_va.to_le_bytes())?;
        kernel.set_argument_value(1, &dst_va.to_le_bytes())?;
        kernel.set_argument_value(2, &(size as u64).to_le_bytes())?;
        let groups = size.div_ceil(COPY_GROUP_SIZE as usize);
        let groups = u32::try_from(groups).map_err(|_| DriverError::InvalidSize(format!("copy of {} bytes", size)))?;
        kernel.set_group_count([groups, 1, 1]);
        log::trace!(
            "cmdlist: copy 0x{:X} -> 0x{:X} ({} bytes) via {}",
            src_va,
            dst_va,
            size,
            Builtin::CopyBufferToBuffer.name()
        );
        self.encode_launch(&kernel, None, false)
    }

    fn copy_region_with_kernel(
        &mut self,
        dst_va: u64,
        dst: CopyRegion,
        dst_pitch: u32,
        src_va: u64,
        src: CopyRegion,
        src_pitch: u32,
    ) -> DriverResult<()> {
        let origin = |r: CopyRegion| {
            let mut bytes = [0u8; 8];
            bytes[..4].copy_from_slice(&r.origin_x.to_le_bytes());
            bytes[4..].copy_from_slice(&r.origin_y.to_le_bytes());
            bytes
        };
        let mut kernel = self.builtin_kernel(Builtin::CopyBufferRectBytes2d)?;
        kernel.set_argument_value(0, &src_va.to_le_bytes())?;
        kernel.set_argument_value(1, &dst_va.to_le_bytes())?;
        kernel.set_argument_value(2, &src_pitch.to_le_bytes())?;
        kernel.set_argument_value(3, &dst_pitch.to_le_bytes())?;
        kernel.set_argument_value(4, &origin(src))?;
        kernel.set_argument_value(5, &origin(dst))?;
        kernel.set_group_count([dst.width, dst.height, 1]);
        self.encode_launch(&kernel, None, false)
    }

    // ── Lifecycle ──

    /// Terminate the list. Closing a closed list is a no-op.
    pub fn close(&mut self) -> DriverResult<()> {
        if self.state != CommandListState::Closed {
            self.container.close();
            self.state = CommandListState::Closed;
            log::debug!(
                "cmdlist: closed with {} buffer(s), {} resident, preemption {:?}",
                self.container.command_buffers().len(),
                self.container.residency().len(),
                self.preemption_mode
            );
        }
        Ok(())
    }

    /// Discard recorded commands once the last submission has completed.
    pub fn reset(&mut self) -> DriverResult<()> {
        self.wait_for_last_submission()?;
        self.container.reset();
        self.state = CommandListState::Reset;
        self.preemption_mode = self.device.preemption_mode();
        self.max_scratch_size = 0;
        self.indirect_mask = UnifiedMemoryMask::empty();
        self.printf_kernels.clear();
        Ok(())
    }

    /// Release the list. A list still recording is handed back with the
    /// error.
    pub fn destroy(mut self) -> Result<(), (Self, DriverError)> {
        if self.state == CommandListState::Recording {
            return Err((self, DriverError::invalid_argument("command list is still recording")));
        }
        if let Err(err) = self.wait_for_last_submission() {
            return Err((self, err));
        }
        for handle in &self.printf_kernels {
            self.device.push_printf_output(handle.drain());
        }
        Ok(())
    }

    fn wait_for_last_submission(&mut self) -> DriverResult<()> {
        if let Some((csr, task_count)) = self.last_submission.take() {
            csr.wait_for_task_count(task_count, None)?;
        }
        Ok(())
    }

    // ── Helpers ──

    fn check_appendable(&self) -> DriverResult<()> {
        if self.state == CommandListState::Closed {
            return Err(DriverError::invalid_argument("append to a closed command list"));
        }
        Ok(())
    }

    /// Called once an append has passed validation.
    fn begin_recording(&mut self) {
        self.state = CommandListState::Recording;
    }

    /// For appends with nothing to validate beyond the list state.
    fn begin_append(&mut self) -> DriverResult<()> {
        self.check_appendable()?;
        self.begin_recording();
        Ok(())
    }

    fn emit(&mut self, dwords: &[u32]) -> DriverResult<u64> {
        self.container.ensure_space(dwords.len() * 4 + BATCH_BUFFER_END_SIZE)?;
        Ok(self.container.stream_mut().write_dwords(dwords))
    }

    /// Find the allocation backing `[va, va + len)` and make it resident.
    fn resolve(&mut self, va: u64, len: usize, what: &str) -> DriverResult<AllocationRef> {
        let allocation = self
            .device
            .memory_manager()
            .find_allocation(va)
            .filter(|a| a.contains_range(va, len))
            .ok_or_else(|| {
                DriverError::invalid_argument(format!("{} 0x{:X}+0x{:X} is not allocated", what, va, len))
            })?;
        self.container.add_to_residency(&allocation);
        Ok(allocation)
    }
}

#[derive(Debug, Clone, Copy)]
enum TimestampPhase {
    Start,
    End,
}
