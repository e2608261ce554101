// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Compute engine model (RCS/CCS).
//!
//! Tracks the GPGPU pipeline state programmed by the stream and executes
//! GPGPU_WALKER dispatches. A walker resolves its interface descriptor
//! through the dynamic-state base and the loaded descriptor block, and its
//! payload through the indirect-object base. The kernel then runs as a
//! builtin when its ISA carries the builtin tag, or through a handler
//! registered for its start address.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{Mutex, RwLock};

use super::{Engine, ExecContext, ExecResult, ExecutionError, GpuMemory};
use crate::builtins::{layout, Builtin};
use crate::command_processor::post_sync_write;
use crate::hw::commands::{
    registers, GpgpuWalker, InterfaceDescriptorData, MediaInterfaceDescriptorLoad, MediaVfeState, PipeControl,
    Pipeline, PipelineSelect, StateBaseAddress, MEDIA_STATE_FLUSH,
};

/// What a kernel handler gets to see of one dispatch.
pub struct DispatchContext<'a> {
    pub memory: &'a dyn GpuMemory,
    pub group_count: [u32; 3],
    pub threads_per_group: u32,
    pub simd_size: u32,
    pub cross_thread_data: &'a [u8],
}

impl DispatchContext<'_> {
    pub fn cross_thread_u32(&self, offset: usize) -> u32 {
        read_u32_at(self.cross_thread_data, offset)
    }

    pub fn cross_thread_u64(&self, offset: usize) -> u64 {
        read_u64_at(self.cross_thread_data, offset)
    }
}

/// Host-side implementation of a kernel, run once per dispatch.
pub type KernelHandler = Arc<dyn Fn(&DispatchContext<'_>) -> Result<(), String> + Send + Sync>;

/// Handlers keyed by the GPU address of the kernel's ISA.
#[derive(Default)]
pub struct KernelHandlers {
    handlers: RwLock<HashMap<u64, KernelHandler>>,
}

impl KernelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kernel_start: u64, handler: KernelHandler) {
        log::debug!("compute: handler registered for kernel at 0x{:X}", kernel_start);
        self.handlers.write().insert(kernel_start, handler);
    }

    pub fn unregister(&self, kernel_start: u64) {
        self.handlers.write().remove(&kernel_start);
    }

    fn get(&self, kernel_start: u64) -> Option<KernelHandler> {
        self.handlers.read().get(&kernel_start).cloned()
    }
}

impl std::fmt::Debug for KernelHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandlers")
            .field("count", &self.handlers.read().len())
            .finish()
    }
}

/// One executed walker, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub context_id: u32,
    pub kernel_start: u64,
    pub builtin: Option<Builtin>,
    pub group_count: [u32; 3],
    pub threads_per_group: u32,
    pub simd_size: u32,
    pub indirect: bool,
    pub slm_encoding: u32,
    pub barrier_enable: bool,
    pub thread_preemption_disable: bool,
    pub cross_thread_data: Vec<u8>,
}

pub type DispatchLog = Arc<Mutex<Vec<DispatchRecord>>>;

#[derive(Debug, Default, Clone, Copy)]
struct BaseAddresses {
    general_state: u64,
    surface_state: u64,
    dynamic_state: u64,
    indirect_object: u64,
    instruction: u64,
}

const fn gfx_opcode(header: u32) -> u32 {
    header >> 16
}

pub struct ComputeEngine {
    context_id: u32,
    pipeline: Option<Pipeline>,
    bases: BaseAddresses,
    idd_block: Option<MediaInterfaceDescriptorLoad>,
    vfe: Option<MediaVfeState>,
    handlers: Arc<KernelHandlers>,
    dispatches: DispatchLog,
}

impl ComputeEngine {
    pub fn new(context_id: u32, handlers: Arc<KernelHandlers>, dispatches: DispatchLog) -> Self {
        Self {
            context_id,
            pipeline: None,
            bases: BaseAddresses::default(),
            idd_block: None,
            vfe: None,
            handlers,
            dispatches,
        }
    }

    /// Last MEDIA_VFE_STATE, if any.
    pub fn vfe_state(&self) -> Option<MediaVfeState> {
        self.vfe
    }

    fn state_base_address(&mut self, sba: StateBaseAddress) {
        if let Some(b) = sba.general_state {
            self.bases.general_state = b.base;
        }
        if let Some(base) = sba.surface_state {
            self.bases.surface_state = base;
        }
        if let Some(b) = sba.dynamic_state {
            self.bases.dynamic_state = b.base;
        }
        if let Some(b) = sba.indirect_object {
            self.bases.indirect_object = b.base;
        }
        if let Some(b) = sba.instruction {
            self.bases.instruction = b.base;
        }
        log::trace!("compute: base addresses {:X?}", self.bases);
    }

    fn walker(&mut self, walker: GpgpuWalker, ctx: &mut ExecContext<'_>) -> ExecResult<()> {
        if walker.predicate_enable && !ctx.registers.predicate() {
            log::trace!("compute: walker predicated off");
            return Ok(());
        }
        if self.pipeline != Some(Pipeline::Gpgpu) {
            return Err(ExecutionError::InvalidState("walker without PIPELINE_SELECT(GPGPU)"));
        }
        let block = self
            .idd_block
            .ok_or(ExecutionError::InvalidState("walker without an interface descriptor block"))?;

        let idd_address = self.bases.dynamic_state
            + block.start_address as u64
            + walker.interface_descriptor_offset as u64 * InterfaceDescriptorData::SIZE as u64;
        let idd = InterfaceDescriptorData::decode(&ctx.memory.read_dwords(idd_address, InterfaceDescriptorData::DWORDS)?);

        let group_count = if walker.indirect_parameter_enable {
            [
                ctx.registers.read(registers::GPGPU_DISPATCHDIMX),
                ctx.registers.read(registers::GPGPU_DISPATCHDIMY),
                ctx.registers.read(registers::GPGPU_DISPATCHDIMZ),
            ]
        } else {
            [
                walker.thread_group_id_x_dimension,
                walker.thread_group_id_y_dimension,
                walker.thread_group_id_z_dimension,
            ]
        };

        let mut cross_thread_data = vec![0u8; idd.cross_thread_constant_data_read_length as usize * 32];
        if !cross_thread_data.is_empty() {
            let payload = self.bases.indirect_object + walker.indirect_data_start_address as u64;
            ctx.memory.read(payload, &mut cross_thread_data)?;
        }

        let kernel_start = self.bases.instruction + idd.kernel_start_pointer;
        let mut head = [0u8; 8];
        ctx.memory.read(kernel_start, &mut head)?;
        let builtin = Builtin::from_isa(&head);

        let dispatch = DispatchContext {
            memory: ctx.memory,
            group_count,
            threads_per_group: idd.number_of_threads_in_gpgpu_thread_group,
            simd_size: walker.simd_size.width(),
            cross_thread_data: &cross_thread_data,
        };
        log::trace!(
            "compute: dispatch kernel 0x{:X} ({}) groups={:?}",
            kernel_start,
            builtin.map_or("user", |b| b.name()),
            group_count
        );
        if group_count.iter().all(|&c| c > 0) {
            match builtin {
                Some(builtin) => run_builtin(builtin, &dispatch)?,
                None => match self.handlers.get(kernel_start) {
                    Some(handler) => {
                        handler(&dispatch).map_err(|message| ExecutionError::KernelFailed { kernel_start, message })?
                    }
                    None => log::trace!("compute: no handler for kernel 0x{:X}", kernel_start),
                },
            }
        }

        self.dispatches.lock().push(DispatchRecord {
            context_id: self.context_id,
            kernel_start,
            builtin,
            group_count,
            threads_per_group: idd.number_of_threads_in_gpgpu_thread_group,
            simd_size: walker.simd_size.width(),
            indirect: walker.indirect_parameter_enable,
            slm_encoding: idd.shared_local_memory_size,
            barrier_enable: idd.barrier_enable,
            thread_preemption_disable: idd.thread_preemption_disable,
            cross_thread_data,
        });
        Ok(())
    }
}

impl Engine for ComputeEngine {
    fn name(&self) -> &'static str {
        "compute"
    }

    fn execute(&mut self, command: &[u32], ctx: &mut ExecContext<'_>) -> ExecResult<()> {
        let header = command[0];
        match gfx_opcode(header) {
            op if op == gfx_opcode(PipelineSelect::HEADER) => {
                let select = PipelineSelect::decode(command);
                log::trace!("compute: pipeline select {:?}", select.pipeline);
                self.pipeline = Some(select.pipeline);
            }
            op if op == gfx_opcode(StateBaseAddress::HEADER_BASE) => {
                self.state_base_address(StateBaseAddress::decode(command));
            }
            op if op == gfx_opcode(PipeControl::HEADER) => {
                let pc = PipeControl::decode(command);
                post_sync_write(ctx.memory, ctx.registers, pc.post_sync, pc.address, pc.immediate)?;
            }
            op if op == gfx_opcode(MediaVfeState::HEADER) => {
                let vfe = MediaVfeState::decode(command);
                log::trace!(
                    "compute: scratch 0x{:X} ({} KiB/thread)",
                    vfe.scratch_address,
                    1u32 << vfe.per_thread_scratch_space
                );
                self.vfe = Some(vfe);
            }
            op if op == gfx_opcode(MEDIA_STATE_FLUSH[0]) => {}
            op if op == gfx_opcode(MediaInterfaceDescriptorLoad::HEADER) => {
                self.idd_block = Some(MediaInterfaceDescriptorLoad::decode(command));
            }
            op if op == gfx_opcode(GpgpuWalker::HEADER) => {
                self.walker(GpgpuWalker::decode(command), ctx)?;
            }
            _ if header >> 29 == 3 => {
                log::warn!("compute: skipping unknown command 0x{:08X}", header);
            }
            _ => {
                return Err(ExecutionError::WrongEngine {
                    engine: self.name(),
                    header,
                })
            }
        }
        Ok(())
    }
}

// ── Builtins ──

fn read_u32_at(data: &[u8], offset: usize) -> u32 {
    data.get(offset..offset + 4).map_or(0, LittleEndian::read_u32)
}

fn read_u64_at(data: &[u8], offset: usize) -> u64 {
    data.get(offset..offset + 8).map_or(0, LittleEndian::read_u64)
}

fn read_u32x3(data: &[u8], offset: usize) -> [u32; 3] {
    [
        read_u32_at(data, offset),
        read_u32_at(data, offset + 4),
        read_u32_at(data, offset + 8),
    ]
}

fn run_builtin(builtin: Builtin, dispatch: &DispatchContext<'_>) -> ExecResult<()> {
    let ctd = dispatch.cross_thread_data;
    match builtin {
        Builtin::CopyBufferToBuffer => {
            use layout::copy::*;
            let src = read_u64_at(ctd, SRC);
            let dst = read_u64_at(ctd, DST);
            let size = read_u64_at(ctd, SIZE);
            let groups = read_u32x3(ctd, NUM_WORK_GROUPS)[0] as u64;
            let local = read_u32x3(ctd, LOCAL_SIZE)[0] as u64;
            let bytes = size.min(groups * local) as usize;
            let mut data = vec![0u8; bytes];
            dispatch.memory.read(src, &mut data)?;
            dispatch.memory.write(dst, &data)?;
        }
        Builtin::CopyBufferRectBytes2d => {
            use layout::rect::*;
            let src = read_u64_at(ctd, SRC);
            let dst = read_u64_at(ctd, DST);
            let src_pitch = read_u32_at(ctd, SRC_PITCH) as u64;
            let dst_pitch = read_u32_at(ctd, DST_PITCH) as u64;
            let (src_x, src_y) = (read_u32_at(ctd, SRC_ORIGIN) as u64, read_u32_at(ctd, SRC_ORIGIN + 4) as u64);
            let (dst_x, dst_y) = (read_u32_at(ctd, DST_ORIGIN) as u64, read_u32_at(ctd, DST_ORIGIN + 4) as u64);
            let groups = read_u32x3(ctd, NUM_WORK_GROUPS);
            let local = read_u32x3(ctd, LOCAL_SIZE);
            let width = groups[0] as u64 * local[0] as u64;
            let height = groups[1] as u64 * local[1] as u64;
            let mut row = vec![0u8; width as usize];
            for y in 0..height {
                dispatch.memory.read(src + (src_y + y) * src_pitch + src_x, &mut row)?;
                dispatch.memory.write(dst + (dst_y + y) * dst_pitch + dst_x, &row)?;
            }
        }
        Builtin::FillBufferImmediate | Builtin::FillBufferPattern => {
            use layout::fill::*;
            let dst = read_u64_at(ctd, DST);
            let size = read_u64_at(ctd, SIZE);
            let groups = read_u32x3(ctd, NUM_WORK_GROUPS)[0] as u64;
            let local = read_u32x3(ctd, LOCAL_SIZE)[0] as u64;
            let bytes = size.min(groups * local) as usize;
            let pattern = if builtin == Builtin::FillBufferImmediate {
                read_u32_at(ctd, PATTERN).to_le_bytes().to_vec()
            } else {
                let mut pattern = vec![0u8; read_u64_at(ctd, PATTERN_SIZE) as usize];
                dispatch.memory.read(read_u64_at(ctd, PATTERN), &mut pattern)?;
                pattern
            };
            if pattern.is_empty() {
                return Err(ExecutionError::InvalidState("fill pattern is empty"));
            }
            let data: Vec<u8> = pattern.iter().copied().cycle().take(bytes).collect();
            dispatch.memory.write(dst, &data)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::test_util::FlatMemory;
    use crate::engines::RegisterFile;
    use crate::hw::commands::{BaseAddress, PostSyncOp, SimdSize};

    const BASE: u64 = 0x20_0000;
    const DSH: u64 = BASE;
    const IOH: u64 = BASE + 0x1000;
    const ISA: u64 = BASE + 0x2000;
    const DATA: u64 = BASE + 0x3000;

    struct Fixture {
        mem: FlatMemory,
        regs: RegisterFile,
        engine: ComputeEngine,
        handlers: Arc<KernelHandlers>,
        log: DispatchLog,
    }

    impl Fixture {
        fn new() -> Self {
            let handlers = Arc::new(KernelHandlers::new());
            let log = DispatchLog::default();
            Self {
                mem: FlatMemory::new(BASE, 0x4000),
                regs: RegisterFile::new(),
                engine: ComputeEngine::new(3, handlers.clone(), log.clone()),
                handlers,
                log,
            }
        }

        fn exec(&mut self, command: &[u32]) -> ExecResult<()> {
            let mut ctx = ExecContext {
                memory: &self.mem,
                registers: &mut self.regs,
            };
            self.engine.execute(command, &mut ctx)
        }

        /// Program pipeline, bases and one descriptor for a kernel at `ISA`.
        fn setup(&mut self, isa: &[u8], ctd_read_length: u32) {
            self.mem.write(ISA, isa).unwrap();
            let idd = InterfaceDescriptorData {
                kernel_start_pointer: ISA - BASE,
                number_of_threads_in_gpgpu_thread_group: 1,
                cross_thread_constant_data_read_length: ctd_read_length,
                ..InterfaceDescriptorData::default()
            };
            self.mem.put_dwords(DSH + 0x40, &idd.encode());
            let sba = StateBaseAddress {
                dynamic_state: Some(BaseAddress { base: DSH, size: 0x1000 }),
                indirect_object: Some(BaseAddress { base: IOH, size: 0x1000 }),
                instruction: Some(BaseAddress { base: BASE, size: 0x4000 }),
                ..StateBaseAddress::default()
            };
            self.exec(&PipelineSelect { pipeline: Pipeline::Gpgpu }.encode()).unwrap();
            self.exec(&sba.encode(19)).unwrap();
            self.exec(
                &MediaInterfaceDescriptorLoad {
                    total_length: 32,
                    start_address: 0x40,
                }
                .encode(),
            )
            .unwrap();
        }

        fn walker(groups: [u32; 3]) -> GpgpuWalker {
            GpgpuWalker {
                simd_size: SimdSize::Simd16,
                thread_group_id_x_dimension: groups[0],
                thread_group_id_y_dimension: groups[1],
                thread_group_id_z_dimension: groups[2],
                ..GpgpuWalker::default()
            }
        }
    }

    #[test]
    fn test_walker_requires_gpgpu_pipeline() {
        let mut f = Fixture::new();
        assert!(matches!(
            f.exec(&Fixture::walker([1, 1, 1]).encode()),
            Err(ExecutionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_handler_sees_payload_and_groups() {
        let mut f = Fixture::new();
        f.setup(&[0u8; 64], 1);
        f.mem.write_u64(IOH, DATA).unwrap();

        f.handlers.register(
            ISA,
            Arc::new(|d: &DispatchContext<'_>| {
                let out = d.cross_thread_u64(0);
                d.memory
                    .write_u32(out, d.group_count.iter().product())
                    .map_err(|e| e.to_string())
            }),
        );
        f.exec(&Fixture::walker([2, 3, 4]).encode()).unwrap();
        assert_eq!(f.mem.read_u32(DATA).unwrap(), 24);

        let log = f.log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].context_id, 3);
        assert_eq!(log[0].kernel_start, ISA);
        assert_eq!(log[0].group_count, [2, 3, 4]);
        assert_eq!(log[0].simd_size, 16);
        assert_eq!(log[0].cross_thread_data.len(), 32);
        assert!(log[0].builtin.is_none());
    }

    #[test]
    fn test_handler_failure_is_reported() {
        let mut f = Fixture::new();
        f.setup(&[0u8; 64], 1);
        f.handlers.register(ISA, Arc::new(|_: &DispatchContext<'_>| -> Result<(), String> { Err("boom".to_string()) }));
        assert_eq!(
            f.exec(&Fixture::walker([1, 1, 1]).encode()),
            Err(ExecutionError::KernelFailed {
                kernel_start: ISA,
                message: "boom".into()
            })
        );
    }

    #[test]
    fn test_indirect_walker_reads_dispatch_registers() {
        let mut f = Fixture::new();
        f.setup(&[0u8; 64], 0);
        f.regs.write(registers::GPGPU_DISPATCHDIMX, 5);
        f.regs.write(registers::GPGPU_DISPATCHDIMY, 1);
        f.regs.write(registers::GPGPU_DISPATCHDIMZ, 1);
        let mut walker = Fixture::walker([0, 0, 0]);
        walker.indirect_parameter_enable = true;
        f.exec(&walker.encode()).unwrap();
        assert_eq!(f.log.lock()[0].group_count, [5, 1, 1]);
        assert!(f.log.lock()[0].indirect);
    }

    #[test]
    fn test_predicated_walker_skipped() {
        let mut f = Fixture::new();
        f.setup(&[0u8; 64], 0);
        let mut walker = Fixture::walker([1, 1, 1]);
        walker.predicate_enable = true;
        f.exec(&walker.encode()).unwrap();
        assert!(f.log.lock().is_empty());

        f.regs.set_predicate(true);
        f.exec(&walker.encode()).unwrap();
        assert_eq!(f.log.lock().len(), 1);
    }

    #[test]
    fn test_builtin_copy() {
        let mut f = Fixture::new();
        f.setup(&Builtin::CopyBufferToBuffer.isa(), 2);
        let src = DATA;
        let dst = DATA + 0x200;
        f.mem.write(src, &(0..100u8).collect::<Vec<_>>()).unwrap();

        let mut ctd = [0u8; 64];
        LittleEndian::write_u64(&mut ctd[layout::copy::SRC..], src);
        LittleEndian::write_u64(&mut ctd[layout::copy::DST..], dst);
        LittleEndian::write_u64(&mut ctd[layout::copy::SIZE..], 100);
        LittleEndian::write_u32(&mut ctd[layout::copy::NUM_WORK_GROUPS..], 2);
        LittleEndian::write_u32(&mut ctd[layout::copy::LOCAL_SIZE..], 64);
        f.mem.write(IOH, &ctd).unwrap();

        f.exec(&Fixture::walker([2, 1, 1]).encode()).unwrap();
        let mut out = vec![0u8; 101];
        f.mem.read(dst, &mut out).unwrap();
        assert_eq!(&out[..100], &(0..100u8).collect::<Vec<_>>()[..]);
        assert_eq!(out[100], 0);
        assert_eq!(f.log.lock()[0].builtin, Some(Builtin::CopyBufferToBuffer));
    }

    #[test]
    fn test_builtin_rect_copy() {
        let mut f = Fixture::new();
        f.setup(&Builtin::CopyBufferRectBytes2d.isa(), 2);
        let src = DATA;
        let dst = DATA + 0x400;
        // 8-byte pitch source, 3x2 region at (1, 1).
        f.mem.write(src, &(0..32u8).collect::<Vec<_>>()).unwrap();

        let mut ctd = [0u8; 64];
        LittleEndian::write_u64(&mut ctd[layout::rect::SRC..], src);
        LittleEndian::write_u64(&mut ctd[layout::rect::DST..], dst);
        LittleEndian::write_u32(&mut ctd[layout::rect::SRC_PITCH..], 8);
        LittleEndian::write_u32(&mut ctd[layout::rect::DST_PITCH..], 4);
        LittleEndian::write_u32(&mut ctd[layout::rect::SRC_ORIGIN..], 1);
        LittleEndian::write_u32(&mut ctd[layout::rect::SRC_ORIGIN + 4..], 1);
        for (i, v) in [3u32, 2, 1].iter().enumerate() {
            LittleEndian::write_u32(&mut ctd[layout::rect::NUM_WORK_GROUPS + 4 * i..], *v);
            LittleEndian::write_u32(&mut ctd[layout::rect::LOCAL_SIZE + 4 * i..], 1);
        }
        f.mem.write(IOH, &ctd).unwrap();

        f.exec(&Fixture::walker([3, 2, 1]).encode()).unwrap();
        let mut out = [0u8; 8];
        f.mem.read(dst, &mut out).unwrap();
        assert_eq!(out, [9, 10, 11, 0, 17, 18, 19, 0]);
    }

    #[test]
    fn test_builtin_fills() {
        let mut f = Fixture::new();
        f.setup(&Builtin::FillBufferPattern.isa(), 2);
        let pattern = DATA;
        let dst = DATA + 0x100;
        f.mem.write(pattern, b"ABCDEFGH").unwrap();

        let mut ctd = [0u8; 64];
        LittleEndian::write_u64(&mut ctd[layout::fill::DST..], dst);
        LittleEndian::write_u64(&mut ctd[layout::fill::SIZE..], 20);
        LittleEndian::write_u64(&mut ctd[layout::fill::PATTERN..], pattern);
        LittleEndian::write_u64(&mut ctd[layout::fill::PATTERN_SIZE..], 8);
        LittleEndian::write_u32(&mut ctd[layout::fill::NUM_WORK_GROUPS..], 1);
        LittleEndian::write_u32(&mut ctd[layout::fill::LOCAL_SIZE..], 64);
        f.mem.write(IOH, &ctd).unwrap();
        f.exec(&Fixture::walker([1, 1, 1]).encode()).unwrap();
        let mut out = [0u8; 21];
        f.mem.read(dst, &mut out).unwrap();
        assert_eq!(&out[..20], b"ABCDEFGHABCDEFGHABCD");
        assert_eq!(out[20], 0);

        let mut f = Fixture::new();
        f.setup(&Builtin::FillBufferImmediate.isa(), 2);
        LittleEndian::write_u64(&mut ctd[layout::fill::SIZE..], 6);
        LittleEndian::write_u32(&mut ctd[layout::fill::PATTERN..], 0x2211_2211);
        f.mem.write(IOH, &ctd).unwrap();
        f.exec(&Fixture::walker([1, 1, 1]).encode()).unwrap();
        let mut out = [0u8; 8];
        f.mem.read(dst, &mut out).unwrap();
        assert_eq!(out, [0x11, 0x22, 0x11, 0x22, 0x11, 0x22, 0, 0]);
    }

    #[test]
    fn test_pipe_control_post_sync_and_foreign_commands() {
        let mut f = Fixture::new();
        let pc = PipeControl::with_post_sync(DATA, 0x55, true);
        f.exec(&pc.encode()).unwrap();
        assert_eq!(f.mem.read_u32(DATA).unwrap(), 0x55);

        let ts = PipeControl {
            post_sync: PostSyncOp::WriteTimestamp,
            address: DATA + 8,
            ..PipeControl::default()
        };
        f.regs.tick();
        f.exec(&ts.encode()).unwrap();
        assert_eq!(f.mem.read_u32(DATA + 8).unwrap(), 1);

        let blt = crate::hw::commands::XyCopyBlt::default().encode();
        assert!(matches!(f.exec(&blt), Err(ExecutionError::WrongEngine { .. })));
    }
}
