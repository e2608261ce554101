// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hardware command layouts shared by the supported generations.
//!
//! Every command starts with a header dword:
//!
//! | Bits    | Field                                   |
//! |---------|-----------------------------------------|
//! | 31:29   | Command type (0 = MI, 2 = BLT, 3 = GFX) |
//! | 28:23   | MI opcode                               |
//! | 28:27   | GFX pipeline                            |
//! | 26:24   | GFX opcode                              |
//! | 23:16   | GFX sub-opcode                          |
//! | 7:0     | Length in dwords minus 2                |
//!
//! Each command is a plain struct with `encode` (to dwords) and `decode`
//! (from dwords). STATE_BASE_ADDRESS differs in length between generations
//! and takes an explicit dword count.

// ── Header helpers ─────────────────────────────────────────────────────────

const fn mi_header(opcode: u32, dword_length: u32) -> u32 {
    (opcode << 23) | dword_length
}

const fn gfx_header(pipeline: u32, opcode: u32, sub_opcode: u32, dword_length: u32) -> u32 {
    (3 << 29) | (pipeline << 27) | (opcode << 24) | (sub_opcode << 16) | dword_length
}

const fn blt_header(opcode: u32, dword_length: u32) -> u32 {
    (2 << 29) | (opcode << 22) | dword_length
}

#[inline]
fn lo(address: u64) -> u32 {
    address as u32
}

#[inline]
fn hi(address: u64) -> u32 {
    (address >> 32) as u32
}

#[inline]
fn join(low: u32, high: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// Command type field of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Mi,
    Blitter,
    Gfx,
    Unknown(u32),
}

impl CommandType {
    pub fn of(header: u32) -> Self {
        match header >> 29 {
            0 => Self::Mi,
            2 => Self::Blitter,
            3 => Self::Gfx,
            other => Self::Unknown(other),
        }
    }
}

/// Total length in dwords of the command starting with `header`.
pub fn command_length(header: u32) -> usize {
    match CommandType::of(header) {
        CommandType::Mi => match (header >> 23) & 0x3F {
            // MI_NOOP, MI_ARB_CHECK, MI_BATCH_BUFFER_END, MI_PREDICATE
            0x00 | 0x05 | 0x0A | 0x0C => 1,
            _ => (header & 0xFF) as usize + 2,
        },
        CommandType::Blitter => (header & 0xFF) as usize + 2,
        CommandType::Gfx => {
            if header >> 16 == PipelineSelect::HEADER >> 16 {
                1
            } else {
                (header & 0xFF) as usize + 2
            }
        }
        CommandType::Unknown(_) => 1,
    }
}

/// Mnemonic for the command starting with `header`, for stream dumps.
pub fn command_name(header: u32) -> &'static str {
    let mi = |h: u32| (h >> 23) & 0x3F;
    let gfx = |h: u32| h >> 16;
    match CommandType::of(header) {
        CommandType::Mi => match mi(header) {
            0x00 => "MI_NOOP",
            op if op == mi(MI_BATCH_BUFFER_END) => "MI_BATCH_BUFFER_END",
            op if op == mi(MiBatchBufferStart::HEADER) => "MI_BATCH_BUFFER_START",
            op if op == mi(MiLoadRegisterImm::HEADER) => "MI_LOAD_REGISTER_IMM",
            op if op == mi(MiLoadRegisterMem::HEADER) => "MI_LOAD_REGISTER_MEM",
            op if op == mi(MiStoreRegisterMem::HEADER) => "MI_STORE_REGISTER_MEM",
            op if op == mi(MiStoreDataImm::HEADER) => "MI_STORE_DATA_IMM",
            op if op == mi(MiSemaphoreWait::HEADER) => "MI_SEMAPHORE_WAIT",
            op if op == mi(MiFlushDw::HEADER) => "MI_FLUSH_DW",
            op if op == mi(MiPredicate::HEADER) => "MI_PREDICATE",
            _ => "MI_UNKNOWN",
        },
        CommandType::Gfx => match gfx(header) {
            op if op == gfx(PipeControl::HEADER) => "PIPE_CONTROL",
            op if op == gfx(PipelineSelect::HEADER) => "PIPELINE_SELECT",
            op if op == gfx(StateBaseAddress::HEADER_BASE) => "STATE_BASE_ADDRESS",
            op if op == gfx(MediaVfeState::HEADER) => "MEDIA_VFE_STATE",
            op if op == gfx(MediaInterfaceDescriptorLoad::HEADER) => "MEDIA_INTERFACE_DESCRIPTOR_LOAD",
            op if op == gfx(MEDIA_STATE_FLUSH[0]) => "MEDIA_STATE_FLUSH",
            op if op == gfx(GpgpuWalker::HEADER) => "GPGPU_WALKER",
            _ => "GFX_UNKNOWN",
        },
        CommandType::Blitter if header >> 22 == XyCopyBlt::HEADER >> 22 => "XY_COPY_BLT",
        CommandType::Blitter if header >> 22 == XyColorBlt::HEADER >> 22 => "XY_COLOR_BLT",
        CommandType::Blitter => "BLT_UNKNOWN",
        CommandType::Unknown(_) => "UNKNOWN",
    }
}

// ── MMIO registers ─────────────────────────────────────────────────────────

pub mod registers {
    pub const MI_PREDICATE_SRC0: u32 = 0x2400;
    pub const MI_PREDICATE_SRC1: u32 = 0x2408;
    pub const MI_PREDICATE_RESULT: u32 = 0x2418;

    pub const GPGPU_DISPATCHDIMX: u32 = 0x2500;
    pub const GPGPU_DISPATCHDIMY: u32 = 0x2504;
    pub const GPGPU_DISPATCHDIMZ: u32 = 0x2508;

    pub const REG_GLOBAL_TIMESTAMP_LDW: u32 = 0x2358;
    pub const GP_THREAD_TIME_REG_ADDRESS_OFFSET_LOW: u32 = 0x23A8;

    pub const CS_CHICKEN1: u32 = 0x2580;
    pub const CS_GPR_R0: u32 = 0x2600;

    pub const L3CNTL_GEN9: u32 = 0x7034;
    pub const L3CNTL_GEN12: u32 = 0xB134;
}

// ── MI commands ────────────────────────────────────────────────────────────

pub const MI_NOOP: u32 = 0;

pub const MI_BATCH_BUFFER_END: u32 = mi_header(0x0A, 0);

/// Jump to another batch buffer; a second-level batch returns on BB_END.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiBatchBufferStart {
    pub address: u64,
    pub second_level: bool,
}

impl MiBatchBufferStart {
    pub const DWORDS: usize = 3;
    pub const HEADER: u32 = mi_header(0x31, 1);
    const SECOND_LEVEL: u32 = 1 << 22;
    const ADDRESS_SPACE_PPGTT: u32 = 1 << 8;

    pub fn encode(&self) -> [u32; 3] {
        let mut dw0 = Self::HEADER | Self::ADDRESS_SPACE_PPGTT;
        if self.second_level {
            dw0 |= Self::SECOND_LEVEL;
        }
        [dw0, lo(self.address) & !3, hi(self.address)]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            address: join(dw[1] & !3, dw[2]),
            second_level: dw[0] & Self::SECOND_LEVEL != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiLoadRegisterImm {
    pub register: u32,
    pub data: u32,
    pub mmio_remap: bool,
}

impl MiLoadRegisterImm {
    pub const DWORDS: usize = 3;
    pub const HEADER: u32 = mi_header(0x22, 1);
    const MMIO_REMAP_ENABLE: u32 = 1 << 17;

    pub fn encode(&self) -> [u32; 3] {
        let mut dw0 = Self::HEADER;
        if self.mmio_remap {
            dw0 |= Self::MMIO_REMAP_ENABLE;
        }
        [dw0, self.register & 0x7F_FFFC, self.data]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            register: dw[1] & 0x7F_FFFC,
            data: dw[2],
            mmio_remap: dw[0] & Self::MMIO_REMAP_ENABLE != 0,
        }
    }
}

/// Load a register from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiLoadRegisterMem {
    pub register: u32,
    pub address: u64,
}

impl MiLoadRegisterMem {
    pub const DWORDS: usize = 4;
    pub const HEADER: u32 = mi_header(0x29, 2);

    pub fn encode(&self) -> [u32; 4] {
        [Self::HEADER, self.register & 0x7F_FFFC, lo(self.address) & !3, hi(self.address)]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            register: dw[1] & 0x7F_FFFC,
            address: join(dw[2] & !3, dw[3]),
        }
    }
}

/// Store a register to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiStoreRegisterMem {
    pub register: u32,
    pub address: u64,
}

impl MiStoreRegisterMem {
    pub const DWORDS: usize = 4;
    pub const HEADER: u32 = mi_header(0x24, 2);

    pub fn encode(&self) -> [u32; 4] {
        [Self::HEADER, self.register & 0x7F_FFFC, lo(self.address) & !3, hi(self.address)]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            register: dw[1] & 0x7F_FFFC,
            address: join(dw[2] & !3, dw[3]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiStoreDataImm {
    pub address: u64,
    pub data: u32,
}

impl MiStoreDataImm {
    pub const DWORDS: usize = 4;
    pub const HEADER: u32 = mi_header(0x20, 2);

    pub fn encode(&self) -> [u32; 4] {
        [Self::HEADER, lo(self.address) & !3, hi(self.address), self.data]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            address: join(dw[1] & !3, dw[2]),
            data: dw[3],
        }
    }
}

/// MI_SEMAPHORE_WAIT compare operation (semaphore address data vs. inline data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum SemaphoreCompare {
    GreaterThan = 0,
    GreaterThanOrEqual = 1,
    LessThan = 2,
    LessThanOrEqual = 3,
    #[default]
    Equal = 4,
    NotEqual = 5,
}

impl SemaphoreCompare {
    fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::GreaterThan,
            1 => Self::GreaterThanOrEqual,
            2 => Self::LessThan,
            3 => Self::LessThanOrEqual,
            5 => Self::NotEqual,
            _ => Self::Equal,
        }
    }

    /// Evaluate `memory <op> data`.
    pub fn evaluate(self, memory: u32, data: u32) -> bool {
        match self {
            Self::GreaterThan => memory > data,
            Self::GreaterThanOrEqual => memory >= data,
            Self::LessThan => memory < data,
            Self::LessThanOrEqual => memory <= data,
            Self::Equal => memory == data,
            Self::NotEqual => memory != data,
        }
    }
}

/// Stall the engine until a memory dword satisfies a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiSemaphoreWait {
    pub address: u64,
    pub data: u32,
    pub compare: SemaphoreCompare,
}

impl MiSemaphoreWait {
    pub const DWORDS: usize = 4;
    pub const HEADER: u32 = mi_header(0x1C, 2);
    const POLLING_MODE: u32 = 1 << 15;

    pub fn encode(&self) -> [u32; 4] {
        [
            Self::HEADER | Self::POLLING_MODE | ((self.compare as u32) << 12),
            self.data,
            lo(self.address) & !3,
            hi(self.address),
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            address: join(dw[2] & !3, dw[3]),
            data: dw[1],
            compare: SemaphoreCompare::from_raw((dw[0] >> 12) & 0x7),
        }
    }
}

/// Post-sync operation of PIPE_CONTROL and MI_FLUSH_DW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PostSyncOp {
    #[default]
    NoWrite = 0,
    WriteImmediate = 1,
    WriteDepthCount = 2,
    WriteTimestamp = 3,
}

impl PostSyncOp {
    fn from_raw(v: u32) -> Self {
        match v & 3 {
            1 => Self::WriteImmediate,
            2 => Self::WriteDepthCount,
            3 => Self::WriteTimestamp,
            _ => Self::NoWrite,
        }
    }
}

/// Copy-engine flush with an optional post-sync write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiFlushDw {
    pub post_sync: PostSyncOp,
    pub address: u64,
    pub immediate: u64,
}

impl MiFlushDw {
    pub const DWORDS: usize = 5;
    pub const HEADER: u32 = mi_header(0x26, 3);

    pub fn encode(&self) -> [u32; 5] {
        [
            Self::HEADER | ((self.post_sync as u32) << 14),
            lo(self.address) & !7,
            hi(self.address),
            lo(self.immediate),
            hi(self.immediate),
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            post_sync: PostSyncOp::from_raw(dw[0] >> 14),
            address: join(dw[1] & !7, dw[2]),
            immediate: join(dw[3], dw[4]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PredicateLoadOp {
    #[default]
    Keep = 0,
    Load = 2,
    LoadInverted = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PredicateCombineOp {
    #[default]
    Set = 0,
    And = 1,
    Or = 2,
    Xor = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PredicateCompareOp {
    #[default]
    True = 0,
    False = 1,
    SrcsEqual = 2,
    DeltasEqual = 3,
}

/// Update the render predicate from MI_PREDICATE_SRC0/SRC1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiPredicate {
    pub load: PredicateLoadOp,
    pub combine: PredicateCombineOp,
    pub compare: PredicateCompareOp,
}

impl MiPredicate {
    pub const DWORDS: usize = 1;
    pub const HEADER: u32 = mi_header(0x0C, 0);

    pub fn encode(&self) -> [u32; 1] {
        [Self::HEADER
            | ((self.load as u32) << 6)
            | ((self.combine as u32) << 3)
            | self.compare as u32]
    }

    pub fn decode(dw: &[u32]) -> Self {
        let load = match (dw[0] >> 6) & 3 {
            2 => PredicateLoadOp::Load,
            3 => PredicateLoadOp::LoadInverted,
            _ => PredicateLoadOp::Keep,
        };
        let combine = match (dw[0] >> 3) & 3 {
            1 => PredicateCombineOp::And,
            2 => PredicateCombineOp::Or,
            3 => PredicateCombineOp::Xor,
            _ => PredicateCombineOp::Set,
        };
        let compare = match dw[0] & 3 {
            1 => PredicateCompareOp::False,
            2 => PredicateCompareOp::SrcsEqual,
            3 => PredicateCompareOp::DeltasEqual,
            _ => PredicateCompareOp::True,
        };
        Self {
            load,
            combine,
            compare,
        }
    }
}

// ── Render / GPGPU commands ────────────────────────────────────────────────

/// Pipeline synchronization with optional post-sync write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipeControl {
    pub cs_stall: bool,
    pub dc_flush: bool,
    pub texture_cache_invalidate: bool,
    pub instruction_cache_invalidate: bool,
    pub state_cache_invalidate: bool,
    pub constant_cache_invalidate: bool,
    pub post_sync: PostSyncOp,
    pub address: u64,
    pub immediate: u64,
}

impl PipeControl {
    pub const DWORDS: usize = 6;
    pub const HEADER: u32 = gfx_header(3, 2, 0, 4);

    const DC_FLUSH: u32 = 1 << 5;
    const STATE_CACHE_INVALIDATE: u32 = 1 << 2;
    const CONSTANT_CACHE_INVALIDATE: u32 = 1 << 3;
    const TEXTURE_CACHE_INVALIDATE: u32 = 1 << 10;
    const INSTRUCTION_CACHE_INVALIDATE: u32 = 1 << 11;
    const CS_STALL: u32 = 1 << 20;

    /// Barrier used before base-address and L3 reprogramming.
    pub fn barrier(dc_flush: bool) -> Self {
        Self {
            cs_stall: true,
            dc_flush,
            ..Self::default()
        }
    }

    /// Barrier with an immediate post-sync write of `value` to `address`.
    pub fn with_post_sync(address: u64, value: u64, dc_flush: bool) -> Self {
        Self {
            cs_stall: true,
            dc_flush,
            post_sync: PostSyncOp::WriteImmediate,
            address,
            immediate: value,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> [u32; 6] {
        let mut dw1 = (self.post_sync as u32) << 14;
        for (set, bit) in [
            (self.cs_stall, Self::CS_STALL),
            (self.dc_flush, Self::DC_FLUSH),
            (self.texture_cache_invalidate, Self::TEXTURE_CACHE_INVALIDATE),
            (self.instruction_cache_invalidate, Self::INSTRUCTION_CACHE_INVALIDATE),
            (self.state_cache_invalidate, Self::STATE_CACHE_INVALIDATE),
            (self.constant_cache_invalidate, Self::CONSTANT_CACHE_INVALIDATE),
        ] {
            if set {
                dw1 |= bit;
            }
        }
        [
            Self::HEADER,
            dw1,
            lo(self.address) & !3,
            hi(self.address),
            lo(self.immediate),
            hi(self.immediate),
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        let flag = |bit: u32| dw[1] & bit != 0;
        Self {
            cs_stall: flag(Self::CS_STALL),
            dc_flush: flag(Self::DC_FLUSH),
            texture_cache_invalidate: flag(Self::TEXTURE_CACHE_INVALIDATE),
            instruction_cache_invalidate: flag(Self::INSTRUCTION_CACHE_INVALIDATE),
            state_cache_invalidate: flag(Self::STATE_CACHE_INVALIDATE),
            constant_cache_invalidate: flag(Self::CONSTANT_CACHE_INVALIDATE),
            post_sync: PostSyncOp::from_raw(dw[1] >> 14),
            address: join(dw[2] & !3, dw[3]),
            immediate: join(dw[4], dw[5]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Pipeline {
    #[default]
    ThreeD = 0,
    Media = 1,
    Gpgpu = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineSelect {
    pub pipeline: Pipeline,
}

impl PipelineSelect {
    pub const DWORDS: usize = 1;
    pub const HEADER: u32 = gfx_header(1, 1, 4, 0);
    const MASK_BITS: u32 = 0x3 << 8;

    pub fn encode(&self) -> [u32; 1] {
        [Self::HEADER | Self::MASK_BITS | self.pipeline as u32]
    }

    pub fn decode(dw: &[u32]) -> Self {
        let pipeline = match dw[0] & 3 {
            1 => Pipeline::Media,
            2 => Pipeline::Gpgpu,
            _ => Pipeline::ThreeD,
        };
        Self { pipeline }
    }
}

/// A base address with its bound size, both only applied when `Some`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseAddress {
    pub base: u64,
    pub size: u32,
}

/// STATE_BASE_ADDRESS. Fields left `None` keep their previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateBaseAddress {
    pub general_state: Option<BaseAddress>,
    pub surface_state: Option<u64>,
    pub dynamic_state: Option<BaseAddress>,
    pub indirect_object: Option<BaseAddress>,
    pub instruction: Option<BaseAddress>,
    pub stateless_mocs: u32,
}

impl StateBaseAddress {
    pub const HEADER_BASE: u32 = gfx_header(0, 1, 1, 0);
    const MODIFY: u32 = 1;

    /// Encode with the generation's command length (19 or 22 dwords).
    pub fn encode(&self, dwords: usize) -> Vec<u32> {
        debug_assert!(dwords >= 19);
        let mut dw = vec![0u32; dwords];
        dw[0] = Self::HEADER_BASE | (dwords as u32 - 2);

        let base = |slot: &mut [u32], addr: Option<u64>| {
            if let Some(a) = addr {
                slot[0] = (lo(a) & !0xFFF) | Self::MODIFY;
                slot[1] = hi(a);
            }
        };
        let size = |addr: Option<BaseAddress>| match addr {
            Some(b) => (b.size & !0xFFF) | Self::MODIFY,
            None => 0,
        };

        base(&mut dw[1..3], self.general_state.map(|b| b.base));
        dw[3] = (self.stateless_mocs & 0x7F) << 16;
        base(&mut dw[4..6], self.surface_state);
        base(&mut dw[6..8], self.dynamic_state.map(|b| b.base));
        base(&mut dw[8..10], self.indirect_object.map(|b| b.base));
        base(&mut dw[10..12], self.instruction.map(|b| b.base));
        dw[12] = size(self.general_state);
        dw[13] = size(self.dynamic_state);
        dw[14] = size(self.indirect_object);
        dw[15] = size(self.instruction);
        dw
    }

    pub fn decode(dw: &[u32]) -> Self {
        let base = |l: u32, h: u32| (l & Self::MODIFY != 0).then(|| join(l & !0xFFF, h));
        let with_size = |addr: Option<u64>, s: u32| {
            addr.map(|base| BaseAddress {
                base,
                size: s & !0xFFF,
            })
        };
        Self {
            general_state: with_size(base(dw[1], dw[2]), dw[12]),
            surface_state: base(dw[4], dw[5]),
            dynamic_state: with_size(base(dw[6], dw[7]), dw[13]),
            indirect_object: with_size(base(dw[8], dw[9]), dw[14]),
            instruction: with_size(base(dw[10], dw[11]), dw[15]),
            stateless_mocs: (dw[3] >> 16) & 0x7F,
        }
    }
}

/// Scratch and thread limits for the media/GPGPU pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaVfeState {
    pub scratch_address: u64,
    /// log2(per-thread scratch / 1 KiB).
    pub per_thread_scratch_space: u32,
    pub max_threads: u32,
    pub num_urb_entries: u32,
    pub urb_entry_allocation_size: u32,
    pub curbe_allocation_size: u32,
}

impl MediaVfeState {
    pub const DWORDS: usize = 9;
    pub const HEADER: u32 = gfx_header(2, 0, 0, 7);

    pub fn encode(&self) -> [u32; 9] {
        [
            Self::HEADER,
            (lo(self.scratch_address) & !0x3FF) | (self.per_thread_scratch_space & 0xF),
            hi(self.scratch_address) & 0xFFFF,
            (self.max_threads << 16) | ((self.num_urb_entries & 0xFF) << 8),
            0,
            (self.urb_entry_allocation_size << 16) | (self.curbe_allocation_size & 0xFFFF),
            0,
            0,
            0,
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            scratch_address: join(dw[1] & !0x3FF, dw[2] & 0xFFFF),
            per_thread_scratch_space: dw[1] & 0xF,
            max_threads: dw[3] >> 16,
            num_urb_entries: (dw[3] >> 8) & 0xFF,
            urb_entry_allocation_size: dw[5] >> 16,
            curbe_allocation_size: dw[5] & 0xFFFF,
        }
    }

    /// Encoding of a per-thread scratch size (power of two, >= 1 KiB).
    pub fn encode_scratch_size(per_thread_bytes: u32) -> u32 {
        if per_thread_bytes <= 1024 {
            0
        } else {
            per_thread_bytes.div_ceil(1024).next_power_of_two().trailing_zeros()
        }
    }
}

pub const MEDIA_STATE_FLUSH: [u32; 2] = [gfx_header(2, 0, 4, 0), 0];

/// Load a block of interface descriptors from the dynamic-state heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaInterfaceDescriptorLoad {
    pub total_length: u32,
    /// Offset of the block relative to the dynamic-state base.
    pub start_address: u32,
}

impl MediaInterfaceDescriptorLoad {
    pub const DWORDS: usize = 4;
    pub const HEADER: u32 = gfx_header(2, 0, 2, 2);

    pub fn encode(&self) -> [u32; 4] {
        [Self::HEADER, 0, self.total_length & 0x1_FFFF, self.start_address]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            total_length: dw[2] & 0x1_FFFF,
            start_address: dw[3],
        }
    }
}

/// Per-kernel dispatch record, read by the walker through the IDD block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceDescriptorData {
    /// Offset of the kernel ISA from the instruction base (64-byte aligned).
    pub kernel_start_pointer: u64,
    pub thread_preemption_disable: bool,
    pub sampler_state_pointer: u32,
    /// Samplers in groups of four.
    pub sampler_count: u32,
    pub binding_table_pointer: u32,
    pub binding_table_entry_count: u32,
    pub constant_urb_entry_read_length: u32,
    pub number_of_threads_in_gpgpu_thread_group: u32,
    pub shared_local_memory_size: u32,
    pub barrier_enable: bool,
    pub cross_thread_constant_data_read_length: u32,
}

impl InterfaceDescriptorData {
    pub const DWORDS: usize = 8;
    pub const SIZE: usize = Self::DWORDS * 4;
    const THREAD_PREEMPTION_DISABLE: u32 = 1 << 20;
    const BARRIER_ENABLE: u32 = 1 << 21;

    pub fn encode(&self) -> [u32; 8] {
        let mut dw2 = 0;
        if self.thread_preemption_disable {
            dw2 |= Self::THREAD_PREEMPTION_DISABLE;
        }
        let mut dw6 = (self.number_of_threads_in_gpgpu_thread_group & 0x3FF)
            | ((self.shared_local_memory_size & 0x1F) << 16);
        if self.barrier_enable {
            dw6 |= Self::BARRIER_ENABLE;
        }
        [
            lo(self.kernel_start_pointer) & !0x3F,
            hi(self.kernel_start_pointer) & 0xFFFF,
            dw2,
            (self.sampler_state_pointer & !0x1F) | ((self.sampler_count & 0x7) << 2),
            (self.binding_table_pointer & 0xFFE0) | (self.binding_table_entry_count & 0x1F),
            (self.constant_urb_entry_read_length & 0xFFFF) << 16,
            dw6,
            self.cross_thread_constant_data_read_length & 0xFF,
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            kernel_start_pointer: join(dw[0] & !0x3F, dw[1] & 0xFFFF),
            thread_preemption_disable: dw[2] & Self::THREAD_PREEMPTION_DISABLE != 0,
            sampler_state_pointer: dw[3] & !0x1F,
            sampler_count: (dw[3] >> 2) & 0x7,
            binding_table_pointer: dw[4] & 0xFFE0,
            binding_table_entry_count: dw[4] & 0x1F,
            constant_urb_entry_read_length: dw[5] >> 16,
            number_of_threads_in_gpgpu_thread_group: dw[6] & 0x3FF,
            shared_local_memory_size: (dw[6] >> 16) & 0x1F,
            barrier_enable: dw[6] & Self::BARRIER_ENABLE != 0,
            cross_thread_constant_data_read_length: dw[7] & 0xFF,
        }
    }
}

/// SIMD width field of GPGPU_WALKER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum SimdSize {
    Simd8 = 0,
    Simd16 = 1,
    #[default]
    Simd32 = 2,
}

impl SimdSize {
    pub fn from_width(simd: u32) -> Self {
        match simd {
            1 | 8 => Self::Simd8,
            16 => Self::Simd16,
            _ => Self::Simd32,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Self::Simd8 => 8,
            Self::Simd16 => 16,
            Self::Simd32 => 32,
        }
    }
}

/// Compute dispatch of a grid of thread groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpgpuWalker {
    pub indirect_parameter_enable: bool,
    pub predicate_enable: bool,
    pub interface_descriptor_offset: u32,
    pub indirect_data_length: u32,
    /// Offset relative to the indirect-object base (64-byte aligned).
    pub indirect_data_start_address: u32,
    pub simd_size: SimdSize,
    /// Threads per group minus one.
    pub thread_width_counter_maximum: u32,
    pub thread_group_id_x_dimension: u32,
    pub thread_group_id_y_dimension: u32,
    pub thread_group_id_z_dimension: u32,
    pub right_execution_mask: u32,
    pub bottom_execution_mask: u32,
}

impl GpgpuWalker {
    pub const DWORDS: usize = 15;
    pub const HEADER: u32 = gfx_header(2, 1, 5, 13);
    const INDIRECT_PARAMETER_ENABLE: u32 = 1 << 10;
    const PREDICATE_ENABLE: u32 = 1 << 8;

    pub fn encode(&self) -> [u32; 15] {
        let mut dw0 = Self::HEADER;
        if self.indirect_parameter_enable {
            dw0 |= Self::INDIRECT_PARAMETER_ENABLE;
        }
        if self.predicate_enable {
            dw0 |= Self::PREDICATE_ENABLE;
        }
        [
            dw0,
            self.interface_descriptor_offset & 0x3F,
            self.indirect_data_length & 0x1_FFFF,
            self.indirect_data_start_address & !0x3F,
            ((self.simd_size as u32) << 30) | (self.thread_width_counter_maximum & 0x3F),
            0,
            0,
            self.thread_group_id_x_dimension,
            0,
            0,
            self.thread_group_id_y_dimension,
            0,
            self.thread_group_id_z_dimension,
            self.right_execution_mask,
            self.bottom_execution_mask,
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        let simd_size = match dw[4] >> 30 {
            0 => SimdSize::Simd8,
            1 => SimdSize::Simd16,
            _ => SimdSize::Simd32,
        };
        Self {
            indirect_parameter_enable: dw[0] & Self::INDIRECT_PARAMETER_ENABLE != 0,
            predicate_enable: dw[0] & Self::PREDICATE_ENABLE != 0,
            interface_descriptor_offset: dw[1] & 0x3F,
            indirect_data_length: dw[2] & 0x1_FFFF,
            indirect_data_start_address: dw[3] & !0x3F,
            simd_size,
            thread_width_counter_maximum: dw[4] & 0x3F,
            thread_group_id_x_dimension: dw[7],
            thread_group_id_y_dimension: dw[10],
            thread_group_id_z_dimension: dw[12],
            right_execution_mask: dw[13],
            bottom_execution_mask: dw[14],
        }
    }
}

// ── Blitter ────────────────────────────────────────────────────────────────

/// Byte-granular 2D copy on the copy engine (8 bpp, ROP = source copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XyCopyBlt {
    pub dst_address: u64,
    pub dst_pitch: u32,
    pub dst_x1: u32,
    pub dst_y1: u32,
    pub dst_x2: u32,
    pub dst_y2: u32,
    pub src_address: u64,
    pub src_pitch: u32,
    pub src_x1: u32,
    pub src_y1: u32,
}

impl XyCopyBlt {
    pub const DWORDS: usize = 10;
    pub const HEADER: u32 = blt_header(0x53, 8);
    pub const MAX_WIDTH: u32 = 0x7FC0;
    pub const MAX_HEIGHT: u32 = 0x3FE0;
    const ROP_SRC_COPY: u32 = 0xCC << 16;

    pub fn encode(&self) -> [u32; 10] {
        [
            Self::HEADER,
            Self::ROP_SRC_COPY | (self.dst_pitch & 0xFFFF),
            (self.dst_y1 << 16) | (self.dst_x1 & 0xFFFF),
            (self.dst_y2 << 16) | (self.dst_x2 & 0xFFFF),
            lo(self.dst_address),
            hi(self.dst_address),
            (self.src_y1 << 16) | (self.src_x1 & 0xFFFF),
            self.src_pitch & 0xFFFF,
            lo(self.src_address),
            hi(self.src_address),
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        Self {
            dst_pitch: dw[1] & 0xFFFF,
            dst_x1: dw[2] & 0xFFFF,
            dst_y1: dw[2] >> 16,
            dst_x2: dw[3] & 0xFFFF,
            dst_y2: dw[3] >> 16,
            dst_address: join(dw[4], dw[5]),
            src_x1: dw[6] & 0xFFFF,
            src_y1: dw[6] >> 16,
            src_pitch: dw[7] & 0xFFFF,
            src_address: join(dw[8], dw[9]),
        }
    }
}

/// Bytes per pixel of a color fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ColorDepth {
    #[default]
    Bpp8 = 0,
    Bpp16 = 1,
    Bpp32 = 3,
}

impl ColorDepth {
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Self::Bpp8),
            2 => Some(Self::Bpp16),
            4 => Some(Self::Bpp32),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Bpp8 => 1,
            Self::Bpp16 => 2,
            Self::Bpp32 => 4,
        }
    }
}

/// Solid fill of a rectangle on the copy engine. X coordinates are in
/// pixels, the pitch in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XyColorBlt {
    pub dst_address: u64,
    pub dst_pitch: u32,
    pub dst_x1: u32,
    pub dst_y1: u32,
    pub dst_x2: u32,
    pub dst_y2: u32,
    pub color_depth: ColorDepth,
    pub color: u32,
}

impl XyColorBlt {
    pub const DWORDS: usize = 7;
    pub const HEADER: u32 = blt_header(0x50, 5);
    /// Row limit in bytes, shared with XY_COPY_BLT.
    pub const MAX_ROW_BYTES: u32 = XyCopyBlt::MAX_WIDTH;
    pub const MAX_HEIGHT: u32 = XyCopyBlt::MAX_HEIGHT;
    const ROP_PAT_COPY: u32 = 0xF0 << 16;

    pub fn encode(&self) -> [u32; 7] {
        [
            Self::HEADER,
            ((self.color_depth as u32) << 24) | Self::ROP_PAT_COPY | (self.dst_pitch & 0xFFFF),
            (self.dst_y1 << 16) | (self.dst_x1 & 0xFFFF),
            (self.dst_y2 << 16) | (self.dst_x2 & 0xFFFF),
            lo(self.dst_address),
            hi(self.dst_address),
            self.color,
        ]
    }

    pub fn decode(dw: &[u32]) -> Self {
        let color_depth = match (dw[1] >> 24) & 0x3 {
            1 => ColorDepth::Bpp16,
            3 => ColorDepth::Bpp32,
            _ => ColorDepth::Bpp8,
        };
        Self {
            dst_pitch: dw[1] & 0xFFFF,
            color_depth,
            dst_x1: dw[2] & 0xFFFF,
            dst_y1: dw[2] >> 16,
            dst_x2: dw[3] & 0xFFFF,
            dst_y2: dw[3] >> 16,
            dst_address: join(dw[4], dw[5]),
            color: dw[6],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_headers() {
        assert_eq!(MI_BATCH_BUFFER_END, 0x0500_0000);
        assert_eq!(MiLoadRegisterImm::HEADER, 0x1100_0001);
        assert_eq!(PipeControl::HEADER, 0x7A00_0004);
        assert_eq!(PipelineSelect::HEADER, 0x6904_0000);
        assert_eq!(MediaVfeState::HEADER, 0x7000_0007);
        assert_eq!(MEDIA_STATE_FLUSH[0], 0x7004_0000);
        assert_eq!(MediaInterfaceDescriptorLoad::HEADER, 0x7002_0002);
        assert_eq!(GpgpuWalker::HEADER, 0x7105_000D);
        assert_eq!(StateBaseAddress::HEADER_BASE | 17, 0x6101_0011);
    }

    #[test]
    fn test_command_lengths() {
        assert_eq!(command_length(MI_NOOP), 1);
        assert_eq!(command_length(MI_BATCH_BUFFER_END), 1);
        assert_eq!(command_length(MiPredicate::HEADER), 1);
        assert_eq!(command_length(MiBatchBufferStart::HEADER), 3);
        assert_eq!(command_length(MiLoadRegisterImm::HEADER), 3);
        assert_eq!(command_length(MiLoadRegisterMem::HEADER), 4);
        assert_eq!(command_length(MiStoreDataImm::HEADER), 4);
        assert_eq!(command_length(MiFlushDw::HEADER), 5);
        assert_eq!(command_length(PipeControl::HEADER), 6);
        assert_eq!(command_length(PipelineSelect::encode(&PipelineSelect::default())[0]), 1);
        assert_eq!(command_length(GpgpuWalker::HEADER), 15);
        assert_eq!(command_length(XyCopyBlt::HEADER), 10);
        assert_eq!(command_length(XyColorBlt::HEADER), 7);
        assert_eq!(command_length(StateBaseAddress::HEADER_BASE | 20), 22);
    }

    #[test]
    fn test_batch_buffer_start_second_level_bit() {
        let bbs = MiBatchBufferStart {
            address: 0x1_2345_6000,
            second_level: true,
        };
        let dw = bbs.encode();
        assert_ne!(dw[0] & (1 << 22), 0);
        assert_eq!(dw[1], 0x2345_6000);
        assert_eq!(dw[2], 1);
        assert_eq!(MiBatchBufferStart::decode(&dw), bbs);
    }

    #[test]
    fn test_pipe_control_post_sync() {
        let pc = PipeControl::with_post_sync(0xABC0, 7, true);
        let dw = pc.encode();
        assert_eq!(dw[1] & (1 << 20), 1 << 20);
        assert_eq!((dw[1] >> 14) & 3, PostSyncOp::WriteImmediate as u32);
        assert_eq!(dw[2], 0xABC0);
        assert_eq!(dw[4], 7);
        assert_eq!(PipeControl::decode(&dw), pc);
    }

    #[test]
    fn test_state_base_address_only_modifies_present_fields() {
        let sba = StateBaseAddress {
            surface_state: Some(0x1_0000_0000),
            instruction: Some(BaseAddress {
                base: 0x7F00_0000_0000,
                size: 0xFFFF_F000,
            }),
            ..Default::default()
        };
        let dw = sba.encode(19);
        assert_eq!(dw.len(), 19);
        assert_eq!(dw[0], 0x6101_0011);
        assert_eq!(dw[1] & 1, 0);
        assert_eq!(dw[4], 1);
        assert_eq!(dw[5], 1);
        assert_eq!(dw[10] & 1, 1);
        assert_eq!(StateBaseAddress::decode(&dw), sba);
        assert_eq!(sba.encode(22)[0], 0x6101_0014);
    }

    #[test]
    fn test_interface_descriptor_fields() {
        let idd = InterfaceDescriptorData {
            kernel_start_pointer: 0x1240,
            thread_preemption_disable: true,
            sampler_state_pointer: 0x40,
            sampler_count: 2,
            binding_table_pointer: 0x80,
            binding_table_entry_count: 31,
            constant_urb_entry_read_length: 3,
            number_of_threads_in_gpgpu_thread_group: 4,
            shared_local_memory_size: 5,
            barrier_enable: true,
            cross_thread_constant_data_read_length: 2,
        };
        let dw = idd.encode();
        assert_eq!(dw[2], 1 << 20);
        assert_eq!(dw[4], 0x80 | 31);
        assert_eq!(dw[5], 3 << 16);
        assert_eq!(dw[6], 4 | (5 << 16) | (1 << 21));
        assert_eq!(InterfaceDescriptorData::decode(&dw), idd);
    }

    #[test]
    fn test_walker_fields() {
        let walker = GpgpuWalker {
            indirect_parameter_enable: true,
            predicate_enable: true,
            indirect_data_length: 96,
            indirect_data_start_address: 0x140,
            simd_size: SimdSize::Simd16,
            thread_width_counter_maximum: 3,
            thread_group_id_x_dimension: 10,
            thread_group_id_y_dimension: 2,
            thread_group_id_z_dimension: 1,
            right_execution_mask: 0xFF,
            bottom_execution_mask: 0xFFFF_FFFF,
            ..Default::default()
        };
        let dw = walker.encode();
        assert_eq!(dw[0], 0x7105_000D | (1 << 10) | (1 << 8));
        assert_eq!(dw[4], (1 << 30) | 3);
        assert_eq!(dw[7], 10);
        assert_eq!(dw[10], 2);
        assert_eq!(dw[12], 1);
        assert_eq!(GpgpuWalker::decode(&dw), walker);
    }

    #[test]
    fn test_semaphore_compare() {
        assert!(SemaphoreCompare::Equal.evaluate(0, 0));
        assert!(!SemaphoreCompare::Equal.evaluate(1, 0));
        assert!(SemaphoreCompare::GreaterThanOrEqual.evaluate(5, 5));
        let sem = MiSemaphoreWait {
            address: 0x1000,
            data: 0,
            compare: SemaphoreCompare::NotEqual,
        };
        assert_eq!(MiSemaphoreWait::decode(&sem.encode()), sem);
    }

    #[test]
    fn test_vfe_scratch_encoding() {
        assert_eq!(MediaVfeState::encode_scratch_size(0), 0);
        assert_eq!(MediaVfeState::encode_scratch_size(1024), 0);
        assert_eq!(MediaVfeState::encode_scratch_size(2048), 1);
        assert_eq!(MediaVfeState::encode_scratch_size(3000), 2);
        assert_eq!(MediaVfeState::encode_scratch_size(2 << 20), 11);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(command_name(MI_BATCH_BUFFER_END), "MI_BATCH_BUFFER_END");
        assert_eq!(command_name(MiSemaphoreWait::default().encode()[0]), "MI_SEMAPHORE_WAIT");
        assert_eq!(command_name(StateBaseAddress::HEADER_BASE | 17), "STATE_BASE_ADDRESS");
        assert_eq!(command_name(GpgpuWalker::HEADER), "GPGPU_WALKER");
        assert_eq!(command_name(XyCopyBlt::default().encode()[0]), "XY_COPY_BLT");
        assert_eq!(command_name(XyColorBlt::default().encode()[0]), "XY_COLOR_BLT");
        assert_eq!(command_name(0xE000_0000), "UNKNOWN");
    }
}
