// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Driver-internal kernels backing memory copies and fills on compute lists.
//!
//! Builtin ISA is a tag rather than machine code: a 4-byte magic followed by
//! the builtin id. Engines that find the tag at a walker's kernel start
//! pointer run the operation natively.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use xe_common::{DriverResult, CACHELINE_SIZE};

use crate::kernel::{ArgDescriptor, DispatchTraits, KernelDescriptor, KernelFlags, KernelImmutableData};
use crate::memory_manager::MemoryManager;

pub const BUILTIN_ISA_MAGIC: [u8; 4] = *b"XEBI";

/// Work items per group for linear copies and fills.
pub const COPY_GROUP_SIZE: u32 = 64;

/// Largest pattern the immediate fill carries in its payload.
pub const FILL_IMMEDIATE_MAX_PATTERN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Builtin {
    /// One byte per work item.
    CopyBufferToBuffer = 0,
    /// One byte per work item over a (width, height) grid.
    CopyBufferRectBytes2d = 1,
    /// Pattern of up to four bytes passed by value.
    FillBufferImmediate = 2,
    /// Pattern read from memory.
    FillBufferPattern = 3,
}

/// Cross-thread layouts shared by the encoder side and the executing engine.
pub mod layout {
    pub mod copy {
        pub const SRC: usize = 0;
        pub const DST: usize = 8;
        pub const SIZE: usize = 16;
        pub const NUM_WORK_GROUPS: usize = 24;
        pub const LOCAL_SIZE: usize = 36;
        pub const TOTAL: u32 = 64;
    }

    pub mod rect {
        pub const SRC: usize = 0;
        pub const DST: usize = 8;
        pub const SRC_PITCH: usize = 16;
        pub const DST_PITCH: usize = 20;
        pub const SRC_ORIGIN: usize = 24;
        pub const DST_ORIGIN: usize = 32;
        pub const NUM_WORK_GROUPS: usize = 40;
        pub const LOCAL_SIZE: usize = 52;
        pub const TOTAL: u32 = 64;
    }

    /// Shared by both fills. `PATTERN` is the pattern dword for the
    /// immediate variant and a pointer for the other.
    pub mod fill {
        pub const DST: usize = 0;
        pub const SIZE: usize = 8;
        pub const PATTERN: usize = 16;
        pub const PATTERN_SIZE: usize = 24;
        pub const NUM_WORK_GROUPS: usize = 32;
        pub const LOCAL_SIZE: usize = 44;
        pub const TOTAL: u32 = 64;
    }
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [
        Builtin::CopyBufferToBuffer,
        Builtin::CopyBufferRectBytes2d,
        Builtin::FillBufferImmediate,
        Builtin::FillBufferPattern,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::CopyBufferToBuffer),
            1 => Some(Self::CopyBufferRectBytes2d),
            2 => Some(Self::FillBufferImmediate),
            3 => Some(Self::FillBufferPattern),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CopyBufferToBuffer => "CopyBufferToBuffer",
            Self::CopyBufferRectBytes2d => "CopyBufferRectBytes2d",
            Self::FillBufferImmediate => "FillBufferImmediate",
            Self::FillBufferPattern => "FillBufferPattern",
        }
    }

    /// Tagged ISA, padded to a cacheline.
    pub fn isa(self) -> Vec<u8> {
        let mut isa = vec![0u8; CACHELINE_SIZE];
        isa[..4].copy_from_slice(&BUILTIN_ISA_MAGIC);
        LittleEndian::write_u32(&mut isa[4..8], self as u32);
        isa
    }

    /// Recognize a builtin from the first bytes at a kernel start pointer.
    pub fn from_isa(isa: &[u8]) -> Option<Self> {
        if isa.len() < 8 || isa[..4] != BUILTIN_ISA_MAGIC {
            return None;
        }
        Self::from_id(LittleEndian::read_u32(&isa[4..8]))
    }

    pub fn descriptor(self) -> KernelDescriptor {
        let mut desc = KernelDescriptor::new(self.name(), 16);
        desc.flags = KernelFlags::PASSES_CROSS_THREAD_DATA | KernelFlags::PASSES_PER_THREAD_DATA;
        desc.num_local_id_channels = 1;
        match self {
            Self::CopyBufferToBuffer => {
                use layout::copy::*;
                desc.cross_thread_data_size = TOTAL;
                desc.args = vec![
                    ArgDescriptor::Pointer {
                        cross_thread_offset: SRC as u16,
                    },
                    ArgDescriptor::Pointer {
                        cross_thread_offset: DST as u16,
                    },
                    ArgDescriptor::Value {
                        cross_thread_offset: SIZE as u16,
                        size: 8,
                    },
                ];
                desc.dispatch_traits = DispatchTraits {
                    num_work_groups: Some(NUM_WORK_GROUPS as u16),
                    local_work_size: Some(LOCAL_SIZE as u16),
                    ..DispatchTraits::default()
                };
            }
            Self::CopyBufferRectBytes2d => {
                use layout::rect::*;
                desc.num_local_id_channels = 2;
                desc.cross_thread_data_size = TOTAL;
                let value = |offset: usize, size: u16| ArgDescriptor::Value {
                    cross_thread_offset: offset as u16,
                    size,
                };
                desc.args = vec![
                    ArgDescriptor::Pointer {
                        cross_thread_offset: SRC as u16,
                    },
                    ArgDescriptor::Pointer {
                        cross_thread_offset: DST as u16,
                    },
                    value(SRC_PITCH, 4),
                    value(DST_PITCH, 4),
                    value(SRC_ORIGIN, 8),
                    value(DST_ORIGIN, 8),
                ];
                desc.dispatch_traits = DispatchTraits {
                    num_work_groups: Some(NUM_WORK_GROUPS as u16),
                    local_work_size: Some(LOCAL_SIZE as u16),
                    ..DispatchTraits::default()
                };
            }
            Self::FillBufferImmediate | Self::FillBufferPattern => {
                use layout::fill::*;
                desc.cross_thread_data_size = TOTAL;
                desc.args = vec![
                    ArgDescriptor::Pointer {
                        cross_thread_offset: DST as u16,
                    },
                    ArgDescriptor::Value {
                        cross_thread_offset: SIZE as u16,
                        size: 8,
                    },
                ];
                if self == Self::FillBufferImmediate {
                    desc.args.push(ArgDescriptor::Value {
                        cross_thread_offset: PATTERN as u16,
                        size: 4,
                    });
                } else {
                    desc.args.push(ArgDescriptor::Pointer {
                        cross_thread_offset: PATTERN as u16,
                    });
                    desc.args.push(ArgDescriptor::Value {
                        cross_thread_offset: PATTERN_SIZE as u16,
                        size: 8,
                    });
                }
                desc.dispatch_traits = DispatchTraits {
                    num_work_groups: Some(NUM_WORK_GROUPS as u16),
                    local_work_size: Some(LOCAL_SIZE as u16),
                    ..DispatchTraits::default()
                };
            }
        }
        desc
    }
}

/// Uploaded builtins of one device.
#[derive(Debug)]
pub struct BuiltinKernels {
    kernels: Vec<Arc<KernelImmutableData>>,
}

impl BuiltinKernels {
    pub fn new(memory_manager: &MemoryManager) -> DriverResult<Self> {
        let kernels = Builtin::ALL
            .iter()
            .map(|b| KernelImmutableData::new(memory_manager, b.descriptor(), &b.isa()))
            .collect::<DriverResult<Vec<_>>>()?;
        log::debug!("builtins: uploaded {} kernels", kernels.len());
        Ok(Self { kernels })
    }

    pub fn get(&self, builtin: Builtin) -> &Arc<KernelImmutableData> {
        &self.kernels[builtin as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isa_tag_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_isa(&b.isa()), Some(b));
        }
        assert_eq!(Builtin::from_isa(b"ABCD\0\0\0\0"), None);
        assert_eq!(Builtin::from_isa(b"XEBI"), None);
    }

    #[test]
    fn test_descriptors_fit_cross_thread_layout() {
        for b in Builtin::ALL {
            let desc = b.descriptor();
            for arg in &desc.args {
                let (offset, size) = match *arg {
                    ArgDescriptor::Pointer { cross_thread_offset } => (cross_thread_offset as u32, 8),
                    ArgDescriptor::Value {
                        cross_thread_offset,
                        size,
                    } => (cross_thread_offset as u32, size as u32),
                };
                assert!(offset + size <= desc.cross_thread_data_size, "{:?}", b);
            }
            assert_eq!(desc.cross_thread_data_size % 32, 0);
        }
    }

    #[test]
    fn test_builtins_upload_into_internal_heap() {
        let mm = MemoryManager::new();
        let builtins = BuiltinKernels::new(&mm).unwrap();
        let copy = builtins.get(Builtin::CopyBufferToBuffer);
        assert_eq!(copy.descriptor().name, "CopyBufferToBuffer");
        assert!(copy.isa_allocation().gpu_address() >= mm.internal_heap_base());
        let mut head = [0u8; 8];
        copy.isa_allocation().read(0, &mut head);
        assert_eq!(Builtin::from_isa(&head), Some(Builtin::CopyBufferToBuffer));
    }
}
