// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU compute driver core: command-list encoding and submission.
//!
//! | Layer | Modules |
//! |---|---|
//! | Memory | `allocation`, `memory_manager`, `residency`, `heap`, `linear_stream` |
//! | Hardware | `hw`, `hw_info`, `preemption` |
//! | Recording | `command_container`, `encoder`, `command_list`, `kernel`, `builtins` |
//! | Submission | `command_queue`, `command_stream_receiver`, `scratch_space`, `task_count` |
//! | Synchronization | `event`, `fence`, `printf` |
//! | Objects | `device`, `driver` |
//! | Execution | `backend`, `command_processor`, `engines` |

pub mod allocation;
pub mod backend;
pub mod builtins;
pub mod command_container;
pub mod command_list;
pub mod command_processor;
pub mod command_queue;
pub mod command_stream_receiver;
pub mod device;
pub mod driver;
pub mod encoder;
pub mod engines;
pub mod event;
pub mod fence;
pub mod heap;
pub mod hw;
pub mod hw_info;
pub mod kernel;
pub mod linear_stream;
pub mod memory_manager;
pub mod preemption;
pub mod printf;
pub mod residency;
pub mod scratch_space;
pub mod task_count;

pub use allocation::{AllocationRef, AllocationType, GraphicsAllocation};
pub use backend::{BackendError, ExecutionMode, NullBackend, SimulatedBackend, SubmissionBackend};
pub use command_list::{CommandList, CommandListState, CopyRegion};
pub use command_queue::CommandQueue;
pub use device::{CommandQueueDesc, Device, QueueMode};
pub use driver::DriverHandle;
pub use event::{Event, EventPool, EventPoolFlags, EventScopeFlags};
pub use fence::Fence;
pub use hw_info::HardwareInfo;
pub use kernel::{Kernel, KernelDescriptor};
pub use memory_manager::MemoryManager;
