// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Events: GPU-visible completion slots.
//!
//! Each event owns a 64-byte slot in its pool's allocation:
//!
//! | Offset | Contents                         |
//! |--------|----------------------------------|
//! | 0      | state (`0` signaled, `1` cleared) |
//! | 8      | context start timestamp          |
//! | 16     | global start timestamp           |
//! | 24     | context end timestamp            |
//! | 32     | global end timestamp             |

use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use xe_common::{timeout_from_ns, DriverError, DriverResult, SyncStatus};

use crate::allocation::{AllocationRef, AllocationType};
use crate::memory_manager::MemoryManager;

pub const EVENT_SLOT_SIZE: usize = 64;

pub const STATE_SIGNALED: u32 = 0;
pub const STATE_CLEARED: u32 = 1;

/// Slot offsets.
pub mod offsets {
    pub const STATE: usize = 0;
    pub const CONTEXT_START: usize = 8;
    pub const GLOBAL_START: usize = 16;
    pub const CONTEXT_END: usize = 24;
    pub const GLOBAL_END: usize = 32;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventPoolFlags: u32 {
        const HOST_VISIBLE = 1 << 0;
        /// Events record kernel start/end timestamps.
        const KERNEL_TIMESTAMP = 1 << 1;
    }
}

bitflags! {
    /// Memory an event's signal must be visible to. Empty means the signal
    /// only orders work on the same engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventScopeFlags: u32 {
        const SUBDEVICE = 1 << 0;
        const DEVICE = 1 << 1;
        const HOST = 1 << 2;
    }
}

/// Timestamps captured around a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTimestamp {
    pub context_start: u64,
    pub context_end: u64,
    pub global_start: u64,
    pub global_end: u64,
}

#[derive(Debug)]
pub struct EventPool {
    allocation: AllocationRef,
    count: u32,
    flags: EventPoolFlags,
}

impl EventPool {
    pub fn new(memory_manager: &MemoryManager, count: u32, flags: EventPoolFlags) -> DriverResult<Arc<Self>> {
        if count == 0 {
            return Err(DriverError::InvalidSize("event pool with zero events".into()));
        }
        let allocation = memory_manager.allocate(
            AllocationType::EventPool,
            count as usize * EVENT_SLOT_SIZE,
            EVENT_SLOT_SIZE,
        )?;
        for index in 0..count as usize {
            allocation.write_u32(index * EVENT_SLOT_SIZE + offsets::STATE, STATE_CLEARED);
        }
        log::debug!(
            "event: pool of {} events at 0x{:X} ({:?})",
            count,
            allocation.gpu_address(),
            flags
        );
        Ok(Arc::new(Self {
            allocation,
            count,
            flags,
        }))
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.allocation
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn flags(&self) -> EventPoolFlags {
        self.flags
    }

    pub fn create_event(self: &Arc<Self>, index: u32) -> DriverResult<Event> {
        if index >= self.count {
            return Err(DriverError::invalid_argument(format!(
                "event index {} out of range for pool of {}",
                index, self.count
            )));
        }
        Ok(Event {
            pool: self.clone(),
            index,
            signal_scope: EventScopeFlags::empty(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pool: Arc<EventPool>,
    index: u32,
    signal_scope: EventScopeFlags,
}

impl Event {
    pub fn with_signal_scope(mut self, scope: EventScopeFlags) -> Self {
        self.signal_scope = scope;
        self
    }

    pub fn signal_scope(&self) -> EventScopeFlags {
        self.signal_scope
    }

    fn slot(&self) -> usize {
        self.index as usize * EVENT_SLOT_SIZE
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn allocation(&self) -> &AllocationRef {
        &self.pool.allocation
    }

    /// GPU address of the state dword.
    pub fn gpu_address(&self) -> u64 {
        self.field_address(offsets::STATE)
    }

    /// GPU address of a slot field.
    pub fn field_address(&self, offset: usize) -> u64 {
        self.pool.allocation.gpu_address() + (self.slot() + offset) as u64
    }

    pub fn has_timestamps(&self) -> bool {
        self.pool.flags.contains(EventPoolFlags::KERNEL_TIMESTAMP)
    }

    pub fn host_signal(&self) {
        log::trace!("event {}: host signal", self.index);
        self.pool.allocation.write_u32(self.slot(), STATE_SIGNALED);
    }

    pub fn host_reset(&self) {
        log::trace!("event {}: host reset", self.index);
        self.pool.allocation.write_u32(self.slot(), STATE_CLEARED);
        if self.has_timestamps() {
            for offset in [
                offsets::CONTEXT_START,
                offsets::GLOBAL_START,
                offsets::CONTEXT_END,
                offsets::GLOBAL_END,
            ] {
                self.pool.allocation.write_u64(self.slot() + offset, 0);
            }
        }
    }

    pub fn query_status(&self) -> SyncStatus {
        if self.pool.allocation.read_u32(self.slot()) == STATE_SIGNALED {
            SyncStatus::Ready
        } else {
            SyncStatus::NotReady
        }
    }

    /// Poll until signaled. Zero polls once; `u64::MAX` waits forever.
    pub fn host_synchronize(&self, timeout_ns: u64) -> SyncStatus {
        let deadline = timeout_from_ns(timeout_ns).map(|t| Instant::now() + t);
        loop {
            if self.query_status().is_ready() {
                return SyncStatus::Ready;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return SyncStatus::NotReady,
                _ => std::thread::sleep(Duration::from_micros(50)),
            }
        }
    }

    pub fn query_kernel_timestamp(&self) -> DriverResult<KernelTimestamp> {
        if !self.has_timestamps() {
            return Err(DriverError::invalid_argument("event pool does not record timestamps"));
        }
        if !self.query_status().is_ready() {
            return Err(DriverError::invalid_argument("event is not signaled"));
        }
        let read = |offset| self.pool.allocation.read_u64(self.slot() + offset);
        Ok(KernelTimestamp {
            context_start: read(offsets::CONTEXT_START),
            context_end: read(offsets::CONTEXT_END),
            global_start: read(offsets::GLOBAL_START),
            global_end: read(offsets::GLOBAL_END),
        })
    }
}
