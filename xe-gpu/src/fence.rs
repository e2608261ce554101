// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fences: host-side completion of one queue submission.

use std::sync::Arc;

use parking_lot::Mutex;
use xe_common::{timeout_from_ns, DriverResult, SyncStatus};

use crate::command_stream_receiver::CommandStreamReceiver;

#[derive(Debug)]
pub struct Fence {
    csr: Arc<CommandStreamReceiver>,
    /// Task count of the last submission the fence was passed to.
    task_count: Mutex<Option<u32>>,
}

impl Fence {
    pub(crate) fn new(csr: Arc<CommandStreamReceiver>) -> Self {
        Self {
            csr,
            task_count: Mutex::new(None),
        }
    }

    pub(crate) fn csr(&self) -> &Arc<CommandStreamReceiver> {
        &self.csr
    }

    pub(crate) fn assign(&self, task_count: u32) {
        log::trace!(
            "fence: context {} -> task {}",
            self.csr.context().context_id,
            task_count
        );
        *self.task_count.lock() = Some(task_count);
    }

    /// `NotReady` until a submission carrying this fence completes.
    pub fn query_status(&self) -> DriverResult<SyncStatus> {
        self.host_synchronize(0)
    }

    pub fn host_synchronize(&self, timeout_ns: u64) -> DriverResult<SyncStatus> {
        let Some(task_count) = *self.task_count.lock() else {
            return Ok(SyncStatus::NotReady);
        };
        self.csr.wait_for_task_count(task_count, timeout_from_ns(timeout_ns))
    }

    pub fn reset(&self) {
        *self.task_count.lock() = None;
    }
}
