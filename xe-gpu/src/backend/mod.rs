// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Submission backends.
//!
//! A backend takes a batch buffer plus the allocations it needs resident and
//! gets it executed on an engine context. Completion is reported through the
//! batch's own task-count write and through [`SubmissionBackend::wait`].
//!
//! | Backend               | Behavior                                          |
//! |-----------------------|---------------------------------------------------|
//! | [`NullBackend`]       | Accepts and counts submissions, never completes   |
//! | [`SimulatedBackend`]  | Decodes and executes batches against host memory  |

pub mod null_backend;
pub mod simulated;

use std::time::Duration;

use thiserror::Error;
use xe_common::DriverError;

use crate::allocation::AllocationRef;
use crate::command_stream_receiver::EngineContext;
use crate::engines::ExecutionError;

pub use null_backend::NullBackend;
pub use simulated::{ExecutionMode, SimulatedBackend};

/// Backend type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Null,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("submission rejected: {0}")]
    SubmitFailed(String),

    #[error("GPU page fault at 0x{va:X}")]
    PageFault { va: u64 },

    #[error("GPU hang: {0}")]
    Hang(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("device lost")]
    DeviceLost,

    #[error("out of resources")]
    OutOfResources,

    #[error("wait failed: {0}")]
    WaitFailed(String),
}

impl From<ExecutionError> for BackendError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::PageFault { va, .. } => Self::PageFault { va },
            ExecutionError::SemaphoreTimeout { .. } | ExecutionError::Runaway(_) => Self::Hang(err.to_string()),
            other => Self::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<BackendError> for DriverError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfResources => DriverError::OutOfDeviceMemory { requested: 0 },
            other => DriverError::DeviceLost(other.to_string()),
        }
    }
}

/// One batch handed to a backend.
#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub batch_address: u64,
    pub batch_length: usize,
    /// Deduplicated allocations the batch may touch.
    pub residency: Vec<AllocationRef>,
    pub context: EngineContext,
}

/// A task count to wait for on one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceWait {
    pub context: EngineContext,
    pub tag_address: u64,
    pub task_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    TimedOut,
}

/// Trait for submission backends.
pub trait SubmissionBackend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn submit(&self, args: &SubmitArgs) -> Result<(), BackendError>;

    /// Block until `fence` completes. `None` waits forever.
    fn wait(&self, fence: &FenceWait, timeout: Option<Duration>) -> Result<WaitStatus, BackendError>;

    /// Push out anything the backend is holding back.
    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
