// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Null backend: submissions are accepted and counted but never executed,
//! so nothing ever completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{BackendError, FenceWait, SubmissionBackend, SubmitArgs, WaitStatus};

#[derive(Debug, Default)]
pub struct NullBackend {
    submissions: AtomicU64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }
}

impl SubmissionBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn submit(&self, args: &SubmitArgs) -> Result<(), BackendError> {
        let n = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!(
            "null: submission {} on context {} (0x{:X}, {} bytes, {} resident)",
            n,
            args.context.context_id,
            args.batch_address,
            args.batch_length,
            args.residency.len()
        );
        Ok(())
    }

    fn wait(&self, fence: &FenceWait, timeout: Option<Duration>) -> Result<WaitStatus, BackendError> {
        match timeout {
            None => Err(BackendError::WaitFailed(format!(
                "task count {} on context {} can never complete",
                fence.task_count, fence.context.context_id
            ))),
            Some(timeout) => {
                std::thread::sleep(timeout);
                Ok(WaitStatus::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_stream_receiver::{EngineContext, EngineType};

    fn context() -> EngineContext {
        EngineContext {
            context_id: 0,
            engine_type: EngineType::Rcs,
        }
    }

    #[test]
    fn test_counts_and_never_completes() {
        let backend = NullBackend::new();
        let args = SubmitArgs {
            batch_address: 0x1000,
            batch_length: 64,
            residency: Vec::new(),
            context: context(),
        };
        backend.submit(&args).unwrap();
        backend.submit(&args).unwrap();
        assert_eq!(backend.submission_count(), 2);

        let fence = FenceWait {
            context: context(),
            tag_address: 0,
            task_count: 1,
        };
        assert_eq!(
            backend.wait(&fence, Some(Duration::from_millis(1))),
            Ok(WaitStatus::TimedOut)
        );
        assert!(backend.wait(&fence, None).is_err());
    }
}
