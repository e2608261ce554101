// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-context completion counters.
//!
//! Every engine context owns a monotonically increasing 32-bit task count.
//! The executing engine bumps it after each submission completes, and host
//! threads can block until it reaches a threshold.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Engine contexts tracked by one monitor.
pub const MAX_CONTEXTS: usize = 64;

struct Waiter {
    threshold: u32,
    signal: Arc<(Mutex<bool>, Condvar)>,
}

/// Completion counters for every engine context of a backend.
pub struct TaskCountMonitor {
    values: Vec<AtomicU32>,
    waiters: Mutex<Vec<Vec<Waiter>>>,
}

impl TaskCountMonitor {
    pub fn new() -> Self {
        Self {
            values: (0..MAX_CONTEXTS).map(|_| AtomicU32::new(0)).collect(),
            waiters: Mutex::new((0..MAX_CONTEXTS).map(|_| Vec::new()).collect()),
        }
    }

    /// Mark one more task complete on `context` and wake satisfied waiters.
    /// Returns the new count.
    pub fn increment(&self, context: u32) -> u32 {
        let idx = context as usize;
        if idx >= MAX_CONTEXTS {
            log::warn!("task_count: increment out of range context={}", context);
            return 0;
        }

        let new_val = self.values[idx].fetch_add(1, Ordering::Release) + 1;
        log::trace!("task_count[{}] -> {}", context, new_val);

        let mut waiters = self.waiters.lock();
        waiters[idx].retain(|w| {
            if task_count_reached(new_val, w.threshold) {
                let (lock, cvar) = &*w.signal;
                *lock.lock() = true;
                cvar.notify_one();
                false
            } else {
                true
            }
        });

        new_val
    }

    pub fn value(&self, context: u32) -> u32 {
        self.values
            .get(context as usize)
            .map_or(0, |v| v.load(Ordering::Acquire))
    }

    /// Block until `context` reaches `threshold`.
    ///
    /// `None` waits forever; a zero timeout only polls. Returns whether the
    /// threshold was reached.
    pub fn wait(&self, context: u32, threshold: u32, timeout: Option<Duration>) -> bool {
        let idx = context as usize;
        if idx >= MAX_CONTEXTS {
            return false;
        }
        if task_count_reached(self.values[idx].load(Ordering::Acquire), threshold) {
            return true;
        }
        if timeout == Some(Duration::ZERO) {
            return false;
        }

        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        {
            let mut waiters = self.waiters.lock();
            // Re-check under the lock so an increment between the fast path
            // and registration is not lost.
            if task_count_reached(self.values[idx].load(Ordering::Acquire), threshold) {
                return true;
            }
            waiters[idx].push(Waiter {
                threshold,
                signal: signal.clone(),
            });
        }

        let (lock, cvar) = &*signal;
        let mut signaled = lock.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while !*signaled {
            match deadline {
                None => cvar.wait(&mut signaled),
                Some(deadline) => {
                    if cvar.wait_until(&mut signaled, deadline).timed_out() && !*signaled {
                        drop(signaled);
                        self.waiters.lock()[idx].retain(|w| !Arc::ptr_eq(&w.signal, &signal));
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl Default for TaskCountMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskCountMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCountMonitor").finish_non_exhaustive()
    }
}

/// Wraparound-safe `value >= threshold`.
pub fn task_count_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_increment() {
        let monitor = TaskCountMonitor::new();
        assert_eq!(monitor.value(0), 0);
        assert_eq!(monitor.increment(0), 1);
        assert_eq!(monitor.increment(0), 2);
        assert_eq!(monitor.value(0), 2);
        assert_eq!(monitor.value(1), 0);
    }

    #[test]
    fn test_out_of_range() {
        let monitor = TaskCountMonitor::new();
        assert_eq!(monitor.value(MAX_CONTEXTS as u32), 0);
        assert_eq!(monitor.increment(MAX_CONTEXTS as u32), 0);
        assert!(!monitor.wait(MAX_CONTEXTS as u32, 0, None));
    }

    #[test]
    fn test_poll_does_not_block() {
        let monitor = TaskCountMonitor::new();
        let start = Instant::now();
        assert!(!monitor.wait(2, 1, Some(Duration::ZERO)));
        assert!(start.elapsed() < Duration::from_millis(50));
        monitor.increment(2);
        assert!(monitor.wait(2, 1, Some(Duration::ZERO)));
    }

    #[test]
    fn test_wait_timeout() {
        let monitor = TaskCountMonitor::new();
        let start = Instant::now();
        assert!(!monitor.wait(3, 10, Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wait_then_increment() {
        let monitor = Arc::new(TaskCountMonitor::new());
        let waiter = monitor.clone();
        let handle = thread::spawn(move || waiter.wait(1, 3, None));

        thread::sleep(Duration::from_millis(20));
        monitor.increment(1);
        monitor.increment(1);
        monitor.increment(1);

        assert!(handle.join().unwrap());
        assert_eq!(monitor.value(1), 3);
    }

    #[test]
    fn test_reached_wraparound() {
        assert!(task_count_reached(5, 3));
        assert!(task_count_reached(3, 3));
        assert!(!task_count_reached(2, 3));
        assert!(task_count_reached(0, u32::MAX));
    }
}
