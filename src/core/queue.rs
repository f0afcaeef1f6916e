//! CW-004: Mutex-guarded FIFO of pending compile jobs.
//!
//! Enqueue never blocks; the single consumer idles on a bounded condvar wait
//! instead of busy-spinning, re-checking its shutdown token between waits.

use crate::core::types::CompileJob;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A job tagged with its originating message id.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i32,
    pub job: CompileJob,
}

/// Thread-safe FIFO with a wake signal for the consumer.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<VecDeque<QueuedJob>>,
    signal: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job. Never blocks beyond the mutex.
    pub fn push(&self, id: i32, job: CompileJob) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.push_back(QueuedJob { id, job });
        self.signal.notify_one();
    }

    /// Dequeue the oldest pending job, waiting up to `timeout` for one to
    /// arrive. Returns None on timeout so the caller can re-check shutdown.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueuedJob> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.is_empty() {
            let (guard, _timed_out) = self
                .signal
                .wait_timeout(inner, timeout)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
