//! Cancellable scheduled tasks and bounded retry handles.
//!
//! A [`RetryHandle`] owns both the attempt counter of one retry loop and the
//! timer of its pending attempt. Resetting it cancels the timer and zeroes the
//! counter in one step, and dropping it cancels the timer.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

/// A spawned task that is aborted when the handle is dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Point-in-time view of a [`RetryHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryStatus {
    pub attempts: u32,
    pub pending: bool,
}

/// Counter and pending timer of one bounded retry loop.
#[derive(Debug)]
pub struct RetryHandle {
    label: &'static str,
    max_attempts: u32,
    attempts: u32,
    pending: Option<ScheduledTask>,
}

impl RetryHandle {
    pub fn new(label: &'static str, max_attempts: u32) -> Self {
        Self {
            label,
            max_attempts,
            attempts: 0,
            pending: None,
        }
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> RetryStatus {
        RetryStatus {
            attempts: self.attempts,
            pending: self.is_pending(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Returns `true` while a scheduled attempt has not run yet.
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Schedules the next attempt, replacing any pending one.
    ///
    /// Returns `false` without scheduling anything once the attempt bound is
    /// reached.
    pub fn schedule<F>(&mut self, attempt: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_exhausted() {
            self.pending = None;
            debug!(
                retry = self.label,
                attempts = self.attempts,
                "retry bound reached"
            );
            return false;
        }

        self.attempts += 1;
        debug!(
            retry = self.label,
            attempt = self.attempts,
            max_attempts = self.max_attempts,
            "retry scheduled"
        );
        self.pending = Some(ScheduledTask::spawn(attempt));
        true
    }

    /// Cancels the pending attempt and starts a new episode.
    pub fn reset(&mut self) {
        if self.attempts > 0 || self.pending.is_some() {
            debug!(retry = self.label, attempts = self.attempts, "retry reset");
        }
        self.pending = None;
        self.attempts = 0;
    }
}
