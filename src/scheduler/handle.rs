//! Scheduled handles and repetition modes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cron::CronEntry;
use crate::types::{HandleId, TaskState};

/// How a submission repeats after an execution completes.
#[derive(Debug)]
pub enum Repeat {
    /// One-shot: execute once and finish.
    None,
    /// Anchored to the scheduled time: next fire is `scheduled + period`.
    /// Overrunning executions let the schedule drift into the past, causing
    /// back-to-back re-fires without overlap.
    FixedRate(Duration),
    /// Anchored to the completion time: next fire is `completion + delay`.
    /// Never compresses gaps.
    FixedDelay(Duration),
    /// Next fire computed from the cron entry after each execution.
    Cron(CronEntry),
}

/// Cancellable handle over one scheduled submission.
///
/// Cancellation is terminal and synchronous from the caller's perspective;
/// an in-flight execution is not interrupted, only the next re-arm is
/// suppressed. A pending timer entry that was already queued becomes a
/// no-op at fire time.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
    inner: Arc<HandleCore>,
}

#[derive(Debug)]
struct HandleCore {
    id: HandleId,
    state: Mutex<TaskState>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduledHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(HandleCore {
                id: HandleId::new(),
                state: Mutex::new(TaskState::Virgin),
                next_run: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    /// The pending fire time, if the handle is still armed.
    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        *self.inner.next_run.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Cancel the handle. Returns `true` if this call performed the
    /// cancellation, `false` if the handle was already in a terminal state.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(*state, TaskState::Cancelled | TaskState::Executed) {
            return false;
        }
        *state = TaskState::Cancelled;
        *self.inner.next_run.lock() = None;
        true
    }

    /// Arm the handle for `at`. Refused once cancelled; the caller stops
    /// driving the schedule on `false`.
    pub(crate) fn mark_scheduled(&self, at: DateTime<Utc>) -> bool {
        let mut state = self.inner.state.lock();
        if *state == TaskState::Cancelled {
            return false;
        }
        *state = TaskState::Scheduled;
        *self.inner.next_run.lock() = Some(at);
        true
    }

    /// Terminal success: the one-shot ran, or the schedule is exhausted.
    pub(crate) fn mark_executed(&self) {
        let mut state = self.inner.state.lock();
        if *state != TaskState::Cancelled {
            *state = TaskState::Executed;
        }
        *self.inner.next_run.lock() = None;
    }

    /// Terminal failure: the body failed, so the handle is left
    /// cancelled-equivalent with no further scheduled time.
    pub(crate) fn mark_failed(&self) {
        *self.inner.state.lock() = TaskState::Cancelled;
        *self.inner.next_run.lock() = None;
    }
}
