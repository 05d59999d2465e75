//! Error types for the worker pool and scheduling engine.

use thiserror::Error;

use super::{ControllerId, HandleId, LifecyclePhase};

/// Top-level error type covering every subsystem.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("cron error: {0}")]
    Cron(#[from] CronError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Cron expression format and computation errors.
///
/// All of these are fatal at parse time and surfaced to the caller
/// immediately; a malformed expression is never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("empty cron expression")]
    Empty,

    #[error("too many fields: expected at most 7, got {count}")]
    TooManyFields { count: usize },

    #[error("invalid token '{token}' in {field} field")]
    InvalidToken { field: &'static str, token: String },

    #[error("value {value} out of range for {field} field ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("step must be positive in token '{token}'")]
    ZeroStep { token: String },

    #[error("step token '{token}' requires an explicit range")]
    StepWithoutRange { token: String },

    #[error("no upcoming time satisfies '{expression}'")]
    NoUpcomingMatch { expression: String },
}

/// Worker pool lease protocol errors.
///
/// Pool exhaustion is not represented here: `allocate` and `compete` report
/// it through the `None` sentinel, which callers treat as backpressure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("controller {controller_id} already has a task bound")]
    ControllerBusy { controller_id: ControllerId },

    #[error("controller {controller_id} is not accepting work (phase: {phase})")]
    ControllerUnavailable {
        controller_id: ControllerId,
        phase: LifecyclePhase,
    },

    #[error("pool is not running")]
    NotRunning,
}

/// Schedule service errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule service is shutting down")]
    ShuttingDown,

    #[error("handle not found: {handle_id}")]
    HandleNotFound { handle_id: HandleId },
}

/// Result type used across the crate's public surface.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_error_display() {
        let err = CronError::OutOfRange {
            field: "minute",
            value: 75,
            min: 0,
            max: 59,
        };
        assert_eq!(
            err.to_string(),
            "value 75 out of range for minute field (0..=59)"
        );
    }

    #[test]
    fn runtime_error_wraps_subsystems() {
        let err: RuntimeError = CronError::Empty.into();
        assert!(matches!(err, RuntimeError::Cron(_)));

        let err: RuntimeError = PoolError::NotRunning.into();
        assert!(matches!(err, RuntimeError::Pool(_)));

        let err: RuntimeError = ScheduleError::ShuttingDown.into();
        assert!(matches!(err, RuntimeError::Schedule(_)));
    }
}
