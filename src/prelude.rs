//! Prelude for scheduler consumers.
//!
//! Import the whole scheduling surface with a single line:
//!
//! ```ignore
//! use chronopool::prelude::*;
//! ```

pub use crate::config::PoolConfig;
pub use crate::cron::CronEntry;
pub use crate::pool::{Job, WorkerController, WorkerPool};
pub use crate::scheduler::{Repeat, ScheduleService, ScheduledHandle};
pub use crate::types::{
    ControllerId, CronError, HandleId, LifecyclePhase, PoolError, PoolStats, RuntimeError,
    RuntimeResult, ScheduleError, TaskState,
};
