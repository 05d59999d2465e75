//! Chronopool
//!
//! A lease-based worker pool combined with a cron-driven scheduling engine.
//! Background work is dispatched onto a bounded, reusable set of worker
//! controllers, either immediately, after a fixed delay, at a fixed-rate or
//! fixed-delay cadence, or at times computed from a cron-style expression
//! evaluated down to one-second resolution.
//!
//! The three layers, leaves first:
//!
//! - [`cron::CronEntry`]: parses a cron expression into per-field membership
//!   tables and computes the next qualifying instant after a reference time.
//! - [`pool::WorkerPool`]: owns a dynamic set of [`pool::WorkerController`]s
//!   and implements the lease protocol (`allocate`, `compete`, `recycle`,
//!   `terminate`) plus periodic spare-controller maintenance.
//! - [`scheduler::ScheduleService`]: composes the two into delay-based,
//!   fixed-rate/fixed-delay, and cron-based scheduling with cancellable
//!   handles.

pub mod config;
pub mod cron;
pub mod pool;
pub mod prelude;
pub mod scheduler;
pub mod types;

// Re-export the primary surface at the crate root.
pub use config::PoolConfig;
pub use cron::CronEntry;
pub use pool::{Job, WorkerController, WorkerPool};
pub use scheduler::{Repeat, ScheduleService, ScheduledHandle};
pub use types::*;
