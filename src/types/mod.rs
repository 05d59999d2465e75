//! Core types shared by the pool and scheduling subsystems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier for worker controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub Uuid);

impl ControllerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ControllerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ControllerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ControllerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for scheduled handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for HandleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle phase shared by the pool and its controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LifecyclePhase {
    /// Constructed but not yet started.
    #[default]
    Disabled,
    Initializing,
    Starting,
    /// Accepting and executing work.
    Started,
    Stopping,
    /// No new work is accepted; remaining busy controllers drain.
    Stopped,
    Destroying,
    /// Fully torn down. Terminal.
    Destroyed,
}

impl LifecyclePhase {
    /// Whether new work may be accepted in this phase.
    pub fn is_running(&self) -> bool {
        matches!(self, LifecyclePhase::Started)
    }

    /// Whether the phase is on the shutdown side of the state machine.
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Stopping
                | LifecyclePhase::Stopped
                | LifecyclePhase::Destroying
                | LifecyclePhase::Destroyed
        )
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecyclePhase::Disabled => "disabled",
            LifecyclePhase::Initializing => "initializing",
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Started => "started",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::Destroying => "destroying",
            LifecyclePhase::Destroyed => "destroyed",
        };
        write!(f, "{name}")
    }
}

/// Execution state of a scheduled handle.
///
/// `Cancelled` is terminal: a cancelled handle is never re-armed. A one-shot
/// handle moves `Virgin` -> `Scheduled` -> `Executed` and never re-enters
/// `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskState {
    /// Created but not yet armed.
    #[default]
    Virgin,
    /// Armed with a pending execution time.
    Scheduled,
    /// Ran to completion (one-shot) or exhausted its schedule.
    Executed,
    /// Cancelled, or stopped after a failed execution. Terminal.
    Cancelled,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Virgin => "virgin",
            TaskState::Scheduled => "scheduled",
            TaskState::Executed => "executed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub phase: LifecyclePhase,
    /// Controllers waiting for work.
    pub idle: usize,
    /// Controllers currently leased out.
    pub busy: usize,
    /// `idle + busy`.
    pub total: usize,
    /// Configured hard cap on `total`.
    pub max_threads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_id_roundtrip() {
        let id = ControllerId::new();
        let parsed: ControllerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn handle_ids_are_unique() {
        let a = HandleId::default();
        let b = HandleId::default();
        assert_ne!(a, b);
    }

    #[test]
    fn phase_predicates() {
        assert!(LifecyclePhase::Started.is_running());
        assert!(!LifecyclePhase::Stopping.is_running());
        assert!(LifecyclePhase::Stopping.is_shutting_down());
        assert!(LifecyclePhase::Destroyed.is_shutting_down());
        assert!(!LifecyclePhase::Disabled.is_shutting_down());
    }

    #[test]
    fn default_task_state_is_virgin() {
        assert_eq!(TaskState::default(), TaskState::Virgin);
    }
}
