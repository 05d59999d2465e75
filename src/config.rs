//! Configuration for the worker pool.
//!
//! Settings are plain serde structs with conservative defaults. Out-of-range
//! spare bounds are clamped at start time rather than rejected, so a pool
//! always comes up with a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing and behavior settings for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle controller count the pool grows toward during maintenance.
    pub min_spare_threads: usize,
    /// Idle controllers beyond this count are terminated.
    pub max_spare_threads: usize,
    /// Hard cap on controllers, idle plus busy.
    pub max_threads: usize,
    /// How many controllers one maintenance grow step creates.
    pub inc_threads: usize,
    /// Recorded on each controller and reported in logs. Tokio tasks have no
    /// daemon/user distinction, so this is advisory only.
    pub daemon: bool,
    /// How often the spare-controller maintenance pass runs.
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_spare_threads: 4,
            max_spare_threads: 16,
            max_threads: 32,
            inc_threads: 4,
            daemon: true,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Enforce the start-time constraints: `min_spare_threads` and
    /// `max_spare_threads` must not exceed `max_threads`. Out-of-range
    /// values are clamped down to `max_threads`, not rejected.
    pub fn clamped(mut self) -> Self {
        if self.max_threads == 0 {
            tracing::warn!("max_threads must be at least 1, raising from 0");
            self.max_threads = 1;
        }
        if self.min_spare_threads > self.max_threads {
            tracing::warn!(
                "min_spare_threads {} exceeds max_threads {}, clamping",
                self.min_spare_threads,
                self.max_threads
            );
            self.min_spare_threads = self.max_threads;
        }
        if self.max_spare_threads > self.max_threads {
            tracing::warn!(
                "max_spare_threads {} exceeds max_threads {}, clamping",
                self.max_spare_threads,
                self.max_threads
            );
            self.max_spare_threads = self.max_threads;
        }
        if self.inc_threads == 0 {
            self.inc_threads = 1;
        }
        self
    }
}
