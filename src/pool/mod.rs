//! Worker pool: a bounded, reusable set of controllers and the lease
//! protocol (`allocate` / `compete` / `recycle` / `terminate`) that governs
//! their ownership.
//!
//! All idle/busy bookkeeping lives behind a single mutex, so every lease
//! operation is one atomic region: concurrent `allocate` calls can never
//! hand out the same controller twice, and a `recycle` racing with a trim
//! can never double-terminate a controller.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::interval;

use crate::config::PoolConfig;
use crate::types::{ControllerId, LifecyclePhase, PoolStats};

mod controller;

pub use controller::{Job, WorkerController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecycleOutcome {
    /// Returned to the idle set.
    Kept,
    /// Trimmed as excess or refused because the pool is shutting down.
    Terminated,
}

pub(crate) struct PoolCore {
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Wakes `compete` waiters whenever a controller becomes leasable or
    /// capacity frees up.
    available: Notify,
}

struct PoolState {
    phase: LifecyclePhase,
    idle: VecDeque<WorkerController>,
    busy: HashMap<ControllerId, WorkerController>,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.busy.len()
    }
}

impl PoolCore {
    /// Return a controller to the idle set, trimming idle count back down to
    /// `max_spare_threads`. A recycle observed while the pool is shutting
    /// down resolves to termination, never to silent success.
    pub(crate) fn recycle(&self, controller: WorkerController) -> RecycleOutcome {
        let id = controller.id();
        let mut victims: Vec<WorkerController> = Vec::new();
        {
            let mut state = self.state.lock();
            state.busy.remove(&id);

            let pool_accepting = state.phase == LifecyclePhase::Started;
            let controller_usable = controller.phase() == LifecyclePhase::Started;
            if pool_accepting && controller_usable {
                state.idle.push_back(controller);
                while state.idle.len() > self.config.max_spare_threads {
                    if let Some(victim) = state.idle.pop_front() {
                        victims.push(victim);
                    }
                }
            } else {
                victims.push(controller);
            }
        }

        let outcome = if victims.iter().any(|v| v.id() == id) {
            RecycleOutcome::Terminated
        } else {
            RecycleOutcome::Kept
        };
        for victim in &victims {
            shutdown_controller(victim);
        }
        // Either an idle controller appeared or capacity was freed.
        self.available.notify_waiters();
        outcome
    }

    /// Drop a controller from the bookkeeping after its job failed. The
    /// controller's task exits on its own; only the sets are updated here.
    pub(crate) fn discard(&self, id: ControllerId) {
        {
            let mut state = self.state.lock();
            state.busy.remove(&id);
            state.idle.retain(|c| c.id() != id);
        }
        self.available.notify_waiters();
    }
}

fn shutdown_controller(controller: &WorkerController) {
    controller.inner.set_phase(LifecyclePhase::Destroying);
    controller.send_stop();
}

/// A lease-based pool of worker controllers.
#[derive(Clone)]
pub struct WorkerPool {
    core: Arc<PoolCore>,
    maintenance_stop: Arc<Notify>,
}

impl WorkerPool {
    /// Build a pool in the disabled phase. Spare bounds are clamped against
    /// `max_threads` here; call [`start`](Self::start) to pre-warm
    /// controllers and begin maintenance.
    pub fn new(config: PoolConfig) -> Self {
        let config = config.clamped();
        Self {
            core: Arc::new(PoolCore {
                config,
                state: Mutex::new(PoolState {
                    phase: LifecyclePhase::Disabled,
                    idle: VecDeque::new(),
                    busy: HashMap::new(),
                }),
                available: Notify::new(),
            }),
            maintenance_stop: Arc::new(Notify::new()),
        }
    }

    /// Move to the started phase, pre-warming `min_spare_threads` idle
    /// controllers and spawning the periodic maintenance pass. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.core.state.lock();
            if state.phase != LifecyclePhase::Disabled {
                tracing::warn!("pool start ignored in phase {}", state.phase);
                return;
            }
            state.phase = LifecyclePhase::Starting;
            for _ in 0..self.core.config.min_spare_threads {
                let controller = WorkerController::spawn(&self.core, self.core.config.daemon);
                state.idle.push_back(controller);
            }
            state.phase = LifecyclePhase::Started;
            tracing::info!(
                "worker pool started ({} spare, max {})",
                state.idle.len(),
                self.core.config.max_threads
            );
        }
        self.core.available.notify_waiters();
        self.spawn_maintenance_loop();
    }

    /// Non-blocking lease. Hands out an idle controller, or creates one if
    /// the pool is below capacity. Returns `None` when the pool is
    /// exhausted or no longer running; callers treat that as backpressure,
    /// not as an error.
    pub fn allocate(&self) -> Option<WorkerController> {
        let mut state = self.core.state.lock();
        if state.phase != LifecyclePhase::Started {
            return None;
        }
        if let Some(controller) = state.idle.pop_front() {
            state.busy.insert(controller.id(), controller.clone());
            return Some(controller);
        }
        if state.total() < self.core.config.max_threads {
            let controller = WorkerController::spawn(&self.core, self.core.config.daemon);
            state.busy.insert(controller.id(), controller.clone());
            tracing::debug!(
                "pool grew to {} controllers on allocate",
                state.total()
            );
            return Some(controller);
        }
        None
    }

    /// Blocking variant of [`allocate`](Self::allocate): waits until a
    /// controller becomes available, up to an optional timeout. Returns the
    /// `None` sentinel on timeout or once the pool stops.
    pub async fn compete(&self, timeout: Option<Duration>) -> Option<WorkerController> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.core.available.notified();
            tokio::pin!(notified);
            // Register the waiter before re-checking; `notify_waiters` only
            // reaches registered waiters, so a recycle landing between the
            // check and the wait would otherwise be lost.
            notified.as_mut().enable();
            if let Some(controller) = self.allocate() {
                return Some(controller);
            }
            if !self.is_running() {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Return a leased controller to the pool. Idle count is trimmed back
    /// down to `max_spare_threads`, and a recycle observed while the pool is
    /// shutting down terminates the controller instead of keeping it.
    pub fn recycle(&self, controller: WorkerController) {
        self.core.recycle(controller);
    }

    /// Remove a controller from whichever set holds it and drive it through
    /// its shutdown sequence. Other controllers are unaffected.
    pub fn terminate(&self, controller: &WorkerController) {
        let id = controller.id();
        {
            let mut state = self.core.state.lock();
            state.busy.remove(&id);
            state.idle.retain(|c| c.id() != id);
        }
        shutdown_controller(controller);
        self.core.available.notify_waiters();
        tracing::debug!("terminated controller {}", id);
    }

    /// One maintenance pass: grow the idle set by `inc_threads` when it has
    /// fallen below `min_spare_threads` (capped at `max_threads` total), or
    /// shrink it down to `max_spare_threads`. The periodic loop calls this;
    /// it is public so sizing behavior can be exercised directly.
    pub fn check_spare_controllers(&self) {
        let mut victims: Vec<WorkerController> = Vec::new();
        let mut grew = 0;
        {
            let mut state = self.core.state.lock();
            if state.phase != LifecyclePhase::Started {
                return;
            }
            let idle = state.idle.len();
            let config = &self.core.config;
            if idle < config.min_spare_threads {
                let headroom = config.max_threads - state.total();
                let want = config.inc_threads.min(headroom);
                for _ in 0..want {
                    let controller = WorkerController::spawn(&self.core, config.daemon);
                    state.idle.push_back(controller);
                }
                grew = want;
            } else if idle > config.max_spare_threads {
                while state.idle.len() > config.max_spare_threads {
                    match state.idle.pop_front() {
                        Some(victim) => victims.push(victim),
                        None => break,
                    }
                }
            }
        }

        if grew > 0 {
            tracing::debug!("maintenance grew pool by {grew} controllers");
            self.core.available.notify_waiters();
        }
        if !victims.is_empty() {
            tracing::debug!("maintenance trimmed {} idle controllers", victims.len());
            for victim in &victims {
                shutdown_controller(victim);
            }
        }
    }

    /// Stop accepting leases. Idle controllers are terminated immediately;
    /// busy controllers finish their current job and self-terminate on the
    /// recycle path.
    pub fn stop(&self) {
        let victims: Vec<WorkerController> = {
            let mut state = self.core.state.lock();
            if state.phase.is_shutting_down() {
                return;
            }
            state.phase = LifecyclePhase::Stopping;
            let victims = state.idle.drain(..).collect();
            state.phase = LifecyclePhase::Stopped;
            victims
        };
        tracing::info!(
            "worker pool stopping ({} idle terminated, {} busy draining)",
            victims.len(),
            self.stats().busy
        );
        for victim in &victims {
            shutdown_controller(victim);
        }
        self.maintenance_stop.notify_waiters();
        self.core.available.notify_waiters();
    }

    /// Full teardown: stop, then release every remaining controller. Busy
    /// controllers drain their current job before exiting.
    pub fn shutdown(&self) {
        self.stop();
        let busy: Vec<WorkerController> = {
            let mut state = self.core.state.lock();
            state.phase = LifecyclePhase::Destroying;
            state.busy.drain().map(|(_, c)| c).collect()
        };
        for controller in &busy {
            shutdown_controller(controller);
        }
        self.core.state.lock().phase = LifecyclePhase::Destroyed;
        tracing::info!("worker pool destroyed");
    }

    pub fn is_running(&self) -> bool {
        self.core.state.lock().phase.is_running()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.core.state.lock().phase
    }

    pub fn config(&self) -> &PoolConfig {
        &self.core.config
    }

    /// Point-in-time occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.core.state.lock();
        PoolStats {
            phase: state.phase,
            idle: state.idle.len(),
            busy: state.busy.len(),
            total: state.total(),
            max_threads: self.core.config.max_threads,
        }
    }

    fn spawn_maintenance_loop(&self) {
        let pool = self.clone();
        let stop = self.maintenance_stop.clone();
        tokio::spawn(async move {
            let mut ticker = interval(pool.core.config.maintenance_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !pool.is_running() {
                            break;
                        }
                        pool.check_spare_controllers();
                    }
                    _ = stop.notified() => break,
                }
            }
        });
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("WorkerPool")
            .field("phase", &stats.phase)
            .field("idle", &stats.idle)
            .field("busy", &stats.busy)
            .field("max_threads", &stats.max_threads)
            .finish()
    }
}
