//! Schedule service: one-shot delay, fixed-rate, fixed-delay and cron-based
//! submission over a leased worker pool.
//!
//! Each accepted submission spawns one timer task that sleeps to the fire
//! time, leases a controller (blocking on pool exhaustion rather than
//! dropping work), executes the job, and re-arms or finishes. Re-arming for
//! a handle is sequential: the next fire time is only computed after the
//! current execution completes, so a slow run delays but never overlaps the
//! next one for the same handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, Notify};

use crate::config::PoolConfig;
use crate::cron::CronEntry;
use crate::pool::{Job, WorkerPool};
use crate::types::{HandleId, RuntimeResult, ScheduleError, TaskState};

mod handle;

pub use handle::{Repeat, ScheduledHandle};

/// Facade binding the cron engine and the worker pool into a single
/// scheduling surface.
pub struct ScheduleService {
    pool: Arc<WorkerPool>,
    handles: Arc<DashMap<HandleId, ScheduledHandle>>,
    shutdown_notify: Arc<Notify>,
    is_running: Arc<RwLock<bool>>,
}

impl ScheduleService {
    /// Create a service over a freshly started pool. Must be called from
    /// within a tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config));
        pool.start();
        Self::with_pool(pool)
    }

    /// Create a service over an externally managed (already started) pool.
    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            handles: Arc::new(DashMap::new()),
            shutdown_notify: Arc::new(Notify::new()),
            is_running: Arc::new(RwLock::new(true)),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Execute `job` once after `delay`.
    pub fn schedule_once<J: Job>(&self, job: J, delay: Duration) -> RuntimeResult<ScheduledHandle> {
        let fire = advance(Utc::now(), delay);
        self.submit(Arc::new(job), fire, Repeat::None)
    }

    /// Execute `job` repeatedly, each fire time anchored to the previous
    /// scheduled time (`scheduled + period`). Overruns compress gaps.
    pub fn schedule_at_fixed_rate<J: Job>(
        &self,
        job: J,
        initial_delay: Duration,
        period: Duration,
    ) -> RuntimeResult<ScheduledHandle> {
        let fire = advance(Utc::now(), initial_delay);
        self.submit(Arc::new(job), fire, Repeat::FixedRate(period))
    }

    /// Execute `job` repeatedly, each fire time anchored to the previous
    /// completion (`completion + delay`). Never compresses gaps.
    pub fn schedule_with_fixed_delay<J: Job>(
        &self,
        job: J,
        initial_delay: Duration,
        delay: Duration,
    ) -> RuntimeResult<ScheduledHandle> {
        let fire = advance(Utc::now(), initial_delay);
        self.submit(Arc::new(job), fire, Repeat::FixedDelay(delay))
    }

    /// Execute `job` on the schedule described by a cron expression; see the
    /// [`cron`](crate::cron) module for the grammar. Repeats until
    /// cancelled. A malformed expression fails here, at submission.
    pub fn schedule_cron<J: Job>(
        &self,
        job: J,
        expression: &str,
    ) -> RuntimeResult<ScheduledHandle> {
        let entry = CronEntry::parse(expression)?;
        let fire = entry
            .next_running_time(Utc::now())
            .ok_or_else(|| crate::types::CronError::NoUpcomingMatch {
                expression: expression.to_string(),
            })?;
        self.submit(Arc::new(job), fire, Repeat::Cron(entry))
    }

    /// Cancel a handle through the service registry.
    pub fn cancel(&self, handle_id: HandleId) -> RuntimeResult<()> {
        match self.handles.get(&handle_id) {
            Some(entry) => {
                entry.value().cancel();
                Ok(())
            }
            None => Err(ScheduleError::HandleNotFound { handle_id }.into()),
        }
    }

    /// Number of submissions whose timer task is still alive.
    pub fn active_handles(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every live handle and tear down the pool. Idempotent.
    pub async fn shutdown(&self) {
        {
            let is_running = self.is_running.read();
            if !*is_running {
                return;
            }
        }
        *self.is_running.write() = false;

        for entry in self.handles.iter() {
            entry.value().cancel();
        }
        self.shutdown_notify.notify_waiters();
        self.pool.shutdown();
        tracing::info!("schedule service shutdown complete");
    }

    fn submit(
        &self,
        job: Arc<dyn Job>,
        fire: DateTime<Utc>,
        repeat: Repeat,
    ) -> RuntimeResult<ScheduledHandle> {
        if !*self.is_running.read() {
            return Err(ScheduleError::ShuttingDown.into());
        }

        let handle = ScheduledHandle::new();
        handle.mark_scheduled(fire);
        self.handles.insert(handle.id(), handle.clone());

        tracing::debug!(
            "scheduled handle {} (repeat: {:?}), first fire at {}",
            handle.id(),
            repeat,
            fire
        );

        let timer = TimerTask {
            pool: self.pool.clone(),
            handles: self.handles.clone(),
            shutdown: self.shutdown_notify.clone(),
            handle: handle.clone(),
            job,
            repeat,
        };
        tokio::spawn(timer.run(fire));

        Ok(handle)
    }
}

impl std::fmt::Debug for ScheduleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleService")
            .field("active_handles", &self.handles.len())
            .field("is_running", &*self.is_running.read())
            .finish()
    }
}

/// The drive loop behind one scheduled handle.
struct TimerTask {
    pool: Arc<WorkerPool>,
    handles: Arc<DashMap<HandleId, ScheduledHandle>>,
    shutdown: Arc<Notify>,
    handle: ScheduledHandle,
    job: Arc<dyn Job>,
    repeat: Repeat,
}

impl TimerTask {
    async fn run(self, mut fire: DateTime<Utc>) {
        loop {
            let wait = (fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.notified() => break,
            }

            // Checked at fire time, not just at re-arm time: a cancel racing
            // with "about to fire" turns this firing into a no-op.
            if self.handle.state() == TaskState::Cancelled {
                tracing::debug!("handle {} fired after cancel, skipping", self.handle.id());
                break;
            }

            // Lease a controller, blocking if the pool is saturated.
            // Scheduled work is not silently dropped under exhaustion; only
            // a pool shutdown resolves the lease to the sentinel.
            let Some(controller) = self.pool.compete(None).await else {
                tracing::debug!(
                    "pool stopped, abandoning handle {}",
                    self.handle.id()
                );
                break;
            };

            let scheduled_at = fire;
            let (done_tx, done_rx) = oneshot::channel();
            let wrapped = Arc::new(SignalingJob {
                inner: self.job.clone(),
                done: Mutex::new(Some(done_tx)),
            });
            if let Err(err) = controller.execute(wrapped) {
                tracing::error!(
                    "handle {}: leased controller rejected job: {}",
                    self.handle.id(),
                    err
                );
                self.pool.recycle(controller);
                self.handle.mark_failed();
                break;
            }

            // A dropped sender (panicked body) reads as failure.
            let succeeded = done_rx.await.unwrap_or(false);
            let completed_at = Utc::now();

            if !succeeded {
                if matches!(self.repeat, Repeat::None) {
                    // One-shot: executed, with failure.
                    self.handle.mark_executed();
                } else {
                    tracing::warn!(
                        "handle {}: execution failed, no further runs",
                        self.handle.id()
                    );
                    self.handle.mark_failed();
                }
                break;
            }

            let next = match &self.repeat {
                Repeat::None => {
                    self.handle.mark_executed();
                    None
                }
                Repeat::FixedRate(period) => Some(advance(scheduled_at, *period)),
                Repeat::FixedDelay(delay) => Some(advance(completed_at, *delay)),
                Repeat::Cron(entry) => match entry.next_running_time(Utc::now()) {
                    Some(at) => Some(at),
                    None => {
                        tracing::warn!(
                            "handle {}: cron '{}' has no further fire times",
                            self.handle.id(),
                            entry
                        );
                        self.handle.mark_executed();
                        None
                    }
                },
            };

            let Some(next_fire) = next else { break };
            // Cancellation is re-checked before every re-arm.
            if !self.handle.mark_scheduled(next_fire) {
                break;
            }
            fire = next_fire;
        }

        self.handles.remove(&self.handle.id());
    }
}

/// Wraps a submitted job to report completion back to the timer task while
/// the controller applies its own recycle/terminate rules.
struct SignalingJob {
    inner: Arc<dyn Job>,
    done: Mutex<Option<oneshot::Sender<bool>>>,
}

#[async_trait]
impl Job for SignalingJob {
    async fn run(&self) -> anyhow::Result<()> {
        let result = self.inner.run().await;
        if let Some(tx) = self.done.lock().take() {
            let _ = tx.send(result.is_ok());
        }
        result
    }

    async fn teardown(&self) {
        self.inner.teardown().await;
    }
}

/// `base + by`, saturating instead of overflowing for absurd durations.
fn advance(base: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(by) {
        Ok(by) => base + by,
        Err(_) => DateTime::<Utc>::MAX_UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct RecordingJob {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for RecordingJob {
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("induced failure");
            }
            Ok(())
        }
    }

    fn make_service() -> ScheduleService {
        ScheduleService::new(PoolConfig {
            min_spare_threads: 1,
            max_spare_threads: 2,
            max_threads: 4,
            inc_threads: 1,
            ..PoolConfig::default()
        })
    }

    #[tokio::test]
    #[serial]
    async fn one_shot_runs_once_and_completes() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_once(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(handle.state(), TaskState::Scheduled);
        assert!(handle.next_execution_time().is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), TaskState::Executed);
        assert_eq!(handle.next_execution_time(), None);
        assert_eq!(service.active_handles(), 0);
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn fixed_delay_repeats_until_cancelled() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_with_fixed_delay(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                Duration::from_millis(20),
                Duration::from_millis(40),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several repetitions, saw {seen}");

        assert!(handle.cancel());
        tokio::time::sleep(Duration::from_millis(150)).await;
        let frozen = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), frozen, "cancel stops re-arming");
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn fixed_rate_keeps_the_schedule_anchor() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_at_fixed_rate(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                Duration::from_millis(20),
                Duration::from_millis(50),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(runs.load(Ordering::SeqCst) >= 4);
        handle.cancel();
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn failing_repeating_task_runs_exactly_once() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_with_fixed_delay(
                RecordingJob {
                    runs: runs.clone(),
                    fail: true,
                },
                Duration::from_millis(20),
                Duration::from_millis(30),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1, "failed task never re-arms");
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(handle.next_execution_time(), None);
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn one_shot_failure_reads_executed() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_once(
                RecordingJob {
                    runs: runs.clone(),
                    fail: true,
                },
                Duration::from_millis(20),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), TaskState::Executed);
        assert_eq!(handle.next_execution_time(), None);
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn cancel_before_first_fire_suppresses_execution() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_once(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                Duration::from_millis(100),
            )
            .unwrap();
        assert!(handle.cancel());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0, "queued fire became a no-op");
        assert_eq!(service.active_handles(), 0);
        service.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn cron_submission_fires_on_the_second() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        // Three fields: second minute hour, all wildcards: fires every second.
        let handle = service
            .schedule_cron(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                "* * *",
            )
            .unwrap();
        assert_eq!(handle.state(), TaskState::Scheduled);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1, "cron fired at least once, saw {seen}");
        assert_eq!(handle.state(), TaskState::Scheduled, "cron keeps re-arming");

        handle.cancel();
        service.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_cron_fails_at_submission() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let good = service.schedule_cron(
            RecordingJob {
                runs: runs.clone(),
                fail: false,
            },
            "0 0 3",
        );
        let handle = assert_ok!(good);
        handle.cancel();

        let bad = service.schedule_cron(RecordingJob { runs, fail: false }, "not-cron");
        assert_err!(bad);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_by_id_and_unknown_handles() {
        let service = make_service();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = service
            .schedule_once(
                RecordingJob {
                    runs: runs.clone(),
                    fail: false,
                },
                Duration::from_secs(60),
            )
            .unwrap();
        service.cancel(handle.id()).unwrap();
        assert!(handle.is_cancelled());

        let missing = service.cancel(HandleId::new());
        assert!(missing.is_err());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_refuses_new_work() {
        let service = make_service();
        service.shutdown().await;
        service.shutdown().await;

        let runs = Arc::new(AtomicUsize::new(0));
        let result = service.schedule_once(RecordingJob { runs, fail: false }, Duration::ZERO);
        assert!(matches!(
            result,
            Err(crate::types::RuntimeError::Schedule(
                ScheduleError::ShuttingDown
            ))
        ));
    }
}
