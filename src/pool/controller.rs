//! Worker controller: one reusable execution unit bound to a dedicated
//! background task.
//!
//! A controller owns a single-slot mailbox. Its task blocks on the empty
//! mailbox and wakes exactly once per bound job; after running the job it
//! reports back to its pool exactly once, either `recycle` (success) or
//! terminate (failure), and a pure idle wake during shutdown reports
//! nothing.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{PoolCore, RecycleOutcome};
use crate::types::{ControllerId, LifecyclePhase, PoolError};

/// A unit of work executed on a leased controller.
///
/// The pool does not inspect the work beyond success or failure: an `Err`
/// return (or a panic) marks the executing controller unfit for reuse and
/// stops any repetition for the submitting handle. The failure itself is
/// logged, never propagated to an unrelated caller.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;

    /// Optional teardown hook, invoked after every execution whether the run
    /// succeeded or failed.
    async fn teardown(&self) {}
}

pub(crate) enum Directive {
    Run(Arc<dyn Job>),
    Stop,
}

/// Cheap cloneable handle over one controller.
#[derive(Clone)]
pub struct WorkerController {
    pub(crate) inner: Arc<ControllerCore>,
}

pub(crate) struct ControllerCore {
    id: ControllerId,
    phase: RwLock<LifecyclePhase>,
    mailbox: mpsc::Sender<Directive>,
    /// Back-reference only; the pool owns its controllers, not the reverse.
    pool: Weak<PoolCore>,
    daemon: bool,
}

impl ControllerCore {
    pub(crate) fn phase(&self) -> LifecyclePhase {
        *self.phase.read()
    }

    pub(crate) fn set_phase(&self, phase: LifecyclePhase) {
        *self.phase.write() = phase;
    }
}

impl WorkerController {
    /// Create a controller owned by `pool` and start its run loop. Must be
    /// called from within a tokio runtime.
    pub(crate) fn spawn(pool: &Arc<PoolCore>, daemon: bool) -> Self {
        let (mailbox, rx) = mpsc::channel(1);
        let core = Arc::new(ControllerCore {
            id: ControllerId::new(),
            phase: RwLock::new(LifecyclePhase::Initializing),
            mailbox,
            pool: Arc::downgrade(pool),
            daemon,
        });
        core.set_phase(LifecyclePhase::Starting);
        // The mailbox buffers a job bound before the loop is polled, so the
        // controller is leasable as soon as this returns.
        core.set_phase(LifecyclePhase::Started);
        tokio::spawn(run_loop(core.clone(), rx));
        Self { inner: core }
    }

    pub fn id(&self) -> ControllerId {
        self.inner.id
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.inner.phase()
    }

    pub fn is_daemon(&self) -> bool {
        self.inner.daemon
    }

    /// Bind a job to this controller and wake its task.
    ///
    /// Rejects with [`PoolError::ControllerBusy`] if a previous job is still
    /// bound. Under the allocate/compete contract a leased controller is
    /// never handed to two submitters, so hitting that error indicates a
    /// pool programming error, not a caller mistake.
    pub fn execute(&self, job: Arc<dyn Job>) -> Result<(), PoolError> {
        let phase = self.inner.phase();
        if phase != LifecyclePhase::Started {
            return Err(PoolError::ControllerUnavailable {
                controller_id: self.inner.id,
                phase,
            });
        }
        match self.inner.mailbox.try_send(Directive::Run(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PoolError::ControllerBusy {
                controller_id: self.inner.id,
            }),
            Err(TrySendError::Closed(_)) => Err(PoolError::ControllerUnavailable {
                controller_id: self.inner.id,
                phase: self.inner.phase(),
            }),
        }
    }

    /// Queue a stop directive. Best effort: a controller mid-run drains its
    /// current job first and observes its shutdown phase on the recycle
    /// path instead.
    pub(crate) fn send_stop(&self) {
        let _ = self.inner.mailbox.try_send(Directive::Stop);
    }
}

impl std::fmt::Debug for WorkerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerController")
            .field("id", &self.inner.id)
            .field("phase", &self.inner.phase())
            .field("daemon", &self.inner.daemon)
            .finish()
    }
}

/// One cooperative cycle per wake: run the bound job, report recycle or
/// terminate to the pool, go back to waiting.
async fn run_loop(core: Arc<ControllerCore>, mut rx: mpsc::Receiver<Directive>) {
    tracing::debug!(
        "controller {} started (daemon: {})",
        core.id,
        core.daemon
    );

    while let Some(directive) = rx.recv().await {
        match directive {
            Directive::Run(job) => {
                let outcome = std::panic::AssertUnwindSafe(job.run())
                    .catch_unwind()
                    .await;
                // Teardown runs unconditionally, success or failure.
                if std::panic::AssertUnwindSafe(job.teardown())
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    tracing::warn!("controller {}: job teardown panicked", core.id);
                }

                let failed = match outcome {
                    Ok(Ok(())) => false,
                    Ok(Err(err)) => {
                        tracing::warn!("controller {}: job failed: {err:#}", core.id);
                        true
                    }
                    Err(_) => {
                        tracing::error!("controller {}: job panicked", core.id);
                        true
                    }
                };

                let Some(pool) = core.pool.upgrade() else {
                    break;
                };

                if failed {
                    // A task state left behind by an uncaught failure is not
                    // trusted for reuse.
                    pool.discard(core.id);
                    break;
                }
                let handle = WorkerController { inner: core.clone() };
                if pool.recycle(handle) == RecycleOutcome::Terminated {
                    break;
                }
            }
            Directive::Stop => break,
        }
    }

    core.set_phase(LifecyclePhase::Destroyed);
    tracing::debug!("controller {} destroyed", core.id);
}
