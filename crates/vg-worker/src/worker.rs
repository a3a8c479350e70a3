//! The single-writer actor primitive (spec §5): each worker owns a FIFO
//! queue of callables and never shares mutable state other than through
//! that queue. `sync` submission waits for the result, inlining the call
//! when already running on the target worker to avoid self-deadlock;
//! `async` (here named `cast` to avoid the keyword) is fire-and-forget and
//! routes uncaught failures through a `FailureMuter`.

use crate::failure_muter::{FailureLogAction, FailureMuter};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use vg_error::{ErrorCode, VgError};

/// Identity of a worker, used to detect "already running on this worker".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

impl WorkerId {
    fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

tokio::task_local! {
    static CURRENT_WORKER: WorkerId;
}

/// Returns the id of the worker currently executing on this task, if any.
fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.try_with(|id| *id).ok()
}

type CallJob = Box<dyn FnOnce() + Send + 'static>;
type CastJob = Box<dyn FnOnce() -> Result<(), VgError> + Send + 'static>;

enum Job {
    Call(CallJob),
    Cast(CastJob),
}

/// A running worker: owns the receiving half of its mailbox and drives its
/// FIFO loop to completion on a spawned task.
pub struct Worker {
    id: WorkerId,
    name: &'static str,
    join: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker named `name` (used only for log targets) and return
    /// both it and a cloneable handle to submit work to it.
    pub fn spawn(name: &'static str) -> (Self, WorkerHandle) {
        let id = WorkerId::next();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let muter = Arc::new(FailureMuter::new());
        let muter_for_loop = Arc::clone(&muter);

        let join = tokio::spawn(CURRENT_WORKER.scope(id, async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Call(f) => f(),
                    Job::Cast(f) => run_cast(name, &muter_for_loop, f),
                }
            }
        }));

        let worker = Worker { id, name, join };
        let handle = WorkerHandle { id, name, tx, muter };
        (worker, handle)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the worker's loop to exit (after its mailbox is closed and
    /// drained). Cooperative shutdown: the loop exits on its own once every
    /// `WorkerHandle` is dropped or [`WorkerHandle::shutdown`] is called.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

fn run_cast(name: &'static str, muter: &FailureMuter, f: CastJob) {
    match f() {
        Ok(()) => muter.record_success(),
        Err(err) => match muter.record_failure() {
            FailureLogAction::Detail => {
                error!(target: "vg.runtime", worker = name, error = %err, "worker task failed");
            }
            FailureLogAction::MuteWarning => {
                warn!(
                    target: "vg.runtime", worker = name,
                    "worker task failed again; further consecutive failures will be muted"
                );
            }
            FailureLogAction::Summary => {
                warn!(
                    target: "vg.runtime", worker = name, total_failures = muter.total_failures(),
                    "worker has accumulated a large number of failures"
                );
            }
            FailureLogAction::Silent => {}
        },
    }
}

/// A cloneable handle for submitting work to a [`Worker`]'s mailbox.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    muter: Arc<FailureMuter>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `true` if this call is already executing on the worker this handle
    /// targets (i.e. a nested `call`/`cast` from inside a job it's running).
    pub fn is_current(&self) -> bool {
        current_worker() == Some(self.id)
    }

    /// Submits `f` and waits for its result. Runs inline, without going
    /// through the queue, when already executing on this worker — the
    /// spec's self-deadlock avoidance rule.
    pub async fn call<F, T>(&self, f: F) -> Result<T, VgError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job::Call(Box::new(move || {
            let _ = reply_tx.send(f());
        }));
        self.tx
            .send(job)
            .map_err(|_| closed_error(self.name))?;
        reply_rx.await.map_err(|_| closed_error(self.name))
    }

    /// Fire-and-forget submission. `f`'s failure is routed through this
    /// worker's [`FailureMuter`] rather than returned to the caller; when
    /// already on this worker it still runs inline (synchronously) so
    /// ordering relative to the caller's own queue position is preserved.
    pub fn cast<F>(&self, f: F) -> Result<(), VgError>
    where
        F: FnOnce() -> Result<(), VgError> + Send + 'static,
    {
        if self.is_current() {
            run_cast(self.name, &self.muter, Box::new(f));
            return Ok(());
        }
        self.tx
            .send(Job::Cast(Box::new(f)))
            .map_err(|_| closed_error(self.name))
    }

    /// Drops this clone of the mailbox sender. The worker's loop exits,
    /// after draining any callables already queued, once every clone of
    /// every handle to it has been dropped — the spec's cooperative
    /// shutdown rule.
    pub fn shutdown(self) {
        drop(self);
    }

    pub fn total_failures(&self) -> u64 {
        self.muter.total_failures()
    }
}

fn closed_error(worker: &str) -> VgError {
    VgError::new(ErrorCode::ProgramRaised, format!("worker `{worker}` has shut down"))
        .with_context("worker", worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn call_returns_the_closures_value() {
        let (worker, handle) = Worker::spawn("test");
        let result = handle.call(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
        handle.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn nested_call_on_same_worker_runs_inline() {
        let (worker, handle) = Worker::spawn("test");
        let inner_handle = handle.clone();
        let ran_inline = Arc::new(AtomicBool::new(false));
        let ran_inline_check = Arc::clone(&ran_inline);

        handle
            .call(move || {
                assert!(inner_handle.is_current());
                ran_inline_check.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(ran_inline.load(Ordering::SeqCst));
        handle.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn cast_failure_is_muted_after_three_and_not_propagated() {
        let (worker, handle) = Worker::spawn("test");
        for _ in 0..5 {
            handle
                .cast(|| Err(VgError::new(ErrorCode::ProgramRaised, "boom")))
                .unwrap();
        }
        // drain the queue
        handle.call(|| ()).await.unwrap();
        assert_eq!(handle.total_failures(), 5);
        handle.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn cast_success_does_not_count_as_failure() {
        let (worker, handle) = Worker::spawn("test");
        handle.cast(|| Ok(())).unwrap();
        handle.call(|| ()).await.unwrap();
        assert_eq!(handle.total_failures(), 0);
        handle.shutdown();
        worker.join().await;
    }
}
