//! Task execution for container lifecycles.
//!
//! The controller never runs its lifecycle on the caller's thread: starts,
//! satisfaction changes and timeouts are submitted to a [`Scheduler`].
//! [`TokioScheduler`] runs tasks on the blocking pool of a tokio runtime,
//! since lifecycle steps construct components and may block on dynamic
//! references.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{DiError, DiResult};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks now or after a delay.
pub trait Scheduler: Send + Sync {
    fn execute(&self, task: Task);

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// A delayed task that can be cancelled before it runs.
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    pub fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        ScheduledTask { cancelled, abort }
    }

    /// Returns true for the call that actually cancelled the task.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(abort) = &self.abort {
            abort.abort();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

static SHARED_RUNTIME: Lazy<std::io::Result<Runtime>> = Lazy::new(|| {
    Builder::new_multi_thread()
        .thread_name("blueprint")
        .enable_time()
        .build()
});

/// [`Scheduler`] backed by a tokio runtime handle.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        TokioScheduler { handle }
    }

    /// Scheduler on a process-wide runtime created on first use.
    pub fn shared() -> DiResult<Self> {
        match &*SHARED_RUNTIME {
            Ok(runtime) => Ok(TokioScheduler::new(runtime.handle().clone())),
            Err(e) => Err(DiError::IllegalState(format!(
                "unable to start scheduler runtime: {e}"
            ))),
        }
    }

    /// Scheduler on the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(TokioScheduler::new)
    }
}

impl Scheduler for TokioScheduler {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }

    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = self.handle.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.load(Ordering::SeqCst) {
                trace!("scheduled task cancelled before running");
                return;
            }
            handle.spawn_blocking(task);
        });
        ScheduledTask::new(cancelled, Some(join.abort_handle()))
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn executes_and_schedules_tasks() {
        let scheduler = TokioScheduler::shared().unwrap();
        let (tx, rx) = mpsc::channel();
        let immediate = tx.clone();
        scheduler.execute(Box::new(move || immediate.send("now").unwrap()));
        let task = scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || tx.send("later").unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "now");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "later");
        assert!(task.cancel());
    }

    #[test]
    fn cancelled_task_never_runs() {
        let scheduler = TokioScheduler::shared().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let task = scheduler.schedule(Duration::from_millis(50), Box::new(move || tx.send(()).unwrap()));
        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
