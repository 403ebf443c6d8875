//! Bounded worker pool with a FIFO pending queue.
//!
//! [`ThreadPool`] owns a fixed set of workers, a free list, the pending
//! queue and the task table. Submissions go straight to a free worker when
//! there is one and wait in the queue otherwise; a worker that finishes
//! drains the queue head before anything else can claim it.
//!
//! Split into focused submodules:
//! - `state`: bookkeeping plus dispatch, completion, kill and teardown logic
//! - `lifecycle`: lazy provisioning, teardown and the completion event loop
//! - `handle`: the caller-facing task future

mod handle;
mod lifecycle;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::warn;
use workhorse_core::{PoolConfig, PoolError, PoolResult};

pub use self::handle::TaskHandle;
use self::state::PoolState;
use crate::metrics::PoolMetrics;
use crate::status::{TaskId, TaskInfo, TaskStatus};
use crate::worker::{task_fn, Packager, TaskFn, ThreadPackager};

pub(crate) struct Shared<A, R> {
    config: PoolConfig,
    task: TaskFn<A, R>,
    packager: Arc<dyn Packager<A, R>>,
    state: Mutex<PoolState<A, R>>,
}

impl<A, R> Shared<A, R> {
    fn state(&self) -> MutexGuard<'_, PoolState<A, R>> {
        // Nothing panics while holding the lock; recover the data regardless.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Queue when no worker is free.
    Queue,
    /// Fail with `Busy` when no worker is free.
    RequireIdle,
}

impl<A, R> Shared<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn submit(self: &Arc<Self>, args: A, admission: Admission) -> PoolResult<TaskHandle<R>> {
        let mut state = self.state();
        self.provision_locked(&mut state)?;
        state.replenish(self.config.resolved_size());
        if state.workers.is_empty() {
            return Err(PoolError::Spawn("no worker could be spawned".to_string()));
        }
        if admission == Admission::RequireIdle && state.free.is_empty() {
            return Err(PoolError::Busy);
        }

        let id = state.next_id();
        let (reply, result) = oneshot::channel();
        state.admit(id, args, reply);
        if let Some(timeout) = self.config.timeout() {
            self.arm_timeout(&mut state, id, timeout);
        }
        Ok(TaskHandle::new(id, result))
    }

    /// Schedule the deadline for `id`. It runs from submission, so time spent
    /// in the queue counts against it.
    fn arm_timeout(
        self: &Arc<Self>,
        state: &mut PoolState<A, R>,
        id: TaskId,
        timeout: std::time::Duration,
    ) {
        let Some(runtime) = state.runtime.as_ref() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let shared = Arc::downgrade(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(id);
            }
        });

        match state.tasks.get_mut(&id) {
            Some(record) if !record.status.is_terminal() => {
                record.timeout = Some(timer.abort_handle());
            }
            _ => timer.abort(),
        }
    }

    fn expire(&self, id: TaskId) {
        if self.state().kill(id, TaskStatus::Timeout) {
            warn!(pool = %self.config.name, task = %id, "task timed out");
        }
    }
}

/// A bounded pool of parallel workers running one task function.
///
/// Workers are created lazily on the first submission and live until
/// [`teardown`](Self::teardown) (or drop). Tasks beyond the free capacity
/// wait in an unbounded FIFO queue. All methods take `&self`; share the
/// pool behind an `Arc` to submit from several places.
///
/// Provisioning must happen inside a Tokio runtime: completions and
/// timeouts are driven by tasks spawned on it.
pub struct ThreadPool<A: Send + 'static, R: Send + 'static> {
    shared: Arc<Shared<A, R>>,
}

impl<A, R> ThreadPool<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Pool running `f` on native threads.
    ///
    /// `f` must be pure: it may use only its arguments. Nothing is spawned
    /// or validated until the first submission.
    pub fn new<F, E>(config: PoolConfig, f: F) -> Self
    where
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let packager = Arc::new(ThreadPackager::new(config.name.clone()));
        Self::with_packager(config, task_fn(f), packager)
    }

    /// Pool whose workers come from a custom packager.
    pub fn with_packager(
        config: PoolConfig,
        task: TaskFn<A, R>,
        packager: Arc<dyn Packager<A, R>>,
    ) -> Self {
        let state = Mutex::new(PoolState::new(&config));
        Self {
            shared: Arc::new(Shared {
                config,
                task,
                packager,
                state,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Create the workers now instead of on first submission. Idempotent.
    pub fn provision(&self) -> PoolResult<()> {
        let mut state = self.shared.state();
        self.shared.provision_locked(&mut state)
    }

    /// Submit a task. Never blocks: the task starts on a free worker or
    /// waits in the queue. Workers lost to failed respawns are replaced
    /// first; fails if the pool cannot be provisioned or no worker can be
    /// spawned at all.
    pub fn submit(&self, args: A) -> PoolResult<TaskHandle<R>> {
        self.shared.submit(args, Admission::Queue)
    }

    /// Like [`submit`](Self::submit), but fails with [`PoolError::Busy`]
    /// instead of queueing when every worker is occupied.
    pub fn try_submit(&self, args: A) -> PoolResult<TaskHandle<R>> {
        self.shared.submit(args, Admission::RequireIdle)
    }

    /// Cancel a pending or running task; its future fails with
    /// [`PoolError::Cancelled`]. A running task costs its worker, which is
    /// replaced with a fresh one. Returns false for unknown or finished tasks.
    pub fn kill(&self, id: TaskId) -> bool {
        self.kill_with(id, TaskStatus::Killed)
    }

    /// Cancel with an explicit terminal status (`Killed`, `Timeout` or `Error`).
    pub fn kill_with(&self, id: TaskId, status: TaskStatus) -> bool {
        self.shared.state().kill(id, status)
    }

    /// Status of a task, if it is still known to the pool.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.shared.state().tasks.get(&id).map(|record| record.status)
    }

    pub fn task_info(&self, id: TaskId) -> Option<TaskInfo> {
        self.shared.state().tasks.get(&id).map(|record| record.info(id))
    }

    pub fn free_count(&self) -> usize {
        self.shared.state().free.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.state().running_count()
    }

    /// Workers currently provisioned (0 before the first submission).
    pub fn pool_size(&self) -> usize {
        self.shared.state().workers.len()
    }

    pub fn is_provisioned(&self) -> bool {
        self.shared.state().is_provisioned()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.shared.state().metrics.clone()
    }

    /// Terminate all workers, reject outstanding tasks with
    /// [`PoolError::PoolCleared`] and release the packaged task function.
    /// Idempotent; a later submission provisions a fresh set of workers.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

impl<A: Send + 'static, R: Send + 'static> Drop for ThreadPool<A, R> {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}
