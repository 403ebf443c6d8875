use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use workhorse_core::{PoolConfig, PoolResult};

use crate::scheduler::{TaskHandle, ThreadPool};
use crate::status::{TaskId, TaskStatus};
use crate::worker::{Packager, TaskFn};

/// One background worker, one task at a time.
///
/// The degenerate pool: size 1 and no queue. Running while a task is in
/// flight fails immediately with [`PoolError::Busy`](workhorse_core::PoolError::Busy).
pub struct SingleWorker<A: Send + 'static, R: Send + 'static> {
    pool: ThreadPool<A, R>,
    last: Mutex<Option<TaskId>>,
}

impl<A, R> SingleWorker<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Any `size` in `config` is overridden to 1.
    pub fn new<F, E>(config: PoolConfig, f: F) -> Self
    where
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        Self::from_pool(ThreadPool::new(config.with_size(1), f))
    }

    pub fn with_packager(
        config: PoolConfig,
        task: TaskFn<A, R>,
        packager: Arc<dyn Packager<A, R>>,
    ) -> Self {
        Self::from_pool(ThreadPool::with_packager(config.with_size(1), task, packager))
    }

    fn from_pool(pool: ThreadPool<A, R>) -> Self {
        Self {
            pool,
            last: Mutex::new(None),
        }
    }

    /// Start a task on the worker, spawning it on first use or after it
    /// was lost. Fails with `Spawn` if no worker can be started.
    pub fn run(&self, args: A) -> PoolResult<TaskHandle<R>> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = self.pool.try_submit(args)?;
        *last = Some(handle.id());
        Ok(handle)
    }

    /// Status of the most recent task; `Pending` before anything ran.
    pub fn status(&self) -> TaskStatus {
        self.last_task()
            .and_then(|id| self.pool.status(id))
            .unwrap_or(TaskStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        self.pool.running_count() > 0
    }

    /// Cancel the in-flight task, if any.
    pub fn kill(&self) -> bool {
        self.last_task().is_some_and(|id| self.pool.kill(id))
    }

    pub fn last_task(&self) -> Option<TaskId> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the worker. The next `run` spawns a fresh one.
    pub fn teardown(&self) {
        self.pool.teardown();
    }
}
