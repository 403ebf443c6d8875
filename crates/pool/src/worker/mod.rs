//! Worker abstraction.
//!
//! The scheduler never touches an execution unit directly. A [`Packager`]
//! turns the task function into a [`WorkerSource`] once per pool, the source
//! spawns [`WorkerHandle`]s, and every handle reports outcomes as
//! [`WorkerEvent`]s on the channel it was spawned with.
//!
//! Task functions must be pure: they see only their arguments and must not
//! reach into shared mutable state. This is a caller obligation; the pool
//! does not enforce it.

pub mod thread;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use workhorse_core::{PoolError, PoolResult};

use crate::status::TaskId;

pub use thread::{ThreadPackager, ThreadSource, ThreadWorker};

/// Type-erased task body shared by every worker of a pool.
pub type TaskFn<A, R> = Arc<dyn Fn(A) -> Result<R, String> + Send + Sync>;

/// Wrap a fallible function as a [`TaskFn`], rendering its error as text.
pub fn task_fn<A, R, E, F>(f: F) -> TaskFn<A, R>
where
    F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    E: fmt::Display,
{
    Arc::new(move |args| f(args).map_err(|e| e.to_string()))
}

/// Result of one task run as reported by a worker.
#[derive(Debug)]
pub enum Outcome<R> {
    Success(R),
    Failure(PoolError),
}

impl<R> Outcome<R> {
    pub fn into_result(self) -> PoolResult<R> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(err),
        }
    }
}

/// Slot identifier of a worker within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub(crate) usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Completion report from a worker.
#[derive(Debug)]
pub struct WorkerEvent<R> {
    pub worker: WorkerId,
    pub task: TaskId,
    pub outcome: Outcome<R>,
}

pub type EventSender<R> = mpsc::UnboundedSender<WorkerEvent<R>>;
pub type EventReceiver<R> = mpsc::UnboundedReceiver<WorkerEvent<R>>;

/// Turns a task function plus its dependency references into something
/// workers can be spawned from. Called once per provisioning.
pub trait Packager<A, R>: Send + Sync {
    fn package(
        &self,
        task: TaskFn<A, R>,
        dependencies: &[String],
    ) -> PoolResult<Arc<dyn WorkerSource<A, R>>>;

    /// Release whatever backs the source. Called exactly once per
    /// successful `package`.
    fn dispose(&self, source: &dyn WorkerSource<A, R>);
}

/// A packaged task function, shared read-only by all workers of a pool.
pub trait WorkerSource<A, R>: Send + Sync {
    fn spawn(&self, id: WorkerId, events: EventSender<R>) -> PoolResult<Box<dyn WorkerHandle<A>>>;

    fn dependencies(&self) -> &[String];
}

/// One parallel execution unit. Busy/free state is tracked by the scheduler.
pub trait WorkerHandle<A>: Send {
    fn id(&self) -> WorkerId;

    /// Start running `task` with `args`. The outcome arrives later as a
    /// [`WorkerEvent`] tagged with the same task id.
    fn send(&mut self, task: TaskId, args: A) -> PoolResult<()>;

    /// Stop accepting work and release the unit. In-flight computation may
    /// run on, but its outcome must be treated as stale.
    fn terminate(&mut self);
}
