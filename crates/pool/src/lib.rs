//! Bounded worker pool: runs a pure task function on parallel workers,
//! queues work when every worker is busy, and supports per-task kill and
//! timeout.

pub mod metrics;
pub mod scheduler;
pub mod single;
pub mod status;
pub mod worker;

pub use metrics::PoolMetrics;
pub use scheduler::{TaskHandle, ThreadPool};
pub use single::SingleWorker;
pub use status::{TaskId, TaskInfo, TaskStatus};
pub use worker::{
    task_fn, EventSender, Outcome, Packager, TaskFn, ThreadPackager, WorkerEvent, WorkerHandle,
    WorkerId, WorkerSource,
};
pub use workhorse_core::{ErrorKind, PoolConfig, PoolError, PoolResult};
