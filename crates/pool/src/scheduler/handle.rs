use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use workhorse_core::{PoolError, PoolResult};

use crate::status::TaskId;

/// Future resolving to a submitted task's result.
///
/// Dropping the handle does not cancel the task; use
/// [`ThreadPool::kill`](super::ThreadPool::kill) for that.
#[derive(Debug)]
pub struct TaskHandle<R> {
    id: TaskId,
    result: oneshot::Receiver<PoolResult<R>>,
}

impl<R> TaskHandle<R> {
    pub(super) fn new(id: TaskId, result: oneshot::Receiver<PoolResult<R>>) -> Self {
        Self { id, result }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<R> Future for TaskHandle<R> {
    type Output = PoolResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the record went away with the pool.
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PoolError::PoolCleared)))
    }
}
