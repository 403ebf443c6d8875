//! Native-thread worker backend.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};
use workhorse_core::{PoolError, PoolResult};

use super::{
    EventSender, Outcome, Packager, TaskFn, WorkerEvent, WorkerHandle, WorkerId, WorkerSource,
};
use crate::status::TaskId;

/// Packages task functions for execution on dedicated OS threads.
#[derive(Debug, Clone)]
pub struct ThreadPackager {
    name: String,
}

impl ThreadPackager {
    /// `name` prefixes every worker thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl<A, R> Packager<A, R> for ThreadPackager
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn package(
        &self,
        task: TaskFn<A, R>,
        dependencies: &[String],
    ) -> PoolResult<Arc<dyn WorkerSource<A, R>>> {
        if let Some(pos) = dependencies.iter().position(|d| d.trim().is_empty()) {
            return Err(PoolError::Configuration(format!("dependency #{pos} is empty")));
        }
        debug!(pool = %self.name, dependencies = dependencies.len(), "packaged task function");
        Ok(Arc::new(ThreadSource {
            name: self.name.clone(),
            task,
            dependencies: dependencies.to_vec(),
        }))
    }

    fn dispose(&self, source: &dyn WorkerSource<A, R>) {
        debug!(
            pool = %self.name,
            dependencies = source.dependencies().len(),
            "released packaged task function"
        );
    }
}

/// Task function packaged for thread workers.
pub struct ThreadSource<A, R> {
    name: String,
    task: TaskFn<A, R>,
    dependencies: Vec<String>,
}

impl<A, R> WorkerSource<A, R> for ThreadSource<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn spawn(&self, id: WorkerId, events: EventSender<R>) -> PoolResult<Box<dyn WorkerHandle<A>>> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<(TaskId, A)>();
        let task = Arc::clone(&self.task);

        let thread = thread::Builder::new()
            .name(format!("{}-{}", self.name, id))
            .spawn(move || run_jobs(id, task, jobs_rx, events))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        trace!(worker = %id, dependencies = ?self.dependencies, "spawned worker thread");
        Ok(Box::new(ThreadWorker {
            id,
            jobs: Some(jobs_tx),
            thread: Some(thread),
        }))
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Worker loop: one job at a time until the job channel closes or nobody
/// listens for outcomes anymore.
fn run_jobs<A, R>(
    id: WorkerId,
    task: TaskFn<A, R>,
    jobs: mpsc::Receiver<(TaskId, A)>,
    events: EventSender<R>,
) {
    while let Ok((task_id, args)) = jobs.recv() {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(args))) {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(message)) => Outcome::Failure(PoolError::WorkerFault(message)),
            Err(payload) => Outcome::Failure(PoolError::WorkerFault(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        let event = WorkerEvent {
            worker: id,
            task: task_id,
            outcome,
        };
        if events.send(event).is_err() {
            break;
        }
    }
    trace!(worker = %id, "worker thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a worker thread.
///
/// Threads cannot be killed from outside: `terminate` closes the job
/// channel and detaches the thread, which exits once its current body
/// returns.
pub struct ThreadWorker<A> {
    id: WorkerId,
    jobs: Option<mpsc::Sender<(TaskId, A)>>,
    thread: Option<JoinHandle<()>>,
}

impl<A: Send> WorkerHandle<A> for ThreadWorker<A> {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn send(&mut self, task: TaskId, args: A) -> PoolResult<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| PoolError::WorkerFault(format!("{} was terminated", self.id)))?;
        jobs.send((task, args))
            .map_err(|_| PoolError::WorkerFault(format!("{} exited unexpectedly", self.id)))
    }

    fn terminate(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            // Reap it if it is already done; otherwise leave it detached.
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::worker::task_fn;

    fn source(f: TaskFn<u64, u64>) -> Arc<dyn WorkerSource<u64, u64>> {
        Packager::<u64, u64>::package(&ThreadPackager::new("test"), f, &[]).unwrap()
    }

    #[test]
    fn runs_jobs_and_reports_outcomes() {
        let src = source(task_fn(|n: u64| Ok::<_, String>(n * 2)));
        let (tx, mut rx) = unbounded_channel();
        let mut worker = src.spawn(WorkerId(3), tx).unwrap();

        worker.send(TaskId(1), 21).unwrap();
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.worker, WorkerId(3));
        assert_eq!(event.task, TaskId(1));
        assert_eq!(event.outcome.into_result().unwrap(), 42);

        worker.send(TaskId(2), 5).unwrap();
        assert_eq!(rx.blocking_recv().unwrap().outcome.into_result().unwrap(), 10);
        worker.terminate();
    }

    #[test]
    fn task_error_becomes_worker_fault() {
        let src = source(task_fn(|_: u64| Err::<u64, _>("bad input")));
        let (tx, mut rx) = unbounded_channel();
        let mut worker = src.spawn(WorkerId(0), tx).unwrap();

        worker.send(TaskId(7), 0).unwrap();
        match rx.blocking_recv().unwrap().outcome {
            Outcome::Failure(PoolError::WorkerFault(msg)) => assert_eq!(msg, "bad input"),
            other => panic!("expected worker fault, got {other:?}"),
        }
    }

    #[test]
    fn panic_is_caught_and_worker_survives() {
        let src = source(task_fn(|n: u64| {
            if n == 0 {
                panic!("division by zero");
            }
            Ok::<_, String>(100 / n)
        }));
        let (tx, mut rx) = unbounded_channel();
        let mut worker = src.spawn(WorkerId(0), tx).unwrap();

        worker.send(TaskId(1), 0).unwrap();
        match rx.blocking_recv().unwrap().outcome {
            Outcome::Failure(PoolError::WorkerFault(msg)) => {
                assert!(msg.contains("division by zero"), "got: {msg}")
            }
            other => panic!("expected worker fault, got {other:?}"),
        }

        worker.send(TaskId(2), 4).unwrap();
        assert_eq!(rx.blocking_recv().unwrap().outcome.into_result().unwrap(), 25);
    }

    #[test]
    fn send_after_terminate_fails() {
        let src = source(task_fn(|n: u64| Ok::<_, String>(n)));
        let (tx, _rx) = unbounded_channel();
        let mut worker = src.spawn(WorkerId(0), tx).unwrap();

        worker.terminate();
        let err = worker.send(TaskId(1), 1).unwrap_err();
        assert!(matches!(err, PoolError::WorkerFault(_)));
    }

    #[test]
    fn empty_dependency_rejected_at_packaging() {
        let deps = vec!["ok".to_string(), String::new()];
        let result = Packager::<u64, u64>::package(
            &ThreadPackager::new("test"),
            task_fn(|n: u64| Ok::<_, String>(n)),
            &deps,
        );
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn thread_exits_when_terminated_mid_task() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate = std::sync::Mutex::new(gate_rx);
        let src = source(Arc::new(move |n: u64| {
            let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok::<u64, String>(n)
        }));
        let (tx, mut rx) = unbounded_channel();
        let mut worker = src.spawn(WorkerId(0), tx).unwrap();

        worker.send(TaskId(1), 9).unwrap();
        worker.terminate();
        gate_tx.send(()).unwrap();

        // The late outcome is still reported; deciding it is stale is the
        // scheduler's job.
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.task, TaskId(1));
        // Channel closes once the detached thread exits.
        assert!(rx.blocking_recv().is_none());
    }
}
