use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use workhorse_core::{ErrorKind, PoolConfig, PoolError, PoolResult};

use crate::metrics::PoolMetrics;
use crate::status::{TaskId, TaskInfo, TaskStatus};
use crate::worker::{EventSender, WorkerEvent, WorkerHandle, WorkerId, WorkerSource};

pub(super) type Reply<R> = oneshot::Sender<PoolResult<R>>;

/// Bookkeeping for one submitted task. Owned by the pool, never handed out.
pub(super) struct TaskRecord<R> {
    pub(super) status: TaskStatus,
    pub(super) worker: Option<WorkerId>,
    pub(super) timeout: Option<AbortHandle>,
    pub(super) reply: Option<Reply<R>>,
    pub(super) submitted_at: DateTime<Utc>,
    pub(super) started: Option<Instant>,
    pub(super) finished_at: Option<DateTime<Utc>>,
    pub(super) error: Option<ErrorKind>,
}

impl<R> TaskRecord<R> {
    fn pending(reply: Reply<R>) -> Self {
        Self {
            status: TaskStatus::Pending,
            worker: None,
            timeout: None,
            reply: Some(reply),
            submitted_at: Utc::now(),
            started: None,
            finished_at: None,
            error: None,
        }
    }

    pub(super) fn info(&self, id: TaskId) -> TaskInfo {
        TaskInfo {
            id,
            status: self.status,
            worker: self.worker,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
            error: self.error,
        }
    }
}

/// A task admitted while every worker was busy.
pub(super) struct PendingEntry<A> {
    pub(super) task: TaskId,
    pub(super) args: A,
}

pub(super) struct WorkerSlot<A> {
    pub(super) handle: Box<dyn WorkerHandle<A>>,
    /// Task the worker is running. `None` iff the slot is on the free list.
    pub(super) current: Option<TaskId>,
}

impl<A> WorkerSlot<A> {
    pub(super) fn idle(handle: Box<dyn WorkerHandle<A>>) -> Self {
        Self { handle, current: None }
    }
}

/// Everything the scheduler mutates. Guarded by a single mutex so every
/// event (submit, completion, timeout, kill, teardown) is applied whole.
pub(super) struct PoolState<A, R> {
    pub(super) source: Option<Arc<dyn WorkerSource<A, R>>>,
    pub(super) events: Option<EventSender<R>>,
    pub(super) runtime: Option<Handle>,
    pub(super) event_loop: Option<JoinHandle<()>>,
    /// Every worker provisioned for the current generation.
    pub(super) workers: BTreeMap<WorkerId, WorkerSlot<A>>,
    pub(super) free: Vec<WorkerId>,
    pub(super) queue: VecDeque<PendingEntry<A>>,
    pub(super) tasks: HashMap<TaskId, TaskRecord<R>>,
    /// Terminal task ids, oldest first.
    pub(super) history: VecDeque<TaskId>,
    pub(super) history_limit: usize,
    pub(super) timeout: Option<Duration>,
    pub(super) next_task: u64,
    pub(super) metrics: PoolMetrics,
}

impl<A, R> PoolState<A, R> {
    pub(super) fn new(config: &PoolConfig) -> Self {
        Self {
            source: None,
            events: None,
            runtime: None,
            event_loop: None,
            workers: BTreeMap::new(),
            free: Vec::new(),
            queue: VecDeque::new(),
            tasks: HashMap::new(),
            history: VecDeque::new(),
            history_limit: config.history_limit,
            timeout: config.timeout(),
            next_task: 0,
            metrics: PoolMetrics::default(),
        }
    }

    pub(super) fn is_provisioned(&self) -> bool {
        self.source.is_some()
    }

    pub(super) fn next_id(&mut self) -> TaskId {
        self.next_task += 1;
        TaskId(self.next_task)
    }

    pub(super) fn running_count(&self) -> usize {
        self.workers.len() - self.free.len()
    }

    /// Admit a new task: straight to a free worker, else to the queue tail.
    pub(super) fn admit(&mut self, id: TaskId, args: A, reply: Reply<R>) {
        self.tasks.insert(id, TaskRecord::pending(reply));
        self.metrics.submitted += 1;

        match self.free.pop() {
            Some(worker) => {
                if !self.dispatch(worker, id, args) {
                    self.drain();
                }
            }
            None => {
                self.queue.push_back(PendingEntry { task: id, args });
                self.metrics.observe_pending(self.queue.len());
                debug!(task = %id, pending = self.queue.len(), "no free worker, task queued");
            }
        }
    }

    /// Hand `task` to `worker`, which must already be off the free list.
    /// Returns false if the worker could not accept it; the task is then
    /// failed and the worker recycled.
    fn dispatch(&mut self, worker: WorkerId, task: TaskId, args: A) -> bool {
        let Some(slot) = self.workers.get_mut(&worker) else {
            warn!(worker = %worker, task = %task, "dispatch to unknown worker");
            let err = PoolError::WorkerFault(format!("{worker} is gone"));
            self.settle(task, TaskStatus::Error, Err(err));
            return false;
        };

        match self.tasks.get_mut(&task) {
            Some(record) if record.status.can_transition_to(TaskStatus::Running) => {
                record.status = TaskStatus::Running;
                record.worker = Some(worker);
                record.started = Some(Instant::now());
            }
            _ => {
                warn!(task = %task, "task not dispatchable, returning worker");
                self.free.push(worker);
                return true;
            }
        }
        slot.current = Some(task);

        match slot.handle.send(task, args) {
            Ok(()) => {
                debug!(task = %task, worker = %worker, "task dispatched");
                true
            }
            Err(e) => {
                warn!(task = %task, worker = %worker, error = %e, "worker rejected task");
                self.settle(task, TaskStatus::Error, Err(e));
                self.recycle(worker);
                false
            }
        }
    }

    /// Move queued tasks onto free workers, head first.
    pub(super) fn drain(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.free.pop() else {
                break;
            };
            let Some(entry) = self.queue.pop_front() else {
                self.free.push(worker);
                break;
            };
            self.dispatch(worker, entry.task, entry.args);
        }
    }

    /// Put an assigned worker back on the free list and give it queued work
    /// before anything else can claim it.
    fn release(&mut self, worker: WorkerId) {
        if let Some(slot) = self.workers.get_mut(&worker) {
            slot.current = None;
            self.free.push(worker);
        }
        self.drain();
    }

    /// Replace an assigned worker's execution unit with a fresh one from the
    /// shared source. The old unit is terminated, never reused. If no
    /// replacement can be spawned the slot is dropped and capacity shrinks.
    fn recycle(&mut self, worker: WorkerId) {
        let Some(mut slot) = self.workers.remove(&worker) else {
            return;
        };
        slot.handle.terminate();

        let respawned = match (&self.source, &self.events) {
            (Some(source), Some(events)) => source.spawn(worker, events.clone()),
            _ => Err(PoolError::PoolCleared),
        };
        match respawned {
            Ok(handle) => {
                self.workers.insert(worker, WorkerSlot::idle(handle));
                self.free.push(worker);
                self.metrics.worker_respawns += 1;
                debug!(worker = %worker, "worker respawned");
            }
            Err(e) => {
                warn!(
                    worker = %worker,
                    error = %e,
                    "could not respawn worker, pool capacity reduced"
                );
            }
        }
    }

    /// Respawn slots lost to failed recycles, up to `size`, and hand them
    /// queued work. Stops at the first spawn that fails.
    pub(super) fn replenish(&mut self, size: usize) {
        if self.workers.len() >= size {
            return;
        }
        let (Some(source), Some(events)) = (self.source.clone(), self.events.clone()) else {
            return;
        };
        for index in 0..size {
            let id = WorkerId(index);
            if self.workers.contains_key(&id) {
                continue;
            }
            match source.spawn(id, events.clone()) {
                Ok(handle) => {
                    self.workers.insert(id, WorkerSlot::idle(handle));
                    self.free.push(id);
                    self.metrics.worker_respawns += 1;
                    debug!(worker = %id, "lost worker replaced");
                }
                Err(e) => {
                    warn!(worker = %id, error = %e, "could not replace lost worker");
                    break;
                }
            }
        }
        self.drain();
    }

    /// Apply a worker's completion report.
    pub(super) fn handle_event(&mut self, event: WorkerEvent<R>) {
        let WorkerEvent {
            worker,
            task,
            outcome,
        } = event;

        let assigned = self.workers.get(&worker).and_then(|slot| slot.current);
        if assigned != Some(task) {
            debug!(task = %task, worker = %worker, "discarding stale outcome");
            return;
        }

        let result = outcome.into_result();
        let status = match &result {
            Ok(_) => TaskStatus::Success,
            Err(err) => {
                warn!(task = %task, worker = %worker, error = %err, "task failed");
                TaskStatus::Error
            }
        };
        self.settle(task, status, result);
        self.release(worker);
    }

    /// Cancel a task with the given terminal status.
    ///
    /// A running task's worker is recycled and immediately offered the queue
    /// head; a pending task leaves the queue with the others' order intact.
    /// Unknown or already-terminal ids are ignored.
    pub(super) fn kill(&mut self, id: TaskId, status: TaskStatus) -> bool {
        let Some((current, worker)) = self.tasks.get(&id).map(|r| (r.status, r.worker)) else {
            return false;
        };
        let Some(error) = self.terminal_error(status) else {
            warn!(task = %id, status = %status, "refusing to kill with non-failure status");
            return false;
        };

        match current {
            TaskStatus::Running => {
                if !self.settle(id, status, Err(error)) {
                    return false;
                }
                if let Some(worker) = worker {
                    self.recycle(worker);
                    self.drain();
                }
                true
            }
            TaskStatus::Pending => {
                if let Some(pos) = self.queue.iter().position(|entry| entry.task == id) {
                    self.queue.remove(pos);
                }
                self.settle(id, status, Err(error))
            }
            _ => false,
        }
    }

    fn terminal_error(&self, status: TaskStatus) -> Option<PoolError> {
        match status {
            TaskStatus::Killed => Some(PoolError::Cancelled),
            TaskStatus::Timeout => Some(PoolError::Timeout(self.timeout.unwrap_or_default())),
            TaskStatus::Error => Some(PoolError::WorkerFault("terminated by caller".to_string())),
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Success => None,
        }
    }

    /// Move a task to a terminal status and deliver its result, once.
    fn settle(&mut self, id: TaskId, status: TaskStatus, result: PoolResult<R>) -> bool {
        let Some(record) = self.tasks.get_mut(&id) else {
            return false;
        };
        if !record.status.can_transition_to(status) {
            warn!(task = %id, from = %record.status, to = %status, "rejected status transition");
            return false;
        }

        record.status = status;
        record.worker = None;
        record.finished_at = Some(Utc::now());
        record.error = result.as_ref().err().map(PoolError::kind);
        if let Some(timer) = record.timeout.take() {
            timer.abort();
        }
        let run_time = record.started.map(|started| started.elapsed());
        if let Some(reply) = record.reply.take() {
            // The caller may have dropped its handle; nothing to deliver then.
            let _ = reply.send(result);
        }

        self.metrics.record_finish(status, record.error, run_time);
        self.remember(id);
        true
    }

    /// Keep a terminal record for status lookups, evicting the oldest past
    /// the history limit.
    fn remember(&mut self, id: TaskId) {
        self.history.push_back(id);
        while self.history.len() > self.history_limit {
            if let Some(oldest) = self.history.pop_front() {
                self.tasks.remove(&oldest);
            }
        }
    }

    /// Reject every outstanding task, terminate all workers, and hand back the
    /// packaged source for disposal. `None` if nothing was provisioned.
    pub(super) fn teardown(&mut self) -> Option<Arc<dyn WorkerSource<A, R>>> {
        let source = self.source.take()?;

        for entry in std::mem::take(&mut self.queue) {
            self.settle(entry.task, TaskStatus::Killed, Err(PoolError::PoolCleared));
        }
        let running: Vec<TaskId> = self.workers.values().filter_map(|slot| slot.current).collect();
        // The worker dies under a running task: a fault, not a cancellation.
        for id in running {
            self.settle(id, TaskStatus::Error, Err(PoolError::PoolCleared));
        }

        for slot in self.workers.values_mut() {
            slot.handle.terminate();
        }
        self.workers.clear();
        self.free.clear();
        self.events = None;
        self.runtime = None;
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.abort();
        }
        Some(source)
    }
}
