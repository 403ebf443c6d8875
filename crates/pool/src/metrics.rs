use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use workhorse_core::ErrorKind;

use crate::status::TaskStatus;

/// Pool operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetrics {
    /// Tasks accepted by `submit`/`try_submit`.
    pub submitted: u64,
    pub succeeded: u64,
    /// Tasks whose body returned an error or panicked.
    pub failed: u64,
    pub timed_out: u64,
    /// Tasks cancelled by the caller.
    pub killed: u64,
    /// Tasks rejected because the pool was torn down.
    pub cleared: u64,
    /// Workers replaced after being terminated mid-task.
    pub worker_respawns: u64,
    /// Deepest the pending queue has been.
    pub peak_pending: usize,
    /// Mean run time of tasks that finished on their own (success or error).
    pub avg_run_duration: Duration,
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    measured_runs: u64,
}

impl PoolMetrics {
    /// Record a task reaching a terminal status.
    pub fn record_finish(
        &mut self,
        status: TaskStatus,
        cause: Option<ErrorKind>,
        run_time: Option<Duration>,
    ) {
        match (status, cause) {
            (TaskStatus::Success, _) => self.succeeded += 1,
            (_, Some(ErrorKind::PoolCleared)) => self.cleared += 1,
            (TaskStatus::Error, _) => self.failed += 1,
            (TaskStatus::Timeout, _) => self.timed_out += 1,
            _ => self.killed += 1,
        }
        self.last_finished_at = Some(Utc::now());

        let natural = matches!(status, TaskStatus::Success | TaskStatus::Error);
        if !natural || cause == Some(ErrorKind::PoolCleared) {
            return;
        }
        let Some(run_time) = run_time else {
            return;
        };

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.measured_runs += 1;
        self.avg_run_duration = if self.measured_runs == 1 {
            run_time
        } else {
            let prev_nanos = self.avg_run_duration.as_nanos() as f64;
            let cur_nanos = run_time.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.measured_runs as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn observe_pending(&mut self, depth: usize) {
        self.peak_pending = self.peak_pending.max(depth);
    }

    /// Tasks that reached any terminal status.
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out + self.killed + self.cleared
    }
}
