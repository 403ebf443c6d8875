use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workhorse_core::ErrorKind;

use crate::worker::WorkerId;

/// Identifier of a submitted task. Monotonic and never reused within a pool,
/// so lookups stay valid after the worker that ran the task is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task.
///
/// ```text
/// PENDING -> RUNNING -> SUCCESS | ERROR
/// PENDING | RUNNING  -> TIMEOUT | KILLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Admitted, waiting for a free worker.
    Pending,
    /// Assigned to a worker.
    Running,
    Success,
    Error,
    Timeout,
    Killed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Success)
                | (Running, Error)
                | (Pending | Running, Timeout)
                | (Pending | Running, Killed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Error => "ERROR",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Killed => "KILLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a task record.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Worker currently running the task, if any.
    pub worker: Option<WorkerId>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure category for ERROR, TIMEOUT and KILLED tasks.
    pub error: Option<ErrorKind>,
}
