use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the worker pool, either at provisioning time or
/// through a task's future.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("task timeout after {0:?}")]
    Timeout(Duration),

    #[error("task killed")]
    Cancelled,

    #[error("worker pool cleared")]
    PoolCleared,

    #[error("worker busy: only one task may run at a time")]
    Busy,

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Coarse error category, stable across runtimes and safe to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    WorkerFault,
    Timeout,
    Cancelled,
    PoolCleared,
    Busy,
    Spawn,
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Configuration(_) | PoolError::ConfigIo(_) | PoolError::ConfigParse(_) => {
                ErrorKind::Configuration
            }
            PoolError::WorkerFault(_) => ErrorKind::WorkerFault,
            PoolError::Timeout(_) => ErrorKind::Timeout,
            PoolError::Cancelled => ErrorKind::Cancelled,
            PoolError::PoolCleared => ErrorKind::PoolCleared,
            PoolError::Busy => ErrorKind::Busy,
            PoolError::Spawn(_) => ErrorKind::Spawn,
        }
    }

    /// Whether the error is confined to a single task. These never take
    /// the pool down.
    pub fn is_task_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::WorkerFault
                | ErrorKind::Timeout
                | ErrorKind::Cancelled
                | ErrorKind::PoolCleared
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::WorkerFault => "worker_fault",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::PoolCleared => "pool_cleared",
            ErrorKind::Busy => "busy",
            ErrorKind::Spawn => "spawn",
        };
        f.write_str(s)
    }
}
