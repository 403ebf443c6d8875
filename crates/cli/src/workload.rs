use std::ops::Range;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use workhorse_pool::{PoolError, PoolMetrics, TaskId, TaskStatus, ThreadPool};

/// Count primes in `range` by trial division. Pure: touches only its input.
pub fn count_primes_in(range: Range<u64>) -> Result<u64, String> {
    if range.start > range.end {
        return Err(format!("invalid range {}..{}", range.start, range.end));
    }
    Ok(range.filter(|&n| is_prime(n)).count() as u64)
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d <= n / d {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// A prime-counting job split into contiguous ranges.
#[derive(Debug, Clone)]
pub struct Workload {
    pub tasks: usize,
    pub limit: u64,
    /// Index of a task to kill right after submission.
    pub kill: Option<usize>,
}

impl Workload {
    /// Split `0..limit` into at most `tasks` non-overlapping ranges.
    pub fn ranges(&self) -> Vec<Range<u64>> {
        let tasks = self.tasks.max(1) as u64;
        let chunk = self.limit.div_ceil(tasks).max(1);
        (0..tasks)
            .map(|i| {
                let start = i.saturating_mul(chunk).min(self.limit);
                let end = (i + 1).saturating_mul(chunk).min(self.limit);
                start..end
            })
            .filter(|r| !r.is_empty())
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct TaskOutcome {
    pub task: TaskId,
    pub range: Range<u64>,
    pub status: TaskStatus,
    pub primes: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub outcomes: Vec<TaskOutcome>,
    /// Primes counted by the tasks that succeeded.
    pub total_primes: u64,
    pub elapsed_ms: u64,
    pub metrics: PoolMetrics,
}

impl Report {
    pub fn print(&self) {
        for outcome in &self.outcomes {
            match (outcome.primes, &outcome.error) {
                (Some(primes), _) => println!(
                    "{:<8} {:>10}..{:<10} {:<8} {primes} primes",
                    outcome.task, outcome.range.start, outcome.range.end, outcome.status
                ),
                (None, Some(error)) => println!(
                    "{:<8} {:>10}..{:<10} {:<8} {error}",
                    outcome.task, outcome.range.start, outcome.range.end, outcome.status
                ),
                (None, None) => {}
            }
        }
        println!();
        println!("total primes : {}", self.total_primes);
        println!("elapsed      : {} ms", self.elapsed_ms);
        println!(
            "tasks        : {} ok, {} failed, {} timed out, {} killed",
            self.metrics.succeeded, self.metrics.failed, self.metrics.timed_out, self.metrics.killed
        );
        println!("peak pending : {}", self.metrics.peak_pending);
    }
}

/// Status a task ended with, judged from its result.
fn status_of(result: &Result<u64, PoolError>) -> TaskStatus {
    match result {
        Ok(_) => TaskStatus::Success,
        Err(PoolError::Timeout(_)) => TaskStatus::Timeout,
        Err(PoolError::Cancelled | PoolError::PoolCleared) => TaskStatus::Killed,
        Err(_) => TaskStatus::Error,
    }
}

/// Submit every range at once, optionally kill one, and wait for all.
pub async fn run(
    pool: &ThreadPool<Range<u64>, u64>,
    workload: &Workload,
) -> Result<Report, PoolError> {
    let started = Instant::now();
    let ranges = workload.ranges();

    let mut handles = Vec::with_capacity(ranges.len());
    for range in &ranges {
        handles.push(pool.submit(range.clone())?);
    }
    info!(
        tasks = handles.len(),
        running = pool.running_count(),
        pending = pool.pending_count(),
        "workload submitted"
    );

    if let Some(index) = workload.kill {
        match handles.get(index) {
            Some(handle) => {
                let id = handle.id();
                if pool.kill(id) {
                    info!(task = %id, "killed task on request");
                }
            }
            None => warn!(index, tasks = handles.len(), "kill index out of range, ignoring"),
        }
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut total_primes = 0;
    for (handle, range) in handles.into_iter().zip(ranges) {
        let task = handle.id();
        let result = handle.await;
        let status = pool.status(task).unwrap_or_else(|| status_of(&result));
        let outcome = match result {
            Ok(primes) => {
                total_primes += primes;
                info!(task = %task, primes, "task finished");
                TaskOutcome {
                    task,
                    range,
                    status,
                    primes: Some(primes),
                    error: None,
                }
            }
            Err(e) => {
                warn!(task = %task, status = %status, error = %e, "task did not finish");
                TaskOutcome {
                    task,
                    range,
                    status,
                    primes: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    Ok(Report {
        outcomes,
        total_primes,
        elapsed_ms: started.elapsed().as_millis() as u64,
        metrics: pool.metrics(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use workhorse_pool::PoolConfig;

    #[test]
    fn test_count_primes() {
        assert_eq!(count_primes_in(0..100), Ok(25));
        assert_eq!(count_primes_in(0..2), Ok(0));
        assert_eq!(count_primes_in(2..3), Ok(1));
        assert_eq!(count_primes_in(90..100), Ok(1));
        assert!(count_primes_in(Range { start: 5, end: 1 }).is_err());
    }

    #[test]
    fn test_ranges_cover_limit_without_overlap() {
        let workload = Workload {
            tasks: 7,
            limit: 1000,
            kill: None,
        };
        let ranges = workload.ranges();
        assert_eq!(ranges.len(), 7);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges.last().unwrap().end, 1000);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_primality_at_large_values() {
        assert!(!is_prime(u64::MAX));
        assert!(!is_prime(u64::MAX - 1));
        assert!(is_prime(4_294_967_291));
        assert!(!is_prime(4_294_967_291 * 3));
    }

    #[test]
    fn test_ranges_near_u64_max() {
        let workload = Workload {
            tasks: 3,
            limit: u64::MAX,
            kill: None,
        };
        let ranges = workload.ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[2].end, u64::MAX);
        assert_eq!(ranges[0].end, ranges[1].start);
        assert_eq!(ranges[1].end, ranges[2].start);
    }

    #[test]
    fn test_more_tasks_than_numbers() {
        let workload = Workload {
            tasks: 10,
            limit: 3,
            kill: None,
        };
        let ranges = workload.ranges();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[tokio::test]
    async fn test_run_counts_all_primes() {
        let pool = ThreadPool::new(PoolConfig::default().with_size(3), count_primes_in);
        let workload = Workload {
            tasks: 8,
            limit: 10_000,
            kill: None,
        };
        let report = run(&pool, &workload).await.unwrap();
        assert_eq!(report.total_primes, 1229);
        assert_eq!(report.outcomes.len(), 8);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == TaskStatus::Success));
        assert_eq!(report.metrics.succeeded, 8);
    }

    #[tokio::test]
    async fn test_run_with_killed_task() {
        let pool = ThreadPool::new(PoolConfig::default().with_size(1), count_primes_in);
        let workload = Workload {
            tasks: 4,
            limit: 1000,
            kill: Some(3),
        };
        let report = run(&pool, &workload).await.unwrap();
        let killed = &report.outcomes[3];
        assert_eq!(killed.status, TaskStatus::Killed);
        assert!(killed.primes.is_none());
        assert_eq!(report.total_primes, 168 - count_primes_in(killed.range.clone()).unwrap());
        assert_eq!(report.metrics.killed, 1);
    }

    #[tokio::test]
    async fn test_zero_size_pool_fails_run() {
        let pool = ThreadPool::new(PoolConfig::default().with_size(0), count_primes_in);
        let workload = Workload {
            tasks: 2,
            limit: 10,
            kill: None,
        };
        assert!(matches!(
            run(&pool, &workload).await,
            Err(PoolError::Configuration(_))
        ));
    }
}
