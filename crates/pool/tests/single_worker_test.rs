//! Integration tests for the one-task-at-a-time worker.

use std::sync::mpsc;
use std::time::Duration;

use tokio::time::timeout;

use workhorse_pool::{PoolConfig, PoolError, SingleWorker, TaskStatus};

const TIMEOUT: Duration = Duration::from_secs(5);

fn square_after(gate: Option<mpsc::Receiver<()>>, n: u64) -> Result<u64, String> {
    if let Some(gate) = gate {
        let _ = gate.recv();
    }
    Ok(n * n)
}

type Args = (Option<mpsc::Receiver<()>>, u64);

fn worker(config: PoolConfig) -> SingleWorker<Args, u64> {
    SingleWorker::new(config, |(gate, n): Args| square_after(gate, n))
}

#[tokio::test]
async fn status_is_pending_before_first_run() {
    let worker = worker(PoolConfig::default());
    assert_eq!(worker.status(), TaskStatus::Pending);
    assert!(worker.last_task().is_none());
    assert!(!worker.is_running());
    assert!(!worker.kill());
}

#[tokio::test]
async fn runs_one_task_and_reports_success() {
    let worker = worker(PoolConfig::default());
    let handle = worker.run((None, 7)).unwrap();
    let value = timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(value, 49);
    assert_eq!(worker.status(), TaskStatus::Success);
}

#[tokio::test]
async fn size_is_forced_to_one() {
    let worker = worker(PoolConfig::default().with_size(8));
    let (_open, gate) = mpsc::channel();
    let _first = worker.run((Some(gate), 1)).unwrap();
    assert!(worker.is_running());
    assert!(matches!(worker.run((None, 2)), Err(PoolError::Busy)));
}

#[tokio::test]
async fn run_while_busy_fails_then_succeeds_after_finish() {
    let worker = worker(PoolConfig::default());
    let (open, gate) = mpsc::channel();
    let first = worker.run((Some(gate), 3)).unwrap();
    let first_id = first.id();

    assert!(matches!(worker.run((None, 4)), Err(PoolError::Busy)));
    assert_eq!(worker.last_task(), Some(first_id));
    assert_eq!(worker.status(), TaskStatus::Running);

    open.send(()).unwrap();
    assert_eq!(timeout(TIMEOUT, first).await.unwrap().unwrap(), 9);
    let second = worker.run((None, 4)).unwrap();
    assert_eq!(timeout(TIMEOUT, second).await.unwrap().unwrap(), 16);
}

#[tokio::test]
async fn kill_cancels_in_flight_task() {
    let worker = worker(PoolConfig::default());
    let (_open, gate) = mpsc::channel();
    let handle = worker.run((Some(gate), 5)).unwrap();

    assert!(worker.kill());
    assert!(matches!(
        timeout(TIMEOUT, handle).await.unwrap(),
        Err(PoolError::Cancelled)
    ));
    assert_eq!(worker.status(), TaskStatus::Killed);
    assert!(!worker.is_running());

    let next = worker.run((None, 6)).unwrap();
    assert_eq!(timeout(TIMEOUT, next).await.unwrap().unwrap(), 36);
}

#[tokio::test]
async fn timed_out_run_rejects_its_future() {
    let worker = worker(PoolConfig::default().with_timeout(Duration::from_millis(100)));
    let (_open, gate) = mpsc::channel();
    let handle = worker.run((Some(gate), 2)).unwrap();

    assert!(matches!(
        timeout(TIMEOUT, handle).await.unwrap(),
        Err(PoolError::Timeout(_))
    ));
    assert_eq!(worker.status(), TaskStatus::Timeout);
}

#[tokio::test]
async fn teardown_rejects_in_flight_task() {
    let worker = worker(PoolConfig::default());
    let (_open, gate) = mpsc::channel();
    let handle = worker.run((Some(gate), 2)).unwrap();

    worker.teardown();
    assert!(matches!(
        timeout(TIMEOUT, handle).await.unwrap(),
        Err(PoolError::PoolCleared)
    ));
    assert_eq!(worker.status(), TaskStatus::Error);
}
