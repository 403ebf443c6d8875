use std::path::PathBuf;

use clap::Parser;

/// Run a CPU-bound workload through a bounded worker pool.
///
/// Splits a prime-counting job into tasks, submits them all at once and
/// reports how each one ended together with the pool metrics.
#[derive(Parser, Debug)]
#[command(name = "workhorse", about = "Run a CPU-bound workload through a bounded worker pool")]
pub struct CliArgs {
    /// Path to a TOML pool config file
    #[arg(long, env = "WORKHORSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of workers (default: half the available cores)
    #[arg(long, env = "WORKHORSE_POOL_SIZE")]
    pub size: Option<usize>,

    /// Per-task timeout in milliseconds, counted from submission
    #[arg(long, env = "WORKHORSE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Number of tasks to split the workload into
    #[arg(long, env = "WORKHORSE_TASKS", default_value = "16")]
    pub tasks: usize,

    /// Count primes below this bound
    #[arg(long, env = "WORKHORSE_LIMIT", default_value = "2000000")]
    pub limit: u64,

    /// Kill the task at this index (0-based) right after submission
    #[arg(long, env = "WORKHORSE_KILL")]
    pub kill: Option<usize>,

    /// Print the report as JSON
    #[arg(long, env = "WORKHORSE_JSON")]
    pub json: bool,
}
