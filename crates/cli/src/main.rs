mod cli;
mod config;
mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use workhorse_pool::ThreadPool;

use crate::cli::CliArgs;
use crate::workload::Workload;

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so env-backed flags see it
    workhorse_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = config::resolve(&args)?;

    let workload = Workload {
        tasks: args.tasks,
        limit: args.limit,
        kill: args.kill,
    };
    let pool = ThreadPool::new(config, workload::count_primes_in);
    pool.config().log_summary();
    pool.provision().context("failed to provision worker pool")?;

    let report = workload::run(&pool, &workload)
        .await
        .context("workload failed")?;
    pool.teardown();
    info!(
        total_primes = report.total_primes,
        elapsed_ms = report.elapsed_ms,
        "workload complete"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(())
}
