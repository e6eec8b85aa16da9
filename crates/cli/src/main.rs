mod bench;
mod cli;
mod config;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use threadwork_core::config::load_dotenv;
use threadwork_scheduler::PriorityScheduler;
use tracing::{info, warn};

use crate::cli::BenchArgs;

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = BenchArgs::parse();
    let config = config::scheduler_config(&args)?;
    config.log_summary();

    let scheduler = PriorityScheduler::new(config).context("failed to start scheduler")?;
    let report = bench::run(&args, &scheduler);

    scheduler.shutdown();
    if !scheduler.await_termination(Duration::from_secs(10)) {
        warn!("Scheduler workers still running after shutdown");
    }
    let report = report?;

    let json = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("failed to serialize report")?;
    println!("{}", json);

    if !report.is_ok() {
        bail!(
            "workload check failed: {} out-of-order keys, {} failed tasks, peak {} of {}",
            report.out_of_order_keys.len(),
            report.failed_tasks,
            report.peak_running,
            report.concurrency
        );
    }
    info!(elapsed_ms = report.elapsed_ms as u64, "Workload finished");
    Ok(())
}
