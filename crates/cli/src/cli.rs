use clap::Parser;
use threadwork_scheduler::Priority;

/// End-to-end workload for the threadwork stack.
///
/// Pushes a keyed workload through a concurrency limiter onto a priority
/// scheduler, checks that every key ran in submission order, and prints a
/// JSON report.
#[derive(Parser, Debug)]
#[command(name = "threadwork-bench", about = "Keyed workload benchmark for threadwork")]
pub struct BenchArgs {
    /// Worker threads (overrides config file and environment)
    #[arg(long, env = "THREADWORK_BENCH_POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// Scheduler config as TOML (default: THREADWORK_* environment)
    #[arg(long)]
    pub config: Option<String>,

    /// Distinct keys
    #[arg(long, default_value = "8")]
    pub keys: usize,

    /// Tasks submitted under each key
    #[arg(long, default_value = "100")]
    pub tasks_per_key: usize,

    /// Tasks the limiter lets run at once
    #[arg(long, default_value = "4")]
    pub concurrency: usize,

    /// Tasks a key runs before yielding its thread
    #[arg(long, default_value = "1")]
    pub tasks_per_cycle: usize,

    /// Simulated work per task, in microseconds
    #[arg(long, default_value = "200")]
    pub task_micros: u64,

    /// Priority for workload tasks: high, low, or starvable
    #[arg(long, default_value = "high")]
    pub priority: Priority,

    /// Seconds to wait for the workload before giving up
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,

    /// Print the report on one line
    #[arg(long)]
    pub compact: bool,
}
