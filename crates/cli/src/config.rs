use anyhow::{Context, Result};
use std::path::Path;
use threadwork_scheduler::SchedulerConfig;
use tracing::debug;

use crate::cli::BenchArgs;

/// Resolve the scheduler config: a TOML file when given, otherwise the
/// `THREADWORK_*` environment. `--pool-size` wins over both.
pub fn scheduler_config(args: &BenchArgs) -> Result<SchedulerConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_file(Path::new(path))?,
        None => SchedulerConfig::from_env(),
    };
    if let Some(n) = args.pool_size {
        config.core_pool_size = n;
        config.max_pool_size = n;
    }
    config.validate().context("invalid scheduler config")?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<SchedulerConfig> {
    debug!(?path, "Loading scheduler config");
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    SchedulerConfig::from_toml_str(&raw)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}
