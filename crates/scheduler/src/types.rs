use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use threadwork_core::config::{active_profile, profile_label, profiled_env_or, profiled_env_parse};
use threadwork_core::{Result, ThreadworkError};
use tracing::info;

/// Task priority class. Declaration order is dequeue preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served first whenever eligible.
    High,
    /// Served after eligible high tasks, but never kept waiting longer than
    /// the configured maximum once eligible.
    Low,
    /// Served only when nothing else is eligible. May wait indefinitely.
    Starvable,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Low, Priority::Starvable];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
            Priority::Starvable => "starvable",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
            Priority::Starvable => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ThreadworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "low" => Ok(Priority::Low),
            "starvable" => Ok(Priority::Starvable),
            other => Err(ThreadworkError::invalid_argument(format!("unknown priority: {}", other))),
        }
    }
}

/// Scheduler configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Threads kept alive even when idle. Must be at least 1.
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,
    /// Upper bound on worker threads. 0 = available parallelism (never
    /// below `core_pool_size`).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Idle time after which a thread beyond the core size retires.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Longest an eligible low-priority task waits behind high-priority work.
    #[serde(default = "default_max_wait_for_low_priority_ms")]
    pub max_wait_for_low_priority_ms: u64,
    /// Priority used by the untyped `Executor` / `Scheduler` entry points.
    #[serde(default = "default_priority")]
    pub default_priority: Priority,
    /// Worker threads are named `{prefix}-{n}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_core_pool_size() -> usize { 4 }
fn default_max_pool_size() -> usize { 0 }
fn default_keep_alive_ms() -> u64 { 60_000 }
fn default_max_wait_for_low_priority_ms() -> u64 { 500 }
fn default_priority() -> Priority { Priority::High }
fn default_thread_name_prefix() -> String { "threadwork-worker".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
            keep_alive_ms: default_keep_alive_ms(),
            max_wait_for_low_priority_ms: default_max_wait_for_low_priority_ms(),
            default_priority: default_priority(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Fixed-size pool of `n` threads.
    pub fn with_pool_size(n: usize) -> Self {
        Self {
            core_pool_size: n,
            max_pool_size: n,
            ..Self::default()
        }
    }

    /// Build from `THREADWORK_*` environment variables, honoring the active
    /// profile. Unset keys keep their defaults.
    pub fn from_env() -> Self {
        let profile = active_profile();
        let p = profile.as_str();
        Self {
            core_pool_size: profiled_env_parse(p, "THREADWORK_CORE_POOL_SIZE", default_core_pool_size()),
            max_pool_size: profiled_env_parse(p, "THREADWORK_MAX_POOL_SIZE", default_max_pool_size()),
            keep_alive_ms: profiled_env_parse(p, "THREADWORK_KEEP_ALIVE_MS", default_keep_alive_ms()),
            max_wait_for_low_priority_ms: profiled_env_parse(
                p,
                "THREADWORK_MAX_WAIT_LOW_PRIORITY_MS",
                default_max_wait_for_low_priority_ms(),
            ),
            default_priority: profiled_env_parse(p, "THREADWORK_DEFAULT_PRIORITY", default_priority()),
            thread_name_prefix: profiled_env_or(
                p,
                "THREADWORK_THREAD_NAME_PREFIX",
                &default_thread_name_prefix(),
            ),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| ThreadworkError::invalid_argument(format!("scheduler config: {}", e)))
    }

    /// Resolve the maximum pool size (0 means use available parallelism).
    pub fn resolved_max_pool_size(&self) -> usize {
        if self.max_pool_size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .max(self.core_pool_size)
        } else {
            self.max_pool_size
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn max_wait_for_low_priority(&self) -> Duration {
        Duration::from_millis(self.max_wait_for_low_priority_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_pool_size == 0 {
            return Err(ThreadworkError::invalid_argument("core_pool_size must be at least 1"));
        }
        if self.max_pool_size != 0 && self.max_pool_size < self.core_pool_size {
            return Err(ThreadworkError::invalid_argument(format!(
                "max_pool_size ({}) is below core_pool_size ({})",
                self.max_pool_size, self.core_pool_size
            )));
        }
        if self.resolved_max_pool_size() == 0 {
            return Err(ThreadworkError::invalid_argument("resolved max pool size is zero"));
        }
        Ok(())
    }

    /// Log a summary of the effective settings.
    pub fn log_summary(&self) {
        let profile = active_profile();
        info!("Scheduler config (profile: {}):", profile_label(&profile));
        info!("  Pool:      core={} max={}", self.core_pool_size, self.resolved_max_pool_size());
        info!("  KeepAlive: {}ms", self.keep_alive_ms);
        info!("  LowWait:   {}ms", self.max_wait_for_low_priority_ms);
        info!("  Priority:  {}", self.default_priority);
        info!("  Threads:   {}-N", self.thread_name_prefix);
    }
}
