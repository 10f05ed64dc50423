//! Configuration loading from environment variables.
//!
//! All configuration values are loaded from `KF_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `KF_COOLDOWN_PERIOD_SECS` | 1800 | Cooldown after a transient failure (secs) |
//! | `KF_WAKE_BATCH` | 256 | Max cooldown entries woken per tick batch |
//! | `KF_WORKERS` | CPU count | Dispatch workers |
//! | `KF_TICK_MS` | 1000 | Cooldown ticker period (ms) |
//! | `KF_LOG_LEVEL` | info | Log filter directives |
//! | `KF_LOG_FORMAT` | json | `json` or `pretty` |
//! | `KF_LOG_FILE` | unset | Log file path (stderr when unset) |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::scheduler::{SchedulerConfig, WorkerPoolConfig};
use crate::telemetry::{LogConfig, LogFormat};

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub cooldown_period_secs: u64,
    pub wake_batch: usize,
    pub workers: usize,
    pub tick_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl EffectiveConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub scheduler: SchedulerConfig,
    pub pool: WorkerPoolConfig,
    pub logging: LogConfig,
}

/// Value of `key` parsed as `T`; `default` when unset, blank or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn load_scheduler_config() -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    let cooldown_secs: u64 = env_or("KF_COOLDOWN_PERIOD_SECS", defaults.cooldown_period.as_secs());
    SchedulerConfig {
        cooldown_period: Duration::from_secs(cooldown_secs.max(1)),
        wake_batch: env_or("KF_WAKE_BATCH", defaults.wake_batch).clamp(1, 65_536),
    }
}

fn load_pool_config() -> WorkerPoolConfig {
    let workers: usize = env_or("KF_WORKERS", num_cpus::get());
    let tick_ms: u64 = env_or("KF_TICK_MS", 1000).max(10);
    WorkerPoolConfig {
        cooldown_tick: Duration::from_millis(tick_ms),
        ..WorkerPoolConfig::with_workers(workers.min(1024))
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    let level = std::env::var("KF_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(defaults.level);
    let format = env_or("KF_LOG_FORMAT", defaults.format);
    let output_path = std::env::var_os("KF_LOG_FILE").map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        scheduler: load_scheduler_config(),
        pool: load_pool_config(),
        logging: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            cooldown_period_secs: self.scheduler.cooldown_period.as_secs(),
            wake_batch: self.scheduler.wake_batch,
            workers: self.pool.worker_count.get(),
            tick_ms: self.pool.cooldown_tick.as_millis() as u64,
            log_level: self.logging.level.clone(),
            log_format: self.logging.format,
            log_file: self.logging.output_path.clone(),
        }
    }
}
