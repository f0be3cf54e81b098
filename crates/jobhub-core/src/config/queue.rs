//! Job queue and retry policy configuration.

use serde::{Deserialize, Serialize};

/// Queue behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Lease duration in seconds. Must exceed the expected handler
    /// execution time plus scheduling jitter, or live jobs will be
    /// reclaimed and executed twice.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,
    /// Interval in milliseconds between reclaimer passes (expired-lease
    /// reclaim and promotion of due retries).
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_ms: u64,
    /// Default maximum attempts for jobs submitted without an explicit
    /// ceiling.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,
    /// Retry backoff policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Terminal-job retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Exponential backoff configuration for retried jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Ceiling on the computed delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Symmetric jitter applied to the nominal delay, as a fraction
    /// (0.1 = plus or minus 10%).
    #[serde(default = "default_jitter")]
    pub jitter_ratio: f64,
}

/// Retention policy for terminal jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age in days after which terminal jobs are purged.
    #[serde(default = "default_retention_days")]
    pub days: i64,
    /// Whether the sweep also purges dead-lettered jobs. Off by default:
    /// dead letters stay inspectable until explicitly included.
    #[serde(default)]
    pub purge_dead_lettered: bool,
    /// Cron schedule for the retention sweep.
    #[serde(default = "default_retention_schedule")]
    pub schedule: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: default_lease_ttl(),
            reclaim_interval_ms: default_reclaim_interval(),
            default_max_attempts: default_max_attempts(),
            retry: RetryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_ratio: default_jitter(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            purge_dead_lettered: false,
            schedule: default_retention_schedule(),
        }
    }
}

fn default_lease_ttl() -> u64 {
    60
}

fn default_reclaim_interval() -> u64 {
    15_000
}

fn default_max_attempts() -> i32 {
    3
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    300_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retention_days() -> i64 {
    7
}

fn default_retention_schedule() -> String {
    "0 0 3 * * *".to_string()
}
