//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Background job worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the worker pool is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent worker loops.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval in milliseconds between polls when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Prefix used when deriving worker identifiers.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            id_prefix: default_id_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_id_prefix() -> String {
    "jobhub".to_string()
}
