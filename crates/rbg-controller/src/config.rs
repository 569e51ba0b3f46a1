//! Controller tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every controller loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Maximum reconcile passes running at once, per loop
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    /// Deadline for a single reconcile pass
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// Requeue delay when a dependency is not ready yet
    #[serde(default = "default_dependency_requeue")]
    pub dependency_requeue_secs: u64,

    /// First retry delay after a transient failure
    #[serde(default = "default_error_requeue_base")]
    pub error_requeue_base_ms: u64,

    /// Upper bound for transient failure retry delays
    #[serde(default = "default_error_requeue_max")]
    pub error_requeue_max_secs: u64,

    /// Poll interval while waiting for a recreated workload
    #[serde(default = "default_restart_poll_interval")]
    pub restart_poll_interval_ms: u64,

    /// Give up waiting for a recreated workload after this long
    #[serde(default = "default_restart_poll_timeout")]
    pub restart_poll_timeout_ms: u64,

    /// Full re-list interval; zero disables periodic resync
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Read-modify-write retry on version conflicts
    #[serde(default)]
    pub conflict_retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            dependency_requeue_secs: default_dependency_requeue(),
            error_requeue_base_ms: default_error_requeue_base(),
            error_requeue_max_secs: default_error_requeue_max(),
            restart_poll_interval_ms: default_restart_poll_interval(),
            restart_poll_timeout_ms: default_restart_poll_timeout(),
            resync_interval_secs: default_resync_interval(),
            conflict_retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn dependency_requeue(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }

    pub fn error_requeue_base(&self) -> Duration {
        Duration::from_millis(self.error_requeue_base_ms)
    }

    pub fn error_requeue_max(&self) -> Duration {
        Duration::from_secs(self.error_requeue_max_secs)
    }

    pub fn restart_poll_interval(&self) -> Duration {
        Duration::from_millis(self.restart_poll_interval_ms)
    }

    pub fn restart_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_poll_timeout_ms)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

/// Bounded exponential backoff for conflict retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    #[serde(default = "default_retry_steps")]
    pub steps: u32,

    #[serde(default = "default_retry_initial")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_retry_factor")]
    pub factor: f64,

    /// Fraction of each delay added at random
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: default_retry_steps(),
            initial_backoff_ms: default_retry_initial(),
            factor: default_retry_factor(),
            jitter: default_retry_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

// Default value helpers
fn default_max_concurrent() -> usize {
    10
}

fn default_reconcile_timeout() -> u64 {
    60
}

fn default_dependency_requeue() -> u64 {
    5
}

fn default_error_requeue_base() -> u64 {
    500
}

fn default_error_requeue_max() -> u64 {
    60
}

fn default_restart_poll_interval() -> u64 {
    5_000
}

fn default_restart_poll_timeout() -> u64 {
    300_000
}

fn default_resync_interval() -> u64 {
    300
}

fn default_retry_steps() -> u32 {
    5
}

fn default_retry_initial() -> u64 {
    10
}

fn default_retry_factor() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.1
}
