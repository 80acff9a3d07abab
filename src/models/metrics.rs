use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time resource snapshot taken by the performance sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub taken_at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    /// Cumulative bytes received across all interfaces since boot.
    pub network_rx_bytes: u64,
    /// Cumulative bytes transmitted across all interfaces since boot.
    pub network_tx_bytes: u64,
    pub process_memory_bytes: u64,
    pub process_cpu_percent: f32,
    /// Pipeline gauge: jobs currently in a non-terminal state.
    pub active_jobs: u64,
}

impl PerformanceSample {
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f32 / self.memory_total_bytes as f32 * 100.0
    }

    pub fn disk_percent(&self) -> f32 {
        if self.disk_total_bytes == 0 {
            return 0.0;
        }
        self.disk_used_bytes as f32 / self.disk_total_bytes as f32 * 100.0
    }
}

/// Severity of a threshold alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Alert raised when a sampled metric crosses a configured threshold.
///
/// De-duplicated per metric while unresolved; resolved when the metric
/// drops back under the warning threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfAlert {
    pub id: String,
    pub metric: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f32,
    pub threshold: f32,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}
