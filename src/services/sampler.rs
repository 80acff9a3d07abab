use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sysinfo::{Disks, Networks, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::models::metrics::{AlertSeverity, PerfAlert, PerformanceSample};

struct SamplerInner {
    system: System,
    disks: Disks,
    networks: Networks,
    history: VecDeque<PerformanceSample>,
    alerts: Vec<PerfAlert>,
}

/// Condensed view of the sampler for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerSummary {
    pub latest: Option<PerformanceSample>,
    pub samples_retained: usize,
    pub unresolved_alerts: usize,
    pub critical_alerts: usize,
}

/// Periodic resource-metric sampling with threshold alerting.
///
/// Samples land in a bounded ring buffer; alerts are de-duplicated per
/// metric while unresolved and resolve automatically when the metric
/// drops back under its warning threshold. Runs as an independent
/// sidecar: nothing in the pipeline blocks on it.
pub struct PerformanceSampler {
    inner: Mutex<SamplerInner>,
    config: MonitoringConfig,
    active_jobs: AtomicU64,
    pid: Option<sysinfo::Pid>,
}

impl PerformanceSampler {
    pub fn new(config: MonitoringConfig) -> Self {
        let pid = sysinfo::get_current_pid().ok();
        Self {
            inner: Mutex::new(SamplerInner {
                system: System::new(),
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
                history: VecDeque::new(),
                alerts: Vec::new(),
            }),
            config,
            active_jobs: AtomicU64::new(0),
            pid,
        }
    }

    /// Gauge fed by the orchestrator: jobs currently non-terminal.
    pub fn set_active_jobs(&self, count: u64) {
        self.active_jobs.store(count, Ordering::Relaxed);
    }

    /// Take one sample now, append it, and re-evaluate alerts.
    pub fn sample_now(&self) -> PerformanceSample {
        let mut inner = self.inner.lock().unwrap();
        inner.system.refresh_memory();
        inner.system.refresh_cpu_usage();
        if let Some(pid) = self.pid {
            inner
                .system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }
        inner.disks.refresh(true);
        inner.networks.refresh(true);

        let (disk_used, disk_total) = inner
            .disks
            .iter()
            .map(|d| (d.total_space() - d.available_space(), d.total_space()))
            .fold((0, 0), |(u, t), (du, dt)| (u + du, t + dt));

        let (net_rx, net_tx) = inner
            .networks
            .iter()
            .map(|(_, data)| (data.total_received(), data.total_transmitted()))
            .fold((0, 0), |(rx, tx), (r, t)| (rx + r, tx + t));

        let process = self.pid.and_then(|pid| inner.system.process(pid));
        let sample = PerformanceSample {
            taken_at: Utc::now(),
            cpu_percent: inner.system.global_cpu_usage(),
            memory_used_bytes: inner.system.used_memory(),
            memory_total_bytes: inner.system.total_memory(),
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            network_rx_bytes: net_rx,
            network_tx_bytes: net_tx,
            process_memory_bytes: process.map(|p| p.memory()).unwrap_or(0),
            process_cpu_percent: process.map(|p| p.cpu_usage()).unwrap_or(0.0),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
        };

        inner.history.push_back(sample.clone());
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }

        self.evaluate_thresholds(&mut inner, &sample);
        debug!(
            cpu = f64::from(sample.cpu_percent),
            memory_pct = f64::from(sample.memory_percent()),
            active_jobs = sample.active_jobs,
            "Performance sample taken"
        );
        sample
    }

    fn evaluate_thresholds(&self, inner: &mut SamplerInner, sample: &PerformanceSample) {
        let checks = [
            (
                "cpu",
                sample.cpu_percent,
                self.config.cpu_warning_percent,
                self.config.cpu_critical_percent,
            ),
            (
                "memory",
                sample.memory_percent(),
                self.config.memory_warning_percent,
                self.config.memory_critical_percent,
            ),
            (
                "disk",
                sample.disk_percent(),
                self.config.disk_warning_percent,
                self.config.disk_critical_percent,
            ),
        ];

        for (metric, value, warning, critical) in checks {
            let severity = if value >= critical {
                Some(AlertSeverity::Critical)
            } else if value >= warning {
                Some(AlertSeverity::Warning)
            } else {
                None
            };

            let existing = inner
                .alerts
                .iter_mut()
                .find(|a| a.metric == metric && !a.resolved);

            match (severity, existing) {
                (Some(severity), Some(alert)) => {
                    // De-dup: escalate in place rather than raising again.
                    if severity == AlertSeverity::Critical
                        && alert.severity == AlertSeverity::Warning
                    {
                        alert.severity = AlertSeverity::Critical;
                        alert.value = value;
                        warn!(metric, value = f64::from(value), "Alert escalated to critical");
                    }
                }
                (Some(severity), None) => {
                    let threshold = if severity == AlertSeverity::Critical {
                        critical
                    } else {
                        warning
                    };
                    warn!(
                        metric,
                        value = f64::from(value),
                        threshold = f64::from(threshold),
                        severity = %severity,
                        "Threshold alert raised"
                    );
                    inner.alerts.push(PerfAlert {
                        id: Uuid::new_v4().to_string(),
                        metric: metric.to_string(),
                        severity,
                        message: format!("{metric} at {value:.1}% (threshold {threshold:.1}%)"),
                        value,
                        threshold,
                        raised_at: Utc::now(),
                        resolved: false,
                        resolved_at: None,
                    });
                }
                (None, Some(alert)) => {
                    alert.resolved = true;
                    alert.resolved_at = Some(Utc::now());
                    debug!(metric, "Alert resolved");
                }
                (None, None) => {}
            }
        }
    }

    pub fn alerts(&self) -> Vec<PerfAlert> {
        self.inner.lock().unwrap().alerts.clone()
    }

    pub fn unresolved_alerts(&self) -> Vec<PerfAlert> {
        self.inner
            .lock()
            .unwrap()
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    pub fn history(&self) -> Vec<PerformanceSample> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn summary(&self) -> SamplerSummary {
        let inner = self.inner.lock().unwrap();
        SamplerSummary {
            latest: inner.history.back().cloned(),
            samples_retained: inner.history.len(),
            unresolved_alerts: inner.alerts.iter().filter(|a| !a.resolved).count(),
            critical_alerts: inner
                .alerts
                .iter()
                .filter(|a| !a.resolved && a.severity == AlertSeverity::Critical)
                .count(),
        }
    }
}

/// Handle to the periodic sampling loop; `close` stops and joins it.
pub struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the periodic sampling loop.
pub fn spawn_sampler(sampler: Arc<PerformanceSampler>, interval: Duration) -> SamplerHandle {
    let (shutdown, mut rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sampler.sample_now();
                }
                _ = rx.changed() => {
                    debug!("Performance sampler shutting down");
                    break;
                }
            }
        }
    });
    SamplerHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler_with(config: MonitoringConfig) -> PerformanceSampler {
        PerformanceSampler::new(config)
    }

    #[test]
    fn test_sampling_fills_history() {
        let sampler = sampler_with(MonitoringConfig::default());
        sampler.set_active_jobs(3);
        let sample = sampler.sample_now();
        assert_eq!(sample.active_jobs, 3);
        assert_eq!(sampler.history().len(), 1);
        assert!(sampler.summary().latest.is_some());

        // Network counters are cumulative totals, so a later sample can
        // never report less.
        let later = sampler.sample_now();
        assert!(later.network_rx_bytes >= sample.network_rx_bytes);
        assert!(later.network_tx_bytes >= sample.network_tx_bytes);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = MonitoringConfig {
            history_limit: 2,
            ..MonitoringConfig::default()
        };
        let sampler = sampler_with(config);
        for _ in 0..5 {
            sampler.sample_now();
        }
        assert_eq!(sampler.history().len(), 2);
    }

    #[test]
    fn test_alert_raised_once_and_resolves() {
        // Impossible-to-miss thresholds: anything >= 1% raises.
        let config = MonitoringConfig {
            cpu_warning_percent: 1.0,
            cpu_critical_percent: 100.0,
            memory_warning_percent: 1.0,
            memory_critical_percent: 100.0,
            disk_warning_percent: 1.0,
            disk_critical_percent: 100.0,
            ..MonitoringConfig::default()
        };
        let sampler = sampler_with(config);
        sampler.sample_now();
        sampler.sample_now();

        // Memory and disk usage are certainly above 1%; the alert for each
        // metric must not be duplicated across samples.
        let unresolved = sampler.unresolved_alerts();
        let memory_alerts = unresolved.iter().filter(|a| a.metric == "memory").count();
        assert!(memory_alerts <= 1, "alerts must be de-duplicated per metric");
    }
}
