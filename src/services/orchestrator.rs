use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, VerificationMode};
use crate::models::email::EmailSearchResult;
use crate::models::job::{JobPriority, JobStatus};
use crate::models::metrics::AlertSeverity;
use crate::models::verification::VerificationResult;
use crate::services::converter::{ConversionOutcome, ConversionService};
use crate::services::mailbox::{MailTransport, MailboxMonitor};
use crate::services::sampler::{PerformanceSampler, SamplerSummary};
use crate::services::store::{JobStore, StoreStatistics, TransitionUpdate};
use crate::services::strategy::{strategy_for, VerificationStrategy};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline configuration invalid: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("conversion client could not be constructed: {0}")]
    Converter(#[from] crate::services::converter::ConverterError),

    #[error("mailbox transport could not be constructed: {0}")]
    Mailbox(#[from] crate::services::mailbox::MailboxError),
}

/// Aggregate status surface for external callers.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub files_processed: u64,
    pub jobs_completed: u64,
    pub errors: u64,
    pub store: StoreStatistics,
    pub sampler: SamplerSummary,
}

/// Sequences the validate -> submit -> monitor workflow for document
/// batches.
///
/// All collaborators are injected at construction and shared via `Arc`;
/// the orchestrator owns no hidden global state. Phases run sequentially
/// per batch but fan out across documents within a phase, bounded by the
/// configured worker count.
pub struct PipelineOrchestrator {
    store: Arc<JobStore>,
    converter: Arc<dyn ConversionService>,
    mail_transport: Arc<dyn MailTransport>,
    sampler: Arc<PerformanceSampler>,
    config: PipelineConfig,
    files_processed: AtomicU64,
    jobs_completed: AtomicU64,
    errors: AtomicU64,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        converter: Arc<dyn ConversionService>,
        mail_transport: Arc<dyn MailTransport>,
        sampler: Arc<PerformanceSampler>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            converter,
            mail_transport,
            sampler,
            config,
            files_processed: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Run one batch through the pipeline. Returns one job id per input
    /// path, always fully populated; outcomes are read from the job store.
    pub async fn process(
        &self,
        paths: Vec<PathBuf>,
        notify_address: &str,
        mode: VerificationMode,
        priority: JobPriority,
    ) -> HashMap<PathBuf, String> {
        info!(
            batch = paths.len(),
            mode = %mode,
            priority = %priority,
            "Processing document batch"
        );
        self.forward_sampler_alerts();

        // Phase 1: one job per document, moved straight into validation.
        let mut job_ids: HashMap<PathBuf, String> = HashMap::new();
        for path in &paths {
            let id = Uuid::new_v4().to_string();
            match self
                .store
                .create(&id, &path.to_string_lossy(), notify_address, priority)
            {
                Ok(_) => {
                    self.store.transition(
                        &id,
                        JobStatus::Validating,
                        TransitionUpdate {
                            progress: Some(10),
                            phase: Some("validating".to_string()),
                            ..TransitionUpdate::default()
                        },
                    );
                    job_ids.insert(path.clone(), id);
                }
                Err(e) => {
                    // Ids are generated fresh, so this only fires on a
                    // pathological store; the entry still gets an id.
                    error!(path = %path.display(), error = %e, "Job creation failed");
                    job_ids.insert(path.clone(), id);
                }
            }
            self.files_processed.fetch_add(1, Ordering::Relaxed);
        }
        self.update_active_gauge();

        // Phase 2: verification fan-out.
        let validated = self.run_validation_phase(&job_ids, mode).await;

        // Phase 3: submission fan-out for documents that passed.
        let remote_ids = self.run_submission_phase(&job_ids, &validated).await;
        self.update_active_gauge();

        // Phase 4: one shared mailbox poll for the whole batch.
        if !remote_ids.is_empty() {
            self.run_monitor_phase(&remote_ids).await;
        }
        self.update_active_gauge();

        info!(
            batch = paths.len(),
            submitted = remote_ids.len(),
            "Batch processing finished"
        );
        job_ids
    }

    /// Non-blocking form of [`process`]; identical internals.
    ///
    /// [`process`]: PipelineOrchestrator::process
    pub fn spawn_process(
        self: &Arc<Self>,
        paths: Vec<PathBuf>,
        notify_address: String,
        mode: VerificationMode,
        priority: JobPriority,
    ) -> tokio::task::JoinHandle<HashMap<PathBuf, String>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.process(paths, &notify_address, mode, priority).await
        })
    }

    /// Verify all documents concurrently on the worker pool; write each
    /// outcome back onto its job. Returns the paths that may proceed.
    async fn run_validation_phase(
        &self,
        job_ids: &HashMap<PathBuf, String>,
        mode: VerificationMode,
    ) -> Vec<PathBuf> {
        let strategy: Arc<dyn VerificationStrategy> =
            strategy_for(mode, &self.config.validation).into();
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.worker_count));
        let mut tasks: JoinSet<(PathBuf, VerificationResult)> = JoinSet::new();

        for path in job_ids.keys().cloned() {
            let strategy = Arc::clone(&strategy);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let checked = path.clone();
                // Verification is blocking disk work; keep it off the
                // async workers.
                let result = tokio::task::spawn_blocking(move || strategy.verify_one(&checked))
                    .await
                    .unwrap_or_else(|e| {
                        let mut r = VerificationResult::new();
                        r.add_issue(format!("Verification task failed: {e}"));
                        r
                    });
                (path, result)
            });
        }

        let mut passed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((path, result)) = joined else {
                // The per-task fallback above already converts panics
                // into failed results; a join error here loses the path,
                // so it can only be logged.
                error!("Verification worker lost");
                self.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let Some(id) = job_ids.get(&path) else { continue };

            if result.valid {
                for warning in &result.warnings {
                    warn!(job_id = %id, warning = %warning, "Verification warning");
                }
                self.store.transition(
                    id,
                    JobStatus::Submitting,
                    TransitionUpdate {
                        progress: Some(30),
                        phase: Some("submitting".to_string()),
                        verification: Some(result),
                        ..TransitionUpdate::default()
                    },
                );
                passed.push(path);
            } else {
                let error = result.issues.join("; ");
                warn!(job_id = %id, error = %error, "Document failed verification");
                self.store.transition(
                    id,
                    JobStatus::Failed,
                    TransitionUpdate {
                        phase: Some("validation failed".to_string()),
                        error: Some(error),
                        verification: Some(result),
                        ..TransitionUpdate::default()
                    },
                );
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        passed
    }

    /// Submit all validated documents concurrently. Returns
    /// remote correlation id -> job id for the monitor phase.
    async fn run_submission_phase(
        &self,
        job_ids: &HashMap<PathBuf, String>,
        validated: &[PathBuf],
    ) -> HashMap<String, String> {
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.worker_count));
        let ids_by_path: HashMap<&PathBuf, &String> = job_ids.iter().collect();
        let mut tasks: JoinSet<(PathBuf, Result<String, String>)> = JoinSet::new();

        for path in validated.iter().cloned() {
            let converter = Arc::clone(&self.converter);
            let semaphore = Arc::clone(&semaphore);
            let Some(job) = ids_by_path
                .get(&path)
                .and_then(|id| self.store.get(id))
            else {
                continue;
            };
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = converter
                    .submit(&path, &job.notify_address)
                    .await
                    .map_err(|e| e.to_string());
                (path, outcome)
            });
        }

        let mut remote_ids = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((path, outcome)) = joined else {
                error!("Submission worker lost");
                self.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let Some(id) = job_ids.get(&path) else { continue };

            match outcome {
                Ok(remote_id) => {
                    info!(job_id = %id, remote_id = %remote_id, "Submission accepted");
                    self.store.transition(
                        id,
                        JobStatus::Submitted,
                        TransitionUpdate {
                            progress: Some(60),
                            phase: Some("submitted".to_string()),
                            remote_id: Some(remote_id.clone()),
                            ..TransitionUpdate::default()
                        },
                    );
                    self.store.transition(
                        id,
                        JobStatus::Processing,
                        TransitionUpdate {
                            progress: Some(75),
                            phase: Some("awaiting result".to_string()),
                            ..TransitionUpdate::default()
                        },
                    );
                    remote_ids.insert(remote_id, id.clone());
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Submission failed");
                    self.store.transition(
                        id,
                        JobStatus::Failed,
                        TransitionUpdate {
                            phase: Some("submission failed".to_string()),
                            error: Some(e),
                            ..TransitionUpdate::default()
                        },
                    );
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        remote_ids
    }

    /// One shared mailbox poll for every processing job, then fan the
    /// results back onto the jobs.
    async fn run_monitor_phase(&self, remote_ids: &HashMap<String, String>) {
        // Each batch gets its own monitor so the at-most-once message set
        // is not shared across concurrent process() calls.
        let mut monitor =
            MailboxMonitor::new(Arc::clone(&self.mail_transport), self.config.mailbox.clone());
        let requested: Vec<String> = remote_ids.keys().cloned().collect();
        let results = monitor
            .search_results(
                &requested,
                self.config.mailbox.search_window_hours,
                self.config.mailbox.max_wait_minutes,
            )
            .await;

        for (remote_id, job_id) in remote_ids {
            let result = results.get(remote_id);
            match result {
                Some(r) if r.was_found() && r.is_success => {
                    self.store.transition(
                        job_id,
                        JobStatus::Completed,
                        TransitionUpdate {
                            phase: Some("completed".to_string()),
                            download_links: Some(r.download_links.clone()),
                            ..TransitionUpdate::default()
                        },
                    );
                    self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                }
                Some(r) if r.was_found() && r.is_error => {
                    self.store.transition(
                        job_id,
                        JobStatus::Failed,
                        TransitionUpdate {
                            phase: Some("remote conversion failed".to_string()),
                            error: Some(format!(
                                "Remote side reported failure: {}",
                                r.subject
                            )),
                            ..TransitionUpdate::default()
                        },
                    );
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
                other => {
                    // A notification naming neither success nor error
                    // keywords carries no verdict; the job times out like
                    // a silent mailbox.
                    let error = match other.filter(|r| r.was_found()) {
                        Some(r) => format!("Notification gave no verdict: {}", r.subject),
                        None => format!(
                            "No result notification within {} minutes",
                            self.config.mailbox.max_wait_minutes
                        ),
                    };
                    self.store.transition(
                        job_id,
                        JobStatus::Timeout,
                        TransitionUpdate {
                            phase: Some("result wait exceeded".to_string()),
                            error: Some(error),
                            ..TransitionUpdate::default()
                        },
                    );
                }
            }
        }

        self.forward_sampler_alerts();
    }

    /// Surface unresolved sampler alerts in the pipeline log. A critical
    /// alert is a soft degradation signal, not a circuit breaker: in-flight
    /// jobs continue.
    fn forward_sampler_alerts(&self) {
        for alert in self.sampler.unresolved_alerts() {
            match alert.severity {
                AlertSeverity::Critical => {
                    warn!(metric = %alert.metric, message = %alert.message, "Critical resource alert")
                }
                AlertSeverity::Warning => {
                    warn!(metric = %alert.metric, message = %alert.message, "Resource alert")
                }
            }
        }
    }

    fn update_active_gauge(&self) {
        self.sampler
            .set_active_jobs(self.store.list_active().len() as u64);
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            store: self.store.statistics(),
            sampler: self.sampler.summary(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Pull a single result on demand for a job the mailbox never
    /// resolved. Retrying the monitor phase, not the whole pipeline.
    ///
    /// When the mailbox still has nothing, the conversion service is
    /// polled directly and its state is mapped onto the same result
    /// shape; an in-flight state comes back as the not-found sentinel.
    pub async fn refresh_result(&self, job_id: &str) -> Option<EmailSearchResult> {
        let job = self.store.get(job_id)?;
        let remote_id = job.remote_id?;
        let mut monitor =
            MailboxMonitor::new(Arc::clone(&self.mail_transport), self.config.mailbox.clone());
        let mut results = monitor
            .search_results(
                std::slice::from_ref(&remote_id),
                self.config.mailbox.search_window_hours,
                0,
            )
            .await;
        let from_mailbox = results.remove(&remote_id)?;
        if from_mailbox.was_found() {
            return Some(from_mailbox);
        }

        match self.converter.fetch_result(&remote_id).await {
            Ok(outcome) => Some(status_poll_result(outcome)),
            Err(e) => {
                warn!(job_id, remote_id = %remote_id, error = %e, "Status poll failed");
                Some(from_mailbox)
            }
        }
    }
}

/// Map a conversion-service status poll onto the notification result
/// shape. A state that is still in flight yields the not-found sentinel.
fn status_poll_result(outcome: ConversionOutcome) -> EmailSearchResult {
    let state = outcome.state.to_lowercase();
    let is_success = matches!(state.as_str(), "completed" | "done" | "finished");
    let is_error = matches!(state.as_str(), "failed" | "error" | "rejected");
    if !is_success && !is_error {
        return EmailSearchResult::not_found();
    }
    EmailSearchResult {
        // No message backs a status poll; key the synthetic id on the
        // remote id instead.
        message_id: format!("status-poll:{}", outcome.remote_id),
        subject: format!("Status poll: {} {}", outcome.remote_id, outcome.state),
        sender: String::new(),
        received_at: None,
        correlation_id: Some(outcome.remote_id),
        download_links: outcome.download_links,
        body_excerpt: String::new(),
        is_success,
        is_error,
    }
}
