use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::job::{Job, JobPriority, JobStatus};
use crate::models::verification::VerificationResult;

/// Observer notified synchronously on every job transition.
///
/// Implementations must not panic; a panic is caught at the call site,
/// logged once, and never propagated to the writer.
pub trait JobObserver: Send + Sync {
    fn on_job_changed(&self, id: &str, job: &Job);
}

/// Optional field updates applied together with a status transition.
#[derive(Debug, Default, Clone)]
pub struct TransitionUpdate {
    pub progress: Option<u8>,
    pub phase: Option<String>,
    pub error: Option<String>,
    pub remote_id: Option<String>,
    pub download_links: Option<Vec<String>>,
    pub verification: Option<VerificationResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job id already exists: {0}")]
    DuplicateId(String),
}

/// On-disk shape of the persisted state file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    saved_at: DateTime<Utc>,
    jobs: HashMap<String, Job>,
}

/// Aggregate figures over all stored jobs.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatistics {
    pub total_jobs: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub total_bytes: u64,
    /// Completed / terminal, 0.0 when nothing is terminal yet.
    pub success_rate: f64,
    pub mean_completion_ms: Option<i64>,
}

struct StoreInner {
    jobs: HashMap<String, Job>,
    observers: Vec<Arc<dyn JobObserver>>,
}

/// Persisted, observable state machine for conversion jobs.
///
/// All mutating operations take the single inner lock, mutate the map,
/// rewrite the state file (write-through), and notify observers before
/// releasing, so transitions for one job id are totally ordered and a
/// crash loses at most the in-flight operation.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    state_path: PathBuf,
}

impl JobStore {
    /// Open a store backed by `state_path`, loading any previously
    /// persisted jobs. An unreadable state file is logged and skipped.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let jobs = match std::fs::read_to_string(&state_path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    info!(
                        path = %state_path.display(),
                        jobs = state.jobs.len(),
                        "Loaded persisted job state"
                    );
                    state.jobs
                }
                Err(e) => {
                    warn!(path = %state_path.display(), error = %e, "Ignoring corrupt state file");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            inner: Mutex::new(StoreInner {
                jobs,
                observers: Vec::new(),
            }),
            state_path,
        }
    }

    /// Create a new job in `Pending`.
    pub fn create(
        &self,
        id: &str,
        source_path: &str,
        notify_address: &str,
        priority: JobPriority,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        let job = Job::new(id, source_path, notify_address, priority);
        inner.jobs.insert(id.to_string(), job.clone());
        self.persist(&inner);
        Self::notify(&inner, id, &job);
        debug!(job_id = id, path = source_path, "Job created");
        Ok(job)
    }

    /// Apply a status transition plus optional field updates.
    ///
    /// Returns false (and logs) for an unknown id or an illegal
    /// transition; callers must treat false as a lost job, not a crash.
    pub fn transition(&self, id: &str, new_status: JobStatus, update: TransitionUpdate) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(id) else {
            warn!(job_id = id, status = %new_status, "Transition for unknown job id");
            return false;
        };

        if !job.status.can_transition_to(new_status) {
            warn!(
                job_id = id,
                from = %job.status,
                to = %new_status,
                "Illegal job transition refused"
            );
            return false;
        }

        job.status = new_status;
        job.updated_at = Utc::now();
        if let Some(phase) = update.phase {
            job.phase = phase;
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(remote_id) = update.remote_id {
            job.remote_id = Some(remote_id);
        }
        if let Some(links) = update.download_links {
            job.download_links = links;
        }
        if let Some(verification) = update.verification {
            job.size_bytes = verification.size_bytes.max(job.size_bytes);
            job.verification = Some(verification);
        }

        // Invariants: progress is 100 exactly for Completed, and
        // completed_at is set exactly for terminal states.
        if new_status == JobStatus::Completed {
            job.progress = 100;
        } else if let Some(p) = update.progress {
            job.progress = p.min(99);
        }
        if new_status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }

        let snapshot = job.clone();
        self.persist(&inner);
        Self::notify(&inner, id, &snapshot);
        debug!(job_id = id, status = %new_status, "Job transitioned");
        true
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(id).cloned()
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    pub fn list_active(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Job> {
        self.inner.lock().unwrap().jobs.values().cloned().collect()
    }

    /// Re-queue a failed job. Succeeds iff the job is `Failed` and has
    /// retries left; resets progress and clears the terminal marker.
    pub fn retry(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(id) else {
            warn!(job_id = id, "Retry for unknown job id");
            return false;
        };
        if job.status != JobStatus::Failed {
            warn!(job_id = id, status = %job.status, "Retry refused: job is not failed");
            return false;
        }
        if job.retry_count >= job.max_retries {
            warn!(
                job_id = id,
                retry_count = job.retry_count,
                "Retry refused: max retries reached"
            );
            return false;
        }

        job.status = JobStatus::Pending;
        job.progress = 0;
        job.phase = "queued (retry)".to_string();
        job.error = None;
        job.remote_id = None;
        job.completed_at = None;
        job.retry_count += 1;
        job.updated_at = Utc::now();

        let snapshot = job.clone();
        self.persist(&inner);
        Self::notify(&inner, id, &snapshot);
        info!(job_id = id, retry_count = snapshot.retry_count, "Job re-queued for retry");
        true
    }

    /// Cancel a job; honored only while it is not already terminal. Does
    /// not abort remote calls already in flight for this job.
    pub fn cancel(&self, id: &str) -> bool {
        self.transition(
            id,
            JobStatus::Cancelled,
            TransitionUpdate {
                phase: Some("cancelled".to_string()),
                ..TransitionUpdate::default()
            },
        )
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.jobs.remove(id).is_some();
        if removed {
            self.persist(&inner);
        }
        removed
    }

    pub fn subscribe(&self, observer: Arc<dyn JobObserver>) {
        self.inner.lock().unwrap().observers.push(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn JobObserver>) {
        self.inner
            .lock()
            .unwrap()
            .observers
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn statistics(&self) -> StoreStatistics {
        let inner = self.inner.lock().unwrap();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_priority: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_bytes = 0_u64;
        let mut terminal = 0_usize;
        let mut completed = 0_usize;
        let mut latencies_ms: Vec<i64> = Vec::new();

        for job in inner.jobs.values() {
            *by_status.entry(job.status.to_string()).or_default() += 1;
            *by_priority.entry(job.priority.to_string()).or_default() += 1;
            total_bytes += job.size_bytes;
            if job.is_terminal() {
                terminal += 1;
                if job.status == JobStatus::Completed {
                    completed += 1;
                    if let Some(latency) = job.completion_latency() {
                        latencies_ms.push(latency.num_milliseconds());
                    }
                }
            }
        }

        let success_rate = if terminal == 0 {
            0.0
        } else {
            completed as f64 / terminal as f64
        };
        let mean_completion_ms = if latencies_ms.is_empty() {
            None
        } else {
            Some(latencies_ms.iter().sum::<i64>() / latencies_ms.len() as i64)
        };

        StoreStatistics {
            total_jobs: inner.jobs.len(),
            by_status,
            by_priority,
            total_bytes,
            success_rate,
            mean_completion_ms,
        }
    }

    /// Delete terminal jobs older than `retention`; persists once per
    /// sweep. Returns the number of evicted jobs.
    pub fn reap(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, job| match (job.is_terminal(), job.completed_at) {
                (true, Some(done)) => done > cutoff,
                _ => true,
            });
        let evicted = before - inner.jobs.len();
        if evicted > 0 {
            self.persist(&inner);
            info!(evicted, "Reaper evicted terminal jobs");
        }
        evicted
    }

    /// Rewrite the full state file under the held lock (write-through).
    /// Persistence failures are logged, never propagated.
    fn persist(&self, inner: &StoreInner) {
        let state = PersistedState {
            saved_at: Utc::now(),
            jobs: inner.jobs.clone(),
        };
        let result = serde_json::to_vec_pretty(&state).map_err(std::io::Error::other).and_then(|bytes| {
            let tmp = self.state_path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, &self.state_path)
        });
        if let Err(e) = result {
            error!(path = %self.state_path.display(), error = %e, "Failed to persist job state");
        }
    }

    fn notify(inner: &StoreInner, id: &str, job: &Job) {
        for observer in &inner.observers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_job_changed(id, job);
            }));
            if outcome.is_err() {
                error!(job_id = id, "Job observer panicked; notification dropped");
            }
        }
    }
}

/// Handle to the background reaper; `close` stops and joins it.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the periodic reaper sweep for `store`.
pub fn spawn_reaper(
    store: Arc<JobStore>,
    interval: Duration,
    retention: Duration,
) -> ReaperHandle {
    let (shutdown, mut rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh store is
        // not swept at startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.reap(retention);
                }
                _ = rx.changed() => {
                    debug!("Reaper shutting down");
                    break;
                }
            }
        }
    });
    ReaperHandle { shutdown, task }
}
