use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::verification::VerificationResult;

/// Status of a conversion job in the preflight pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    Submitting,
    Submitted,
    Processing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    /// Terminal states receive no further automatic transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// The single legal successor in the linear pipeline order.
    /// Cancellation and retry are handled separately by the store.
    pub fn next_in_line(self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => Some(JobStatus::Validating),
            JobStatus::Validating => Some(JobStatus::Submitting),
            JobStatus::Submitting => Some(JobStatus::Submitted),
            JobStatus::Submitted => Some(JobStatus::Processing),
            _ => None,
        }
    }

    /// Whether a direct transition `self -> new` is legal.
    ///
    /// Legal moves: the next linear state, any terminal state from a
    /// non-terminal one, and staying in place (progress/phase updates).
    pub fn can_transition_to(self, new: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if new == self || new.is_terminal() {
            return true;
        }
        self.next_in_line() == Some(new)
    }
}

/// Priority assigned to a job at submission time.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Default number of times a failed job may be re-queued.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One document's progress through the pipeline.
///
/// The id is caller-assigned and immutable; every other mutable field is
/// updated exclusively through [`JobStore::transition`].
///
/// [`JobStore::transition`]: crate::services::store::JobStore::transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_path: String,
    pub notify_address: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Progress percentage, 0..=100. Exactly 100 iff status is Completed.
    pub progress: u8,
    /// Human-readable label for the current pipeline phase.
    pub phase: String,
    /// Identifier assigned by the remote conversion service after submission.
    pub remote_id: Option<String>,
    pub download_links: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set iff the job has reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub verification: Option<VerificationResult>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    pub fn new(id: &str, source_path: &str, notify_address: &str, priority: JobPriority) -> Self {
        let now = Utc::now();
        let size_bytes = std::fs::metadata(source_path).map(|m| m.len()).unwrap_or(0);
        Self {
            id: id.to_string(),
            source_path: source_path.to_string(),
            notify_address: notify_address.to_string(),
            priority,
            status: JobStatus::Pending,
            progress: 0,
            phase: "queued".to_string(),
            remote_id: None,
            download_links: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            size_bytes,
            verification: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock latency from creation to completion, if terminal.
    pub fn completion_latency(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}
