use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of verifying a single document.
///
/// `issues` are hard failures that exclude the document from submission;
/// `warnings` are soft findings surfaced to the caller but non-blocking.
/// Immutable once produced; stored as a snapshot on the owning job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub valid: bool,
    pub size_bytes: u64,
    /// Content type authenticated from container structure / magic bytes,
    /// not from the file extension alone.
    pub content_type: String,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    /// Strategy-specific figures (entry counts, compression ratios, ...).
    pub stats: BTreeMap<String, serde_json::Value>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            size_bytes: 0,
            content_type: "unknown".to_string(),
            issues: Vec::new(),
            warnings: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn add_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
        self.valid = false;
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate outcome of running one verification strategy over a batch.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub strategy: String,
    /// One entry per input path, in input order.
    pub results: Vec<(String, VerificationResult)>,
    pub all_valid: bool,
    pub execution_time: Duration,
    /// Batch-level counters: file/valid/invalid counts, byte totals,
    /// issue and warning tallies.
    pub statistics: BTreeMap<String, serde_json::Value>,
}

impl VerificationReport {
    pub fn from_results(
        strategy: &str,
        results: Vec<(String, VerificationResult)>,
        execution_time: Duration,
    ) -> Self {
        let total = results.len();
        let valid = results.iter().filter(|(_, r)| r.valid).count();
        let total_bytes: u64 = results.iter().map(|(_, r)| r.size_bytes).sum();
        let issue_count: usize = results.iter().map(|(_, r)| r.issues.len()).sum();
        let warning_count: usize = results.iter().map(|(_, r)| r.warnings.len()).sum();

        let mut statistics = BTreeMap::new();
        statistics.insert("strategy".to_string(), serde_json::json!(strategy));
        statistics.insert("files_checked".to_string(), serde_json::json!(total));
        statistics.insert("files_valid".to_string(), serde_json::json!(valid));
        statistics.insert("files_invalid".to_string(), serde_json::json!(total - valid));
        statistics.insert("total_bytes".to_string(), serde_json::json!(total_bytes));
        statistics.insert("issue_count".to_string(), serde_json::json!(issue_count));
        statistics.insert("warning_count".to_string(), serde_json::json!(warning_count));
        statistics.insert(
            "execution_ms".to_string(),
            serde_json::json!(execution_time.as_millis() as u64),
        );

        Self {
            strategy: strategy.to_string(),
            all_valid: valid == total,
            results,
            execution_time,
            statistics,
        }
    }

    pub fn result_for(&self, path: &str) -> Option<&VerificationResult> {
        self.results.iter().find(|(p, _)| p == path).map(|(_, r)| r)
    }
}
