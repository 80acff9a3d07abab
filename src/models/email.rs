use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of body characters kept on a search result.
pub const BODY_EXCERPT_CAP: usize = 500;

/// One inbound result notification, correlated to at most one job.
///
/// Created transiently during a monitor poll; the monitor returns exactly
/// one of these per requested correlation id. Ids that never arrived get
/// the [`EmailSearchResult::not_found`] sentinel (empty `message_id`) so
/// callers can distinguish "not yet arrived" from "arrived but errored".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSearchResult {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub download_links: Vec<String>,
    pub body_excerpt: String,
    pub is_success: bool,
    pub is_error: bool,
}

impl EmailSearchResult {
    /// Sentinel for a correlation id no message matched.
    pub fn not_found() -> Self {
        Self {
            message_id: String::new(),
            subject: String::new(),
            sender: String::new(),
            received_at: None,
            correlation_id: None,
            download_links: Vec::new(),
            body_excerpt: String::new(),
            is_success: false,
            is_error: false,
        }
    }

    pub fn was_found(&self) -> bool {
        !self.message_id.is_empty()
    }

    /// Truncate a message body to the excerpt cap on a char boundary.
    pub fn truncate_body(body: &str) -> String {
        if body.chars().count() <= BODY_EXCERPT_CAP {
            body.to_string()
        } else {
            body.chars().take(BODY_EXCERPT_CAP).collect()
        }
    }
}
