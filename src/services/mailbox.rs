use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::models::email::EmailSearchResult;

/// Upper bound on remembered message ids for at-most-once handling.
const PROCESSED_ID_CAP: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mail gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail gateway returned malformed payload: {0}")]
    Payload(String),
}

/// An inbound message as delivered by the transport, before correlation.
#[derive(Debug, Clone)]
pub struct RawMailMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Read-only access to the result mailbox. The pipeline never sends mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Fetch messages received since `since` from the given sender
    /// domains. The transport may over-fetch; the monitor re-checks the
    /// sender domain on every message.
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        sender_domains: &[String],
    ) -> Result<Vec<RawMailMessage>, MailboxError>;

    /// Release the mailbox connection. Idempotent.
    async fn close(&self) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    id: String,
    subject: String,
    from: String,
    #[serde(default)]
    body: String,
    received_at: DateTime<Utc>,
}

/// Production transport: polls a mail-retrieval gateway over HTTP with
/// basic credentials.
pub struct HttpMailboxTransport {
    http: reqwest::Client,
    base_url: String,
    account: String,
    password: String,
}

impl HttpMailboxTransport {
    pub fn new(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            account: config.account.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailboxTransport {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        sender_domains: &[String],
    ) -> Result<Vec<RawMailMessage>, MailboxError> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.account, Some(&self.password))
            .query(&[
                ("since", since.to_rfc3339()),
                ("senders", sender_domains.join(",")),
            ])
            .send()
            .await?
            .error_for_status()?;

        let messages: Vec<GatewayMessage> = response.json().await?;
        Ok(messages
            .into_iter()
            .map(|m| RawMailMessage {
                id: m.id,
                subject: m.subject,
                sender: m.from,
                body: m.body,
                received_at: m.received_at,
            })
            .collect())
    }
}

/// Ordered correlation-id extraction patterns; first match wins.
/// Labelled ids (English and German) rank above URL-embedded ids, which
/// rank above bare timestamp-prefixed tokens.
fn correlation_patterns() -> Vec<Regex> {
    [
        r"(?i)(?:reference|job|ticket|auftrags?|vorgangs?)[\s_-]*(?:id|nr|no|number|nummer)?\s*[:#]\s*([A-Za-z0-9][A-Za-z0-9_-]{3,})",
        r#"(?i)https?://[^\s"'<>]*[?&/](?:id|job|ref)=([A-Za-z0-9][A-Za-z0-9_-]{3,})"#,
        r"\b(20\d{6,}[-_][A-Za-z0-9][A-Za-z0-9_-]{3,})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("correlation pattern must compile"))
    .collect()
}

fn link_pattern() -> Regex {
    Regex::new(r#"https?://[^\s"'<>\)]+"#).expect("link pattern must compile")
}

/// Polls the result mailbox and correlates inbound notifications to
/// submitted jobs.
///
/// The processed-id set is private to one monitor instance; concurrent
/// batches must use independent monitors.
pub struct MailboxMonitor {
    transport: Arc<dyn MailTransport>,
    config: MailboxConfig,
    correlation_patterns: Vec<Regex>,
    link_pattern: Regex,
    processed: HashSet<String>,
    processed_order: VecDeque<String>,
}

impl MailboxMonitor {
    pub fn new(transport: Arc<dyn MailTransport>, config: MailboxConfig) -> Self {
        Self {
            transport,
            config,
            correlation_patterns: correlation_patterns(),
            link_pattern: link_pattern(),
            processed: HashSet::new(),
            processed_order: VecDeque::new(),
        }
    }

    /// Poll the mailbox until every requested correlation id has a result
    /// or `max_wait_minutes` elapses.
    ///
    /// The returned map holds exactly one entry per requested id; ids
    /// never found carry the [`EmailSearchResult::not_found`] sentinel. A
    /// transport failure aborts the current pass and returns what was
    /// accumulated; the connection is released on every exit path.
    pub async fn search_results(
        &mut self,
        correlation_ids: &[String],
        search_window_hours: u64,
        max_wait_minutes: u64,
    ) -> HashMap<String, EmailSearchResult> {
        let mut found: HashMap<String, EmailSearchResult> = HashMap::new();
        let since = Utc::now() - chrono::Duration::hours(search_window_hours as i64);
        let deadline = Instant::now() + Duration::from_secs(max_wait_minutes * 60);
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        info!(
            ids = correlation_ids.len(),
            window_hours = search_window_hours,
            max_wait_minutes,
            "Monitoring result mailbox"
        );

        loop {
            let trusted = self.config.trusted_senders.clone();
            match self.transport.fetch_since(since, &trusted).await {
                Ok(messages) => {
                    debug!(count = messages.len(), "Mailbox poll returned messages");
                    for message in messages {
                        self.process_message(message, correlation_ids, &mut found);
                    }
                }
                Err(e) => {
                    // One failed pass ends monitoring; the caller's
                    // timeout is the only retry budget.
                    warn!(error = %e, "Mailbox poll failed, returning accumulated results");
                    break;
                }
            }

            if correlation_ids.iter().all(|id| found.contains_key(id)) {
                debug!("All requested correlation ids resolved, stopping early");
                break;
            }

            let now = Instant::now();
            if now + poll_interval > deadline {
                info!("Result wait budget exhausted");
                break;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to release mailbox connection");
        }

        // Exactly one entry per requested id.
        for id in correlation_ids {
            found
                .entry(id.clone())
                .or_insert_with(EmailSearchResult::not_found);
        }
        found
    }

    fn process_message(
        &mut self,
        message: RawMailMessage,
        requested: &[String],
        found: &mut HashMap<String, EmailSearchResult>,
    ) {
        if self.processed.contains(&message.id) {
            return;
        }
        self.mark_processed(message.id.clone());

        let Some(domain) = sender_domain(&message.sender) else {
            warn!(sender = %message.sender, "Discarding message with unparseable sender");
            return;
        };
        if !self.is_trusted_domain(&domain) {
            warn!(sender = %message.sender, "Discarding message from untrusted sender");
            return;
        }

        let correlation_id = self
            .extract_correlation_id(&message.subject)
            .or_else(|| self.extract_correlation_id(&message.body));
        let Some(correlation_id) = correlation_id else {
            debug!(message_id = %message.id, "No correlation id in message");
            return;
        };
        if !requested.iter().any(|id| id == &correlation_id) {
            debug!(correlation_id = %correlation_id, "Correlation id not in requested set");
            return;
        }

        let combined = format!("{}\n{}", message.subject, message.body);
        let is_error = self.matches_any(&combined, &self.config.error_patterns);
        // Error keywords take precedence when both appear.
        let is_success = !is_error && self.matches_any(&combined, &self.config.success_patterns);

        let download_links: Vec<String> = self
            .link_pattern
            .find_iter(&message.body)
            .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
            .filter(|link| {
                link_host(link)
                    .map(|h| self.is_trusted_domain(&h))
                    .unwrap_or(false)
            })
            .collect();

        info!(
            correlation_id = %correlation_id,
            message_id = %message.id,
            is_success,
            is_error,
            links = download_links.len(),
            "Correlated result notification"
        );

        found.insert(
            correlation_id.clone(),
            EmailSearchResult {
                message_id: message.id,
                subject: message.subject,
                sender: message.sender,
                received_at: Some(message.received_at),
                correlation_id: Some(correlation_id),
                download_links,
                body_excerpt: EmailSearchResult::truncate_body(&message.body),
                is_success,
                is_error,
            },
        );
    }

    fn extract_correlation_id(&self, text: &str) -> Option<String> {
        for pattern in &self.correlation_patterns {
            if let Some(captures) = pattern.captures(text) {
                if let Some(id) = captures.get(1) {
                    return Some(id.as_str().to_string());
                }
            }
        }
        None
    }

    fn matches_any(&self, text: &str, patterns: &[String]) -> bool {
        let lower = text.to_lowercase();
        patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
    }

    /// Case-insensitive domain match, accepting subdomains of a trusted
    /// domain.
    fn is_trusted_domain(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.config.trusted_senders.iter().any(|trusted| {
            let trusted = trusted.to_lowercase();
            domain == trusted || domain.ends_with(&format!(".{trusted}"))
        })
    }

    fn mark_processed(&mut self, id: String) {
        if self.processed.len() >= PROCESSED_ID_CAP {
            if let Some(oldest) = self.processed_order.pop_front() {
                self.processed.remove(&oldest);
            }
        }
        self.processed.insert(id.clone());
        self.processed_order.push_back(id);
    }
}

fn sender_domain(sender: &str) -> Option<String> {
    // Accepts both "Name <user@host>" and bare "user@host".
    let address = sender
        .rsplit_once('<')
        .map(|(_, rest)| rest.trim_end_matches('>'))
        .unwrap_or(sender);
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}

fn link_host(link: &str) -> Option<String> {
    let rest = link.strip_prefix("https://").or_else(|| link.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}
