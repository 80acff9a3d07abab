//! Shared test fixtures: synthetic office containers and scripted
//! collaborator mocks.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use doc_preflight::models::job::{Job, JobStatus};
use doc_preflight::services::converter::{ConversionOutcome, ConversionService, ConverterError};
use doc_preflight::services::mailbox::{MailTransport, MailboxError, RawMailMessage};
use doc_preflight::services::store::JobObserver;

pub const TRUSTED_SENDER: &str = "noreply@conversion-service.example.com";
pub const TRUSTED_HOST: &str = "conversion-service.example.com";

/// Write a minimal valid OOXML container.
pub fn write_docx(path: &Path) {
    write_container(
        path,
        &[
            ("[Content_Types].xml", b"<Types/>".as_slice()),
            ("word/document.xml", b"<w:document/>".as_slice()),
        ],
    );
}

/// Write a container whose uncompressed size dwarfs its compressed size.
pub fn write_expansion_bomb(path: &Path) {
    let payload = vec![b'A'; 4 * 1024 * 1024];
    write_container(
        path,
        &[
            ("[Content_Types].xml", b"<Types/>".as_slice()),
            ("word/document.xml", payload.as_slice()),
        ],
    );
}

pub fn write_container(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Conversion-service mock that assigns sequential remote ids and keeps
/// the submitted set shared with the mailbox mock.
pub struct MockConverter {
    pub submitted: Arc<Mutex<Vec<(PathBuf, String)>>>,
    counter: AtomicU32,
    pub fail_all: bool,
    /// While false, status polls report "processing"; flip to make every
    /// poll report a finished conversion with a download link.
    pub remote_done: Arc<AtomicBool>,
}

impl MockConverter {
    pub fn new(submitted: Arc<Mutex<Vec<(PathBuf, String)>>>) -> Self {
        Self {
            submitted,
            counter: AtomicU32::new(0),
            fail_all: false,
            remote_done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing(submitted: Arc<Mutex<Vec<(PathBuf, String)>>>) -> Self {
        Self {
            submitted,
            counter: AtomicU32::new(0),
            fail_all: true,
            remote_done: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ConversionService for MockConverter {
    async fn submit(&self, path: &Path, _notify_address: &str) -> Result<String, ConverterError> {
        if self.fail_all {
            return Err(ConverterError::Rejected("service unavailable".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let remote_id = format!("RJ-{:04}", 1000 + n);
        self.submitted
            .lock()
            .unwrap()
            .push((path.to_path_buf(), remote_id.clone()));
        Ok(remote_id)
    }

    async fn fetch_result(&self, remote_id: &str) -> Result<ConversionOutcome, ConverterError> {
        if self.remote_done.load(Ordering::SeqCst) {
            Ok(ConversionOutcome {
                remote_id: remote_id.to_string(),
                state: "completed".to_string(),
                download_links: vec![format!("https://{TRUSTED_HOST}/dl/{remote_id}")],
            })
        } else {
            Ok(ConversionOutcome {
                remote_id: remote_id.to_string(),
                state: "processing".to_string(),
                download_links: Vec::new(),
            })
        }
    }
}

/// How the mocked mailbox answers each poll.
#[derive(Clone, Copy)]
pub enum MailboxBehavior {
    /// A success notification for every submitted remote id.
    SuccessForAll,
    /// An error notification for every submitted remote id.
    ErrorForAll,
    /// A correlated notification whose text names neither success nor
    /// error keywords.
    NeutralForAll,
    /// No messages ever arrive.
    Silent,
}

/// Mailbox mock fabricating notifications for the remote ids the
/// converter mock has handed out. The behavior cell is shared so tests
/// can change the answer between polls.
pub struct MockMailbox {
    pub submitted: Arc<Mutex<Vec<(PathBuf, String)>>>,
    pub behavior: Arc<Mutex<MailboxBehavior>>,
}

#[async_trait]
impl MailTransport for MockMailbox {
    async fn fetch_since(
        &self,
        _since: DateTime<Utc>,
        _sender_domains: &[String],
    ) -> Result<Vec<RawMailMessage>, MailboxError> {
        let behavior = *self.behavior.lock().unwrap();
        let submitted = self.submitted.lock().unwrap().clone();
        let messages = submitted
            .iter()
            .enumerate()
            .filter_map(|(i, (_, remote_id))| match behavior {
                MailboxBehavior::Silent => None,
                MailboxBehavior::SuccessForAll => Some(RawMailMessage {
                    id: format!("msg-ok-{i}"),
                    subject: format!("Job ID: {remote_id} conversion complete"),
                    sender: TRUSTED_SENDER.to_string(),
                    body: format!(
                        "Successfully converted. Download your file: https://{TRUSTED_HOST}/dl/{remote_id}"
                    ),
                    received_at: Utc::now(),
                }),
                MailboxBehavior::ErrorForAll => Some(RawMailMessage {
                    id: format!("msg-err-{i}"),
                    subject: format!("Job ID: {remote_id} conversion failed"),
                    sender: TRUSTED_SENDER.to_string(),
                    body: "The document could not be processed.".to_string(),
                    received_at: Utc::now(),
                }),
                MailboxBehavior::NeutralForAll => Some(RawMailMessage {
                    id: format!("msg-info-{i}"),
                    subject: format!("Job ID: {remote_id} status update"),
                    sender: TRUSTED_SENDER.to_string(),
                    body: "Your document is still in the queue.".to_string(),
                    received_at: Utc::now(),
                }),
            })
            .collect();
        Ok(messages)
    }
}

/// Observer recording every (job id, status) transition in order.
#[derive(Default)]
pub struct TransitionRecorder {
    pub seen: Mutex<Vec<(String, JobStatus)>>,
}

impl JobObserver for TransitionRecorder {
    fn on_job_changed(&self, id: &str, job: &Job) {
        self.seen.lock().unwrap().push((id.to_string(), job.status));
    }
}

impl TransitionRecorder {
    /// Status sequence observed for one job id.
    pub fn sequence_for(&self, id: &str) -> Vec<JobStatus> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen_id, _)| seen_id == id)
            .map(|(_, status)| *status)
            .collect()
    }
}
