//! End-to-end pipeline scenarios with mocked collaborators.

mod fixtures;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use doc_preflight::config::{PipelineConfig, VerificationMode};
use doc_preflight::models::job::{JobPriority, JobStatus};
use doc_preflight::services::orchestrator::PipelineOrchestrator;
use doc_preflight::services::sampler::PerformanceSampler;
use doc_preflight::services::store::JobStore;

use fixtures::{
    write_docx, write_expansion_bomb, MailboxBehavior, MockConverter, MockMailbox,
    TransitionRecorder,
};

struct Harness {
    orchestrator: Arc<PipelineOrchestrator>,
    store: Arc<JobStore>,
    recorder: Arc<TransitionRecorder>,
    mailbox_behavior: Arc<Mutex<MailboxBehavior>>,
    remote_done: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

fn harness(behavior: MailboxBehavior, failing_converter: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.storage.state_path = dir
        .path()
        .join("jobs.json")
        .to_string_lossy()
        .into_owned();
    config.mailbox.poll_interval_secs = 1;
    // Single poll pass: the mocks answer deterministically.
    config.mailbox.max_wait_minutes = 0;

    let store = Arc::new(JobStore::new(&config.storage.state_path));
    let recorder = Arc::new(TransitionRecorder::default());
    store.subscribe(recorder.clone());

    let submitted = Arc::new(Mutex::new(Vec::new()));
    let converter = if failing_converter {
        MockConverter::failing(submitted.clone())
    } else {
        MockConverter::new(submitted.clone())
    };
    let remote_done = converter.remote_done.clone();
    let mailbox_behavior = Arc::new(Mutex::new(behavior));
    let mailbox = MockMailbox {
        submitted,
        behavior: mailbox_behavior.clone(),
    };
    let sampler = Arc::new(PerformanceSampler::new(config.monitoring.clone()));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(converter),
        Arc::new(mailbox),
        sampler,
        config,
    ));

    Harness {
        orchestrator,
        store,
        recorder,
        mailbox_behavior,
        remote_done,
        _dir: dir,
    }
}

#[tokio::test]
async fn scenario_a_batch_of_three_valid_documents() {
    let h = harness(MailboxBehavior::SuccessForAll, false);
    let docs: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = h._dir.path().join(format!("report_{i}.docx"));
            write_docx(&path);
            path
        })
        .collect();

    let job_ids = h
        .orchestrator
        .process(
            docs.clone(),
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;

    // One non-empty job id per input path.
    assert_eq!(job_ids.len(), 3);
    for doc in &docs {
        assert!(!job_ids[doc].is_empty());
    }

    for doc in &docs {
        let id = &job_ids[doc];
        let job = h.store.get(id).expect("job must exist");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.remote_id.is_some());
        assert!(!job.download_links.is_empty());

        // Every job reached Submitted (and then Processing) before any
        // monitoring outcome was applied.
        let sequence = h.recorder.sequence_for(id);
        let submitted_pos = sequence
            .iter()
            .position(|s| *s == JobStatus::Submitted)
            .expect("job must pass through Submitted");
        let completed_pos = sequence
            .iter()
            .position(|s| *s == JobStatus::Completed)
            .unwrap();
        assert!(submitted_pos < completed_pos);
    }

    let status = h.orchestrator.system_status();
    assert_eq!(status.files_processed, 3);
    assert_eq!(status.jobs_completed, 3);
    assert_eq!(status.errors, 0);
    assert_eq!(status.store.success_rate, 1.0);
}

#[tokio::test]
async fn scenario_b_missing_document_fails_sibling_proceeds() {
    let h = harness(MailboxBehavior::SuccessForAll, false);
    let good = h._dir.path().join("good.docx");
    write_docx(&good);
    let missing = h._dir.path().join("missing.docx");

    let job_ids = h
        .orchestrator
        .process(
            vec![good.clone(), missing.clone()],
            "ops@example.com",
            VerificationMode::Quick,
            JobPriority::Normal,
        )
        .await;

    assert_eq!(job_ids.len(), 2);

    let failed = h.store.get(&job_ids[&missing]).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("does not exist"));
    assert!(failed.completed_at.is_some());

    let ok = h.store.get(&job_ids[&good]).unwrap();
    assert_eq!(ok.status, JobStatus::Completed);
    let sequence = h.recorder.sequence_for(&job_ids[&good]);
    assert!(sequence.contains(&JobStatus::Submitting), "must proceed past validation");
}

#[tokio::test]
async fn scenario_c_silent_mailbox_ends_in_timeout() {
    let h = harness(MailboxBehavior::Silent, false);
    let doc = h._dir.path().join("report.docx");
    write_docx(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::High,
        )
        .await;

    let job = h.store.get(&job_ids[&doc]).unwrap();
    assert_eq!(job.status, JobStatus::Timeout);
    assert!(job.completed_at.is_some());
    assert!(job.remote_id.is_some(), "submission itself succeeded");
    assert!(job.error.as_deref().unwrap().contains("No result notification"));
}

#[tokio::test]
async fn scenario_d_expansion_bomb_is_warned_not_rejected() {
    let h = harness(MailboxBehavior::SuccessForAll, false);
    let doc = h._dir.path().join("generated.docx");
    write_expansion_bomb(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Thorough,
            JobPriority::Normal,
        )
        .await;

    let job = h.store.get(&job_ids[&doc]).unwrap();
    assert_eq!(job.status, JobStatus::Completed, "warning must not block submission");
    let verification = job.verification.expect("snapshot attached to job");
    assert!(verification
        .warnings
        .iter()
        .any(|w| w.contains("Expansion ratio")));
    assert!(verification.issues.is_empty());
}

#[tokio::test]
async fn notification_without_verdict_times_out() {
    let h = harness(MailboxBehavior::NeutralForAll, false);
    let doc = h._dir.path().join("report.docx");
    write_docx(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;

    // The notification correlated but named neither success nor error
    // keywords, which must read as a timeout rather than a failure.
    let job = h.store.get(&job_ids[&doc]).unwrap();
    assert_eq!(job.status, JobStatus::Timeout);
    assert!(job.remote_id.is_some());
    assert!(job.error.as_deref().unwrap().contains("no verdict"));
    assert_eq!(h.orchestrator.system_status().errors, 0);
}

#[tokio::test]
async fn refresh_result_resolves_after_timeout() {
    let h = harness(MailboxBehavior::Silent, false);
    let doc = h._dir.path().join("report.docx");
    write_docx(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;
    let id = &job_ids[&doc];
    assert_eq!(h.store.get(id).unwrap().status, JobStatus::Timeout);

    // The notification arrives late; re-invoking monitoring alone picks
    // it up without rerunning the pipeline.
    *h.mailbox_behavior.lock().unwrap() = MailboxBehavior::SuccessForAll;
    let result = h.orchestrator.refresh_result(id).await.unwrap();
    assert!(result.was_found());
    assert!(result.is_success);
    assert!(!result.download_links.is_empty());
}

#[tokio::test]
async fn refresh_result_falls_back_to_status_poll() {
    let h = harness(MailboxBehavior::Silent, false);
    let doc = h._dir.path().join("report.docx");
    write_docx(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;
    let id = &job_ids[&doc];
    assert_eq!(h.store.get(id).unwrap().status, JobStatus::Timeout);

    // Mailbox stays silent and the remote side is still converting.
    let pending = h.orchestrator.refresh_result(id).await.unwrap();
    assert!(!pending.was_found());

    // Once the conversion service reports completion the status poll
    // stands in for the missing notification.
    h.remote_done.store(true, Ordering::SeqCst);
    let result = h.orchestrator.refresh_result(id).await.unwrap();
    assert!(result.was_found());
    assert!(result.is_success);
    assert!(result.subject.contains("Status poll"));
    assert!(!result.download_links.is_empty());
}

#[tokio::test]
async fn remote_error_notification_fails_the_job() {
    let h = harness(MailboxBehavior::ErrorForAll, false);
    let doc = h._dir.path().join("report.docx");
    write_docx(&doc);

    let job_ids = h
        .orchestrator
        .process(
            vec![doc.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;

    let job = h.store.get(&job_ids[&doc]).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("Remote side reported failure"));

    // A remote failure is retryable through the store.
    assert!(h.store.retry(&job_ids[&doc]));
    assert_eq!(h.store.get(&job_ids[&doc]).unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn submission_failure_fails_job_without_aborting_batch() {
    let h = harness(MailboxBehavior::SuccessForAll, true);
    let a = h._dir.path().join("a.docx");
    let b = h._dir.path().join("b.docx");
    write_docx(&a);
    write_docx(&b);

    let job_ids = h
        .orchestrator
        .process(
            vec![a.clone(), b.clone()],
            "ops@example.com",
            VerificationMode::Standard,
            JobPriority::Normal,
        )
        .await;

    for doc in [&a, &b] {
        let job = h.store.get(&job_ids[doc]).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("service unavailable"));
    }
    assert_eq!(h.orchestrator.system_status().errors, 2);
}

#[tokio::test]
async fn concurrent_batches_complete_independently() {
    let h = harness(MailboxBehavior::SuccessForAll, false);
    let batch_a: Vec<PathBuf> = (0..2)
        .map(|i| {
            let p = h._dir.path().join(format!("a_{i}.docx"));
            write_docx(&p);
            p
        })
        .collect();
    let batch_b: Vec<PathBuf> = (0..2)
        .map(|i| {
            let p = h._dir.path().join(format!("b_{i}.docx"));
            write_docx(&p);
            p
        })
        .collect();

    let handles = vec![
        h.orchestrator.spawn_process(
            batch_a.clone(),
            "ops@example.com".to_string(),
            VerificationMode::Standard,
            JobPriority::Normal,
        ),
        h.orchestrator.spawn_process(
            batch_b.clone(),
            "ops@example.com".to_string(),
            VerificationMode::Standard,
            JobPriority::Low,
        ),
    ];

    let results: Vec<HashMap<PathBuf, String>> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for (result, batch) in results.iter().zip([&batch_a, &batch_b]) {
        assert_eq!(result.len(), 2);
        for doc in &**batch {
            let job = h.store.get(&result[doc]).unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
    }
}
