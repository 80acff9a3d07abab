use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use doc_preflight::config::PipelineConfig;
use doc_preflight::services::converter::HttpConversionClient;
use doc_preflight::services::mailbox::HttpMailboxTransport;
use doc_preflight::services::orchestrator::PipelineOrchestrator;
use doc_preflight::services::sampler::{self, PerformanceSampler};
use doc_preflight::services::store::{self, JobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let documents: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if documents.is_empty() {
        eprintln!("usage: doc-preflight <document>...");
        std::process::exit(2);
    }

    // Load configuration
    let config_path =
        std::env::var("PREFLIGHT_CONFIG").unwrap_or_else(|_| "preflight.toml".to_string());
    let config = PipelineConfig::load(&config_path).expect("Failed to load configuration");

    let notify_address = std::env::var("PREFLIGHT_NOTIFY_ADDRESS")
        .expect("PREFLIGHT_NOTIFY_ADDRESS must be set to the result notification address");

    tracing::info!(config = %config_path, "Initializing preflight pipeline");

    // Construct components (explicit single-owner lifecycle)
    let store = Arc::new(JobStore::new(&config.storage.state_path));
    let reaper = store::spawn_reaper(
        Arc::clone(&store),
        Duration::from_secs(config.storage.reaper_interval_secs),
        Duration::from_secs(config.storage.retention_hours * 3600),
    );

    let sampler = Arc::new(PerformanceSampler::new(config.monitoring.clone()));
    let sampler_task = sampler::spawn_sampler(
        Arc::clone(&sampler),
        Duration::from_secs(config.monitoring.sample_interval_secs),
    );

    let converter =
        HttpConversionClient::new(&config.converter).expect("Failed to initialize conversion client");
    let mail_transport =
        HttpMailboxTransport::new(&config.mailbox).expect("Failed to initialize mailbox transport");

    let mode = config.validation.mode;
    let priority = config.pipeline.default_priority;
    let orchestrator = PipelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(converter),
        Arc::new(mail_transport),
        Arc::clone(&sampler),
        config,
    );

    tracing::info!(batch = documents.len(), "Pipeline ready, processing batch");

    let job_ids = orchestrator
        .process(documents, &notify_address, mode, priority)
        .await;

    for (path, job_id) in &job_ids {
        if let Some(job) = store.get(job_id) {
            tracing::info!(
                path = %path.display(),
                job_id = %job_id,
                status = %job.status,
                error = job.error.as_deref().unwrap_or(""),
                links = job.download_links.len(),
                "Job finished"
            );
        }
    }

    let status = orchestrator.system_status();
    println!(
        "{}",
        serde_json::to_string_pretty(&status).expect("status must serialize")
    );

    // Tear down background tasks before exit
    sampler_task.close().await;
    reaper.close().await;
}
