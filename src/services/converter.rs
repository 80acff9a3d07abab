use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ConverterConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("conversion service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read document {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("conversion service rejected submission: {0}")]
    Rejected(String),
}

/// Result payload fetched for a remote id.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionOutcome {
    pub remote_id: String,
    pub state: String,
    #[serde(default)]
    pub download_links: Vec<String>,
}

/// Outbound interface to the conversion collaborator. The wire format is
/// opaque to the pipeline; only submit/fetch semantics matter.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Upload one document; a successful submission yields the remote
    /// correlation id.
    async fn submit(&self, path: &Path, notify_address: &str) -> Result<String, ConverterError>;

    /// Fetch the current result for a previously submitted document.
    async fn fetch_result(&self, remote_id: &str) -> Result<ConversionOutcome, ConverterError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// HTTP client for the conversion service, authenticated with a bearer
/// token.
pub struct HttpConversionClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpConversionClient {
    pub fn new(config: &ConverterConfig) -> Result<Self, ConverterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl ConversionService for HttpConversionClient {
    async fn submit(&self, path: &Path, notify_address: &str) -> Result<String, ConverterError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ConverterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("notify_address", notify_address.to_string());

        let response = self
            .http
            .post(format!("{}/conversions", self.endpoint))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConverterError::Rejected(format!("{status}: {body}")));
        }

        let submitted: SubmitResponse = response.json().await?;
        debug!(remote_id = %submitted.job_id, path = %path.display(), "Document submitted");
        Ok(submitted.job_id)
    }

    async fn fetch_result(&self, remote_id: &str) -> Result<ConversionOutcome, ConverterError> {
        let response = self
            .http
            .get(format!("{}/conversions/{remote_id}", self.endpoint))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
