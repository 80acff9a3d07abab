use std::path::Path;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::JobPriority;

/// Verification strictness selected by configuration.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationMode {
    Quick,
    #[default]
    Standard,
    Thorough,
    Custom,
}

/// Mail gateway access and result-monitoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MailboxConfig {
    /// Mail-retrieval gateway base URL.
    #[garde(length(min = 1))]
    pub gateway_url: String,

    #[garde(skip)]
    pub account: String,

    #[garde(skip)]
    pub password: String,

    /// Sleep between polls of the result mailbox.
    #[garde(range(min = 1, max = 3600))]
    pub poll_interval_secs: u64,

    /// Upper bound on one monitoring pass.
    #[garde(range(min = 1, max = 1440))]
    pub max_wait_minutes: u64,

    /// How far back to search for result messages.
    #[garde(range(min = 1, max = 720))]
    pub search_window_hours: u64,

    /// Sender domains accepted as authentic result sources.
    #[garde(length(min = 1))]
    pub trusted_senders: Vec<String>,

    /// Keyword patterns classifying a notification as success.
    #[garde(skip)]
    pub success_patterns: Vec<String>,

    /// Keyword patterns classifying a notification as an error.
    /// Error patterns take precedence when both match.
    #[garde(skip)]
    pub error_patterns: Vec<String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://mail-gateway.invalid/api".to_string(),
            account: String::new(),
            password: String::new(),
            poll_interval_secs: 30,
            max_wait_minutes: 30,
            search_window_hours: 24,
            trusted_senders: vec![
                "conversion-service.example.com".to_string(),
                "noreply.example.com".to_string(),
            ],
            success_patterns: vec![
                "conversion complete".to_string(),
                "successfully converted".to_string(),
                "erfolgreich konvertiert".to_string(),
                "download your file".to_string(),
            ],
            error_patterns: vec![
                "conversion failed".to_string(),
                "error".to_string(),
                "fehlgeschlagen".to_string(),
                "could not be processed".to_string(),
            ],
        }
    }
}

/// Conversion-service endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConverterConfig {
    #[garde(length(min = 1))]
    pub endpoint: String,

    #[garde(skip)]
    pub token: String,

    #[garde(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://converter.invalid/api/v1".to_string(),
            token: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Pre-submission document validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ValidationConfig {
    #[garde(range(min = 1))]
    pub max_file_size: u64,

    #[garde(skip)]
    pub min_file_size: u64,

    #[garde(length(min = 1))]
    pub allowed_extensions: Vec<String>,

    /// Substrings in a file name or path treated as injection markers.
    #[garde(skip)]
    pub dangerous_patterns: Vec<String>,

    #[garde(skip)]
    pub mode: VerificationMode,

    /// Extra regex/substring patterns for the custom strategy.
    #[garde(skip)]
    pub custom_patterns: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            min_file_size: 1,
            allowed_extensions: vec![
                "docx".to_string(),
                "xlsx".to_string(),
                "pptx".to_string(),
                "odt".to_string(),
                "ods".to_string(),
                "odp".to_string(),
                "pdf".to_string(),
            ],
            dangerous_patterns: vec![
                "../".to_string(),
                "..\\".to_string(),
                "javascript:".to_string(),
                "file://".to_string(),
                "data:".to_string(),
                "<script".to_string(),
            ],
            mode: VerificationMode::Standard,
            custom_patterns: Vec::new(),
        }
    }
}

/// Performance sampler cadence and alert thresholds (percentages).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitoringConfig {
    #[garde(range(min = 1, max = 3600))]
    pub sample_interval_secs: u64,

    /// Ring-buffer capacity for retained samples.
    #[garde(range(min = 1, max = 100_000))]
    pub history_limit: usize,

    #[garde(range(min = 1.0, max = 100.0))]
    pub cpu_warning_percent: f32,
    #[garde(range(min = 1.0, max = 100.0))]
    pub cpu_critical_percent: f32,
    #[garde(range(min = 1.0, max = 100.0))]
    pub memory_warning_percent: f32,
    #[garde(range(min = 1.0, max = 100.0))]
    pub memory_critical_percent: f32,
    #[garde(range(min = 1.0, max = 100.0))]
    pub disk_warning_percent: f32,
    #[garde(range(min = 1.0, max = 100.0))]
    pub disk_critical_percent: f32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            history_limit: 2880,
            cpu_warning_percent: 80.0,
            cpu_critical_percent: 95.0,
            memory_warning_percent: 85.0,
            memory_critical_percent: 95.0,
            disk_warning_percent: 90.0,
            disk_critical_percent: 98.0,
        }
    }
}

/// Job-state persistence and retention.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    #[garde(length(min = 1))]
    pub state_path: String,

    /// Terminal jobs older than this are evicted by the reaper.
    #[garde(range(min = 1))]
    pub retention_hours: u64,

    #[garde(range(min = 1))]
    pub reaper_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: "preflight_jobs.json".to_string(),
            retention_hours: 72,
            reaper_interval_secs: 600,
        }
    }
}

/// Batch execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineSection {
    /// Bounded worker pool size for verification and submission fan-out.
    #[garde(range(min = 1, max = 64))]
    pub worker_count: usize,

    #[garde(skip)]
    pub default_priority: JobPriority,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            worker_count: 4,
            default_priority: JobPriority::Normal,
        }
    }
}

/// Top-level pipeline configuration, loaded from a TOML file with
/// `PREFLIGHT_*` environment overrides applied on top.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct PipelineConfig {
    #[garde(dive)]
    pub mailbox: MailboxConfig,
    #[garde(dive)]
    pub converter: ConverterConfig,
    #[garde(dive)]
    pub validation: ValidationConfig,
    #[garde(dive)]
    pub monitoring: MonitoringConfig,
    #[garde(dive)]
    pub storage: StorageConfig,
    #[garde(dive)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

impl PipelineConfig {
    /// Load configuration from a TOML file, apply environment overrides,
    /// and validate. A missing file yields the defaults (still subject to
    /// overrides and validation).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override credential and path leaves from the environment so secrets
    /// stay out of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PREFLIGHT_MAILBOX_URL") {
            self.mailbox.gateway_url = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_MAILBOX_ACCOUNT") {
            self.mailbox.account = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_MAILBOX_PASSWORD") {
            self.mailbox.password = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_CONVERTER_ENDPOINT") {
            self.converter.endpoint = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_CONVERTER_TOKEN") {
            self.converter.token = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_STATE_PATH") {
            self.storage.state_path = v;
        }
        if let Ok(v) = std::env::var("PREFLIGHT_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                self.pipeline.worker_count = n;
            }
        }
    }
}
