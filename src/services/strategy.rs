use std::path::{Path, PathBuf};
use std::time::Instant;

use regex::Regex;
use tracing::info;

use crate::config::{ValidationConfig, VerificationMode};
use crate::models::verification::{VerificationReport, VerificationResult};
use crate::services::verifier::{CheckDepth, FileVerifier};

/// A named, interchangeable pre-submission verification policy.
///
/// Strategies share the [`FileVerifier`] single-document routine and
/// differ only in which checks they enable, so per-mode cost stays
/// proportional to strictness.
pub trait VerificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verify one document. Must not panic; all findings go into the
    /// returned result.
    fn verify_one(&self, path: &Path) -> VerificationResult;

    /// Verify a batch sequentially and aggregate a report. Concurrent
    /// callers fan out over `verify_one` themselves.
    fn execute(&self, paths: &[PathBuf]) -> VerificationReport {
        let start = Instant::now();
        let results = paths
            .iter()
            .map(|p| (p.to_string_lossy().into_owned(), self.verify_one(p)))
            .collect();
        let report = VerificationReport::from_results(self.name(), results, start.elapsed());
        info!(
            strategy = self.name(),
            files = paths.len(),
            all_valid = report.all_valid,
            "Verification pass finished"
        );
        report
    }
}

/// Existence, size bounds, and extension allow-list only. No content
/// parsing, O(1) per file.
pub struct QuickStrategy {
    verifier: FileVerifier,
}

impl VerificationStrategy for QuickStrategy {
    fn name(&self) -> &'static str {
        "quick"
    }

    fn verify_one(&self, path: &Path) -> VerificationResult {
        self.verifier.verify(path, CheckDepth::Basic)
    }
}

/// Quick checks plus container-structure validation and a security scan
/// of the file name and path.
pub struct StandardStrategy {
    verifier: FileVerifier,
}

impl VerificationStrategy for StandardStrategy {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn verify_one(&self, path: &Path) -> VerificationResult {
        self.verifier.verify(path, CheckDepth::Container)
    }
}

/// Standard checks plus a deep content scan: macro and embedded-object
/// detection, metadata leakage, and the expansion-ratio guard.
pub struct ThoroughStrategy {
    verifier: FileVerifier,
}

impl VerificationStrategy for ThoroughStrategy {
    fn name(&self) -> &'static str {
        "thorough"
    }

    fn verify_one(&self, path: &Path) -> VerificationResult {
        self.verifier.verify(path, CheckDepth::Deep)
    }
}

/// A caller-supplied pattern: compiled as a regex when possible,
/// otherwise matched as a literal substring.
enum CustomPattern {
    Regex(Regex),
    Literal(String),
}

impl CustomPattern {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            CustomPattern::Regex(re) => re.is_match(haystack),
            CustomPattern::Literal(lit) => haystack.contains(lit.as_str()),
        }
    }

    fn describe(&self) -> &str {
        match self {
            CustomPattern::Regex(re) => re.as_str(),
            CustomPattern::Literal(lit) => lit.as_str(),
        }
    }
}

/// Standard checks plus caller-supplied patterns matched against file
/// names; each match becomes a security issue.
pub struct CustomStrategy {
    verifier: FileVerifier,
    patterns: Vec<CustomPattern>,
}

impl VerificationStrategy for CustomStrategy {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn verify_one(&self, path: &Path) -> VerificationResult {
        let mut result = self.verifier.verify(path, CheckDepth::Container);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for pattern in &self.patterns {
            if pattern.matches(&file_name) {
                result.add_issue(format!(
                    "File name matches blocked pattern '{}'",
                    pattern.describe()
                ));
            }
        }
        result
    }
}

/// Pure mapping from the configured mode to a strategy instance.
pub fn strategy_for(
    mode: VerificationMode,
    config: &ValidationConfig,
) -> Box<dyn VerificationStrategy> {
    let verifier = FileVerifier::new(config.clone());
    match mode {
        VerificationMode::Quick => Box::new(QuickStrategy { verifier }),
        VerificationMode::Standard => Box::new(StandardStrategy { verifier }),
        VerificationMode::Thorough => Box::new(ThoroughStrategy { verifier }),
        VerificationMode::Custom => {
            let patterns = config
                .custom_patterns
                .iter()
                .map(|p| match Regex::new(p) {
                    Ok(re) => CustomPattern::Regex(re),
                    Err(_) => CustomPattern::Literal(p.clone()),
                })
                .collect();
            Box::new(CustomStrategy { verifier, patterns })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_docx(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("[Content_Types].xml", options)
            .unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_factory_maps_modes() {
        let config = ValidationConfig::default();
        assert_eq!(strategy_for(VerificationMode::Quick, &config).name(), "quick");
        assert_eq!(strategy_for(VerificationMode::Standard, &config).name(), "standard");
        assert_eq!(strategy_for(VerificationMode::Thorough, &config).name(), "thorough");
        assert_eq!(strategy_for(VerificationMode::Custom, &config).name(), "custom");
    }

    #[test]
    fn test_strictness_is_monotonic() {
        // A file that fails Quick (bad extension) must fail every
        // stricter mode with at least the same issues.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let config = ValidationConfig::default();

        let quick = strategy_for(VerificationMode::Quick, &config).verify_one(&path);
        let standard = strategy_for(VerificationMode::Standard, &config).verify_one(&path);
        let thorough = strategy_for(VerificationMode::Thorough, &config).verify_one(&path);

        assert!(!quick.valid);
        for issue in &quick.issues {
            assert!(standard.issues.contains(issue), "standard lost issue {issue}");
            assert!(thorough.issues.contains(issue), "thorough lost issue {issue}");
        }
    }

    #[test]
    fn test_custom_patterns_flag_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft_CONFIDENTIAL.docx");
        write_docx(&path);

        let config = ValidationConfig {
            custom_patterns: vec!["(?i)confidential".to_string()],
            ..ValidationConfig::default()
        };
        let result = strategy_for(VerificationMode::Custom, &config).verify_one(&path);
        assert!(!result.valid);
        assert!(result.issues.iter().any(|i| i.contains("blocked pattern")));

        // Invalid regex degrades to literal matching instead of failing.
        let config = ValidationConfig {
            custom_patterns: vec!["draft_(".to_string()],
            ..ValidationConfig::default()
        };
        let result = strategy_for(VerificationMode::Custom, &config).verify_one(&path);
        assert!(result.issues.iter().any(|i| i.contains("draft_(")));
    }

    #[test]
    fn test_report_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.docx");
        write_docx(&good);
        let missing = dir.path().join("missing.docx");

        let config = ValidationConfig::default();
        let report = strategy_for(VerificationMode::Standard, &config)
            .execute(&[good.clone(), missing.clone()]);

        assert!(!report.all_valid);
        assert_eq!(report.statistics["files_checked"], serde_json::json!(2));
        assert_eq!(report.statistics["files_valid"], serde_json::json!(1));
        assert!(report.result_for(&good.to_string_lossy()).unwrap().valid);
        assert!(!report.result_for(&missing.to_string_lossy()).unwrap().valid);
    }
}
