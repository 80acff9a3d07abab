use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::config::ValidationConfig;
use crate::models::verification::VerificationResult;

/// Expansion ratio above which an office container is flagged as a
/// possible archive bomb.
const EXPANSION_RATIO_LIMIT: f64 = 100.0;

/// Absolute ceiling on declared uncompressed size. Above this the document
/// is rejected outright rather than merely flagged.
const EXPANSION_ABSOLUTE_CEILING: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Container entries that indicate macro content.
const MACRO_ENTRY_MARKERS: &[&str] = &["vbaProject.bin", "macros/", "Scripts/"];

/// Container entries that indicate embedded foreign objects.
const EMBEDDED_OBJECT_MARKERS: &[&str] = &["oleObject", "embeddings/", "ActiveX"];

/// How deep a verification pass inspects each document.
///
/// Depths are strictly additive: every check run at one depth also runs
/// at all greater depths, which keeps issue sets monotonic across modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckDepth {
    /// Existence, size bounds, extension allow-list.
    Basic,
    /// Basic + container structure + path security scan.
    Container,
    /// Container + macro/embedded-object/metadata/expansion scan.
    Deep,
}

/// Structural and security inspection of a single document.
///
/// Stateless apart from the configured limits; safe to share across the
/// worker pool.
#[derive(Debug, Clone)]
pub struct FileVerifier {
    config: ValidationConfig,
}

impl FileVerifier {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Run all checks enabled at `depth` against one document.
    pub fn verify(&self, path: &Path, depth: CheckDepth) -> VerificationResult {
        let mut result = VerificationResult::new();

        self.check_basic(path, &mut result);

        if depth >= CheckDepth::Container {
            self.check_path_security(path, &mut result);
            // Container checks need a readable file on disk.
            if result.issues.is_empty() {
                self.check_container(path, &mut result, depth);
            }
        }

        debug!(
            path = %path.display(),
            valid = result.valid,
            issues = result.issues.len(),
            warnings = result.warnings.len(),
            "Document verified"
        );
        result
    }

    /// Existence, regular-file, size-bound, and extension checks.
    fn check_basic(&self, path: &Path, result: &mut VerificationResult) {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                result.add_issue(format!("File does not exist: {}", path.display()));
                return;
            }
        };

        if !meta.is_file() {
            result.add_issue(format!("Not a regular file: {}", path.display()));
            return;
        }

        result.size_bytes = meta.len();
        if meta.len() > self.config.max_file_size {
            result.add_issue(format!(
                "File size {} exceeds maximum of {} bytes",
                meta.len(),
                self.config.max_file_size
            ));
        }
        if meta.len() < self.config.min_file_size {
            result.add_issue(format!(
                "File size {} is below minimum of {} bytes",
                meta.len(),
                self.config.min_file_size
            ));
        }

        match extension_of(path) {
            Some(ext) if self.config.allowed_extensions.iter().any(|a| a == &ext) => {
                result
                    .stats
                    .insert("extension".to_string(), serde_json::json!(ext));
            }
            Some(ext) => {
                result.add_issue(format!("File extension '{ext}' is not allowed"));
            }
            None => {
                result.add_issue("File has no extension".to_string());
            }
        }
    }

    /// Scan the file name and path for injection markers.
    fn check_path_security(&self, path: &Path, result: &mut VerificationResult) {
        let path_str = path.to_string_lossy().to_lowercase();
        for pattern in &self.config.dangerous_patterns {
            if path_str.contains(&pattern.to_lowercase()) {
                result.add_issue(format!("Path contains dangerous pattern '{pattern}'"));
            }
        }
    }

    /// Validate the office-container structure and cross-check the declared
    /// content type against the authenticated one. At `Deep`, additionally
    /// scan entries for macros, embedded objects, metadata leakage, and an
    /// excessive expansion ratio.
    fn check_container(&self, path: &Path, result: &mut VerificationResult, depth: CheckDepth) {
        let declared = extension_of(path).unwrap_or_default();
        let magic = read_magic(path);

        result.content_type = authenticated_content_type(&magic, &declared);

        // PDF is a flat container: magic-byte authentication only.
        if declared == "pdf" {
            if !magic.starts_with(b"%PDF") {
                result.add_issue("Declared type 'pdf' does not match file content".to_string());
            }
            return;
        }

        // All other allowed formats are zip containers.
        if !magic.starts_with(b"PK") {
            result.add_issue(format!(
                "Declared type '{declared}' does not match file content (not a zip container)"
            ));
            return;
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                result.add_issue(format!("Cannot open file: {e}"));
                return;
            }
        };
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                result.add_issue(format!("Corrupt container structure: {e}"));
                return;
            }
        };

        result
            .stats
            .insert("container_entries".to_string(), serde_json::json!(archive.len()));

        // Required marker entries per family: OOXML carries
        // [Content_Types].xml, ODF carries mimetype.
        let has_ooxml_marker = archive.by_name("[Content_Types].xml").is_ok();
        let has_odf_marker = archive.by_name("mimetype").is_ok();
        if !has_ooxml_marker && !has_odf_marker {
            result.add_issue(
                "Container is missing required structure entries ([Content_Types].xml or mimetype)"
                    .to_string(),
            );
        }

        let mut uncompressed_total: u64 = 0;
        let mut macro_entries = Vec::new();
        let mut embedded_entries = Vec::new();

        for i in 0..archive.len() {
            let entry = match archive.by_index(i) {
                Ok(e) => e,
                Err(e) => {
                    result.add_warning(format!("Unreadable container entry {i}: {e}"));
                    continue;
                }
            };
            let name = entry.name().to_string();

            // Entry names that escape the container root are always rejected.
            if entry.enclosed_name().is_none() {
                result.add_issue(format!("Container entry has unsafe path: {name}"));
            }

            uncompressed_total += entry.size();

            if depth >= CheckDepth::Deep {
                if MACRO_ENTRY_MARKERS.iter().any(|m| name.contains(m)) {
                    macro_entries.push(name.clone());
                }
                if EMBEDDED_OBJECT_MARKERS.iter().any(|m| name.contains(m)) {
                    embedded_entries.push(name.clone());
                }
            }
        }

        if depth >= CheckDepth::Deep {
            if !macro_entries.is_empty() {
                result.add_warning(format!(
                    "Document contains macro content: {}",
                    macro_entries.join(", ")
                ));
                result
                    .stats
                    .insert("macro_entries".to_string(), serde_json::json!(macro_entries));
            }
            if !embedded_entries.is_empty() {
                result.add_warning(format!(
                    "Document contains embedded objects: {}",
                    embedded_entries.join(", ")
                ));
            }

            self.check_metadata_leakage(&mut archive, result);
            self.check_expansion(path, uncompressed_total, result);
        }
    }

    /// Flag author/editor fields left in the document properties.
    fn check_metadata_leakage<R: Read + std::io::Seek>(
        &self,
        archive: &mut zip::ZipArchive<R>,
        result: &mut VerificationResult,
    ) {
        for props in ["docProps/core.xml", "meta.xml"] {
            let mut content = String::new();
            {
                let mut entry = match archive.by_name(props) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                if entry.read_to_string(&mut content).is_err() {
                    continue;
                }
            }
            for field in ["creator", "lastModifiedBy", "initial-creator"] {
                let open = format!("{field}>");
                if let Some(start) = content.find(&open) {
                    let rest = &content[start + open.len()..];
                    if let Some(end) = rest.find('<') {
                        let value = rest[..end].trim();
                        if !value.is_empty() {
                            result.add_warning(format!(
                                "Metadata leakage: '{field}' property is set"
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Guard against archive-bomb-style inputs.
    fn check_expansion(&self, path: &Path, uncompressed_total: u64, result: &mut VerificationResult) {
        let compressed = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if compressed == 0 {
            return;
        }
        let ratio = uncompressed_total as f64 / compressed as f64;
        result
            .stats
            .insert("expansion_ratio".to_string(), serde_json::json!(ratio));

        if uncompressed_total > EXPANSION_ABSOLUTE_CEILING {
            result.add_issue(format!(
                "Uncompressed size {uncompressed_total} exceeds ceiling of {EXPANSION_ABSOLUTE_CEILING} bytes"
            ));
        } else if ratio > EXPANSION_RATIO_LIMIT {
            result.add_warning(format!(
                "Expansion ratio {ratio:.0}x exceeds {EXPANSION_RATIO_LIMIT:.0}x"
            ));
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Read the leading magic bytes of a file; empty on any read failure.
fn read_magic(path: &Path) -> Vec<u8> {
    let mut buf = [0_u8; 8];
    match File::open(path).and_then(|mut f| f.read(&mut buf)) {
        Ok(n) => buf[..n].to_vec(),
        Err(_) => Vec::new(),
    }
}

/// Resolve a content type from magic bytes, refined by the declared
/// extension for zip-based office formats.
fn authenticated_content_type(magic: &[u8], declared_ext: &str) -> String {
    if magic.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }
    if magic.starts_with(b"PK") {
        return match declared_ext {
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "odt" => "application/vnd.oasis.opendocument.text",
            "ods" => "application/vnd.oasis.opendocument.spreadsheet",
            "odp" => "application/vnd.oasis.opendocument.presentation",
            _ => "application/zip",
        }
        .to_string();
    }
    "application/octet-stream".to_string()
}
