//! Pre-parse checks on uploaded bytes. Nothing here looks at statement content
//! beyond the leading signature bytes.

use serde::{Deserialize, Serialize};
use tally_import::registry::extension_of;

use crate::config::PipelineConfig;

/// Outcome of validating one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub errors: Vec<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub trait UploadValidator: Send + Sync {
    fn validate(&self, data: &[u8], filename: &str) -> Validation;
}

/// Leading byte patterns of executables, archives and markup that are never a
/// bank statement.
const REJECTED_SIGNATURES: &[(&[u8], &str)] = &[
    (b"MZ", "Windows executable"),
    (b"\x7fELF", "ELF executable"),
    (b"\xfe\xed\xfa\xce", "Mach-O executable"),
    (b"\xfe\xed\xfa\xcf", "Mach-O executable"),
    (b"\xce\xfa\xed\xfe", "Mach-O executable"),
    (b"\xcf\xfa\xed\xfe", "Mach-O executable"),
    (b"\xca\xfe\xba\xbe", "Mach-O universal binary"),
    (b"#!", "script"),
    (b"PK\x03\x04", "zip archive"),
];

/// Case-insensitive markers searched in the first bytes of the file.
const REJECTED_MARKUP: &[&str] = &["<script", "<html"];

const SNIFF_WINDOW: usize = 1024;

/// Extension allow-list, size cap and signature reject list.
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    max_file_size: usize,
    allowed_extensions: Vec<String>,
}

impl DefaultValidator {
    pub fn new(max_file_size: usize, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_file_size, config.allowed_extensions.clone())
    }
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl UploadValidator for DefaultValidator {
    fn validate(&self, data: &[u8], filename: &str) -> Validation {
        let mut errors = Vec::new();

        match extension_of(filename) {
            Some(ext) if self.allowed_extensions.contains(&ext) => {}
            Some(ext) => errors.push(format!("file extension '.{ext}' is not allowed")),
            None => errors.push(format!("'{filename}' has no file extension")),
        }

        if data.is_empty() {
            errors.push("file is empty".to_string());
        } else if data.len() > self.max_file_size {
            errors.push(format!(
                "file is {} bytes, limit is {}",
                data.len(),
                self.max_file_size
            ));
        }

        if let Some(kind) = rejected_signature(data) {
            errors.push(format!("content looks like a {kind}"));
        }

        Validation { errors }
    }
}

fn rejected_signature(data: &[u8]) -> Option<&'static str> {
    if let Some((_, kind)) = REJECTED_SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
    {
        return Some(kind);
    }

    let head = String::from_utf8_lossy(&data[..data.len().min(SNIFF_WINDOW)]).to_lowercase();
    REJECTED_MARKUP
        .iter()
        .any(|marker| head.contains(marker))
        .then_some("HTML document")
}
