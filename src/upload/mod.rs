//! Multipart upload ingestion.
//!
//! This module turns a raw `multipart/form-data` byte stream into staged
//! files and an ordered set of form values:
//! - Incremental boundary parsing with mid-stream limits
//! - Extension validation and streamed staging of file sections
//! - Bounded accumulation of form fields
//! - Per-request staging directories removed on every exit path

use std::collections::HashSet;

use crate::config::UploadConfig;
use crate::{Result, UploadError};

mod disposition;
mod fields;
mod orchestrator;
mod parser;
mod staging;
mod writer;

pub use disposition::ContentDisposition;
pub use fields::{FieldAccumulator, FormFieldSet};
pub use orchestrator::{UploadOrchestrator, UploadState};
pub use parser::{extract_boundary, BoundaryParser, FieldSection, FileSection, Section, SectionBody};
pub use staging::StagingDir;
pub use writer::{base_file_name, file_extension, FileSectionWriter, SinkFactory, StagedFile};

/// Immutable limits applied to every upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Maximum length of the multipart boundary token.
    pub boundary_length_limit: usize,
    /// Maximum number of form values.
    pub value_count_limit: usize,
    /// Maximum body size in bytes.
    pub body_length_limit: u64,
    /// Maximum size of one form value in bytes.
    pub value_length_limit: usize,
    allowed_extensions: HashSet<String>,
}

impl UploadOptions {
    /// Build options from the `[upload]` configuration section.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        let options = Self::build(config);
        if options.allowed_extensions.is_empty() {
            return Err(UploadError::Config(
                "upload.allowed_extensions must list at least one extension".to_string(),
            ));
        }
        Ok(options)
    }

    fn build(config: &UploadConfig) -> Self {
        Self {
            boundary_length_limit: config.boundary_length_limit,
            value_count_limit: config.value_count_limit,
            body_length_limit: config.body_length_limit,
            value_length_limit: config.value_length_limit,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .filter_map(|ext| normalize_extension(ext))
                .collect(),
        }
    }

    /// Check whether a lowercase, dot-prefixed extension may be uploaded.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.contains(extension)
    }

    /// Get the normalized allowed extensions.
    pub fn allowed_extensions(&self) -> &HashSet<String> {
        &self.allowed_extensions
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::build(&UploadConfig::default())
    }
}

/// Normalize an extension to lowercase with a leading dot.
fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(format!(".{ext}"))
    }
}
