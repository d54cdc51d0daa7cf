//! Drives one request's parse loop and owns its staged state.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, info, warn};

use super::{
    BoundaryParser, FieldAccumulator, FileSectionWriter, FormFieldSet, Section, StagedFile,
    StagingDir, UploadOptions,
};
use crate::{Result, UploadError};

/// Lifecycle of one upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing read yet.
    Idle,
    /// Consuming sections.
    Parsing,
    /// All sections consumed; staged files await commit.
    Committing,
    /// Parsing stopped on an error.
    Failed,
    /// Staging directory removed.
    Cleaned,
}

/// Routes sections of one request to the file writer and field accumulator.
///
/// On any failure the staging directory is removed before the error is
/// returned. On success the staged files stay on disk until
/// [`UploadOrchestrator::cleanup`] runs or the orchestrator is dropped.
#[derive(Debug)]
pub struct UploadOrchestrator {
    options: Arc<UploadOptions>,
    staging: StagingDir,
    accumulator: FieldAccumulator,
    files: Vec<StagedFile>,
    state: UploadState,
}

impl UploadOrchestrator {
    /// Create an orchestrator staging under a fresh directory in `staging_root`.
    pub fn new(options: Arc<UploadOptions>, staging_root: impl AsRef<Path>) -> Self {
        let accumulator = FieldAccumulator::new(&options);
        Self {
            options,
            staging: StagingDir::new(staging_root),
            accumulator,
            files: Vec::new(),
            state: UploadState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Directory that holds this request's staged files.
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// Form values accumulated so far.
    pub fn fields(&self) -> &FormFieldSet {
        self.accumulator.fields()
    }

    /// Files staged so far, in request order.
    pub fn staged_files(&self) -> &[StagedFile] {
        &self.files
    }

    /// Consume the request body to exhaustion.
    pub async fn stage<S, O, E>(&mut self, stream: S, content_type: Option<&str>) -> Result<()>
    where
        S: Stream<Item = std::result::Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.state != UploadState::Idle {
            return Err(UploadError::Unknown(format!(
                "upload cannot be staged from state {:?}",
                self.state
            )));
        }
        self.transition(UploadState::Parsing);

        match self.consume(stream, content_type).await {
            Ok(()) => {
                info!(
                    files = self.files.len(),
                    values = self.fields().value_count(),
                    "request body consumed"
                );
                self.transition(UploadState::Committing);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, staged = self.files.len(), "upload failed while parsing");
                self.transition(UploadState::Failed);
                self.cleanup().await;
                Err(e)
            }
        }
    }

    async fn consume<S, O, E>(&mut self, stream: S, content_type: Option<&str>) -> Result<()>
    where
        S: Stream<Item = std::result::Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let options = Arc::clone(&self.options);
        let mut parser = BoundaryParser::new(stream, content_type, &options)?;
        let writer = FileSectionWriter::new(&options);

        while let Some(section) = parser.next_section().await? {
            match section {
                Section::File(file) => {
                    let staged = writer.write(file, &mut self.staging).await?;
                    self.files.push(staged);
                }
                Section::Field(field) => self.accumulator.accumulate(field).await?,
            }
        }
        Ok(())
    }

    /// Remove the staging directory and every staged file in it.
    ///
    /// Removal failures are logged; the directory guard retries on drop.
    pub async fn cleanup(&mut self) {
        if self.state == UploadState::Cleaned {
            return;
        }
        if let Err(e) = self.staging.remove().await {
            warn!(
                path = %self.staging.path().display(),
                error = %e,
                "failed to remove staging directory"
            );
        }
        self.transition(UploadState::Cleaned);
    }

    fn transition(&mut self, next: UploadState) {
        debug!(from = ?self.state, to = ?next, "upload state change");
        self.state = next;
    }
}
