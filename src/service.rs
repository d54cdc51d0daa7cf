//! End-to-end upload pipeline: stage, commit, clean up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tracing::{info, warn, Instrument};

use crate::config::{Config, StorageBackend};
use crate::error::MessageCode;
use crate::logging;
use crate::store::{BlobCommitter, BlobStore, CommittedFile, HttpObjectStore, LocalStore};
use crate::upload::{FormFieldSet, UploadOptions, UploadOrchestrator};
use crate::{Result, UploadError};

/// Extension point run once every file of a batch reached the durable store.
///
/// Returning an error rolls the batch back and fails the upload with that
/// error. Metadata persistence belongs here.
#[async_trait]
pub trait CommitHook: Send + Sync {
    /// Called with the accumulated fields and the committed files.
    async fn after_commit(&self, fields: &FormFieldSet, committed: &[CommittedFile]) -> Result<()>;
}

/// Hook that accepts every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl CommitHook for NoopHook {
    async fn after_commit(&self, _fields: &FormFieldSet, _committed: &[CommittedFile]) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one upload request.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// Whether every file was committed.
    pub success: bool,
    /// Result classification.
    pub message_code: MessageCode,
    /// Caller-safe detail; empty on success.
    pub description: String,
    /// Committed files in request order; empty on failure.
    pub committed: Vec<CommittedFile>,
    /// Accumulated form values; empty on failure.
    pub fields: FormFieldSet,
}

impl UploadResult {
    fn succeeded(committed: Vec<CommittedFile>, fields: FormFieldSet) -> Self {
        Self {
            success: true,
            message_code: MessageCode::Success,
            description: String::new(),
            committed,
            fields,
        }
    }

    fn failed(error: &UploadError) -> Self {
        Self {
            success: false,
            message_code: error.code(),
            description: error.public_description(),
            committed: Vec::new(),
            fields: FormFieldSet::new(),
        }
    }

    /// Fixed message for the result code.
    pub fn message(&self) -> &'static str {
        self.message_code.message()
    }

    /// Keys of the committed files.
    pub fn committed_keys(&self) -> Vec<String> {
        self.committed.iter().map(|c| c.key.clone()).collect()
    }
}

/// Shared, immutable upload pipeline.
#[derive(Clone)]
pub struct UploadService {
    options: Arc<UploadOptions>,
    staging_root: PathBuf,
    committer: BlobCommitter,
    hook: Arc<dyn CommitHook>,
}

impl UploadService {
    /// Create a service with the no-op commit hook.
    pub fn new(
        options: Arc<UploadOptions>,
        staging_root: impl Into<PathBuf>,
        committer: BlobCommitter,
    ) -> Self {
        Self {
            options,
            staging_root: staging_root.into(),
            committer,
            hook: Arc::new(NoopHook),
        }
    }

    /// Build the service and its durable store from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let options = Arc::new(UploadOptions::from_config(&config.upload)?);
        let store: Arc<dyn BlobStore> = match config.storage.backend {
            StorageBackend::Local => Arc::new(LocalStore::new(&config.storage.local_path)?),
            StorageBackend::Remote => Arc::new(HttpObjectStore::new(&config.storage.remote)?),
        };
        info!(
            backend = store.name(),
            staging = %config.upload.staging_path,
            "upload service configured"
        );

        let committer = BlobCommitter::new(store, config.storage.commit_concurrency);
        Ok(Self::new(options, &config.upload.staging_path, committer))
    }

    /// Replace the commit hook.
    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Get the upload options.
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Get the directory under which per-request staging directories live.
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Process one request body.
    ///
    /// Never fails: errors are folded into an unsuccessful [`UploadResult`].
    pub async fn handle<S, O, E>(&self, stream: S, content_type: Option<&str>) -> UploadResult
    where
        S: Stream<Item = std::result::Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let span = logging::request_span();
        async move {
            match self.process(stream, content_type).await {
                Ok((committed, fields)) => {
                    info!(files = committed.len(), "upload committed");
                    UploadResult::succeeded(committed, fields)
                }
                Err(e) => {
                    warn!(error = %e, code = ?e.code(), "upload failed");
                    UploadResult::failed(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process<S, O, E>(
        &self,
        stream: S,
        content_type: Option<&str>,
    ) -> Result<(Vec<CommittedFile>, FormFieldSet)>
    where
        S: Stream<Item = std::result::Result<O, E>> + Send,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut orchestrator = UploadOrchestrator::new(Arc::clone(&self.options), &self.staging_root);
        orchestrator.stage(stream, content_type).await?;

        let outcome = self.commit(&orchestrator).await;
        orchestrator.cleanup().await;

        let committed = outcome?;
        Ok((committed, orchestrator.fields().clone()))
    }

    async fn commit(&self, orchestrator: &UploadOrchestrator) -> Result<Vec<CommittedFile>> {
        let batch = self.committer.begin(orchestrator.staged_files()).await?;

        if let Err(e) = self.hook.after_commit(orchestrator.fields(), batch.files()).await {
            warn!(error = %e, files = batch.files().len(), "commit hook failed, rolling back");
            batch.abort().await;
            return Err(e);
        }

        Ok(batch.finish())
    }
}

impl std::fmt::Debug for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadService")
            .field("options", &self.options)
            .field("staging_root", &self.staging_root)
            .field("committer", &self.committer)
            .finish_non_exhaustive()
    }
}
