//! Validation and streaming of file sections into staging sinks.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::{FileSection, SectionBody, UploadOptions};
use crate::{Result, UploadError};

/// A file written to temporary local storage, pending commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Base name as sent by the client.
    pub original_name: String,
    /// Collision-free key used in the durable store.
    pub storage_key: String,
    /// Closed, fully written temporary file.
    pub temp_path: PathBuf,
    /// Number of bytes written.
    pub byte_size: u64,
}

/// Opens writable sinks for staged files.
#[async_trait]
pub trait SinkFactory: Send {
    /// Sink type.
    type Sink: AsyncWrite + Unpin + Send;

    /// Open a sink for `storage_key`, returning it with the path it writes to.
    async fn open(&mut self, storage_key: &str) -> io::Result<(Self::Sink, PathBuf)>;
}

/// Writes validated file sections to sinks.
#[derive(Debug, Clone, Copy)]
pub struct FileSectionWriter<'a> {
    options: &'a UploadOptions,
}

impl<'a> FileSectionWriter<'a> {
    /// Create a writer bound to the given options.
    pub fn new(options: &'a UploadOptions) -> Self {
        Self { options }
    }

    /// Validate and stream one file section.
    ///
    /// A disallowed extension fails with `UploadRejected` before the sink
    /// factory is touched. The sink is shut down on every path once opened.
    pub async fn write<F: SinkFactory>(
        &self,
        section: FileSection<'_>,
        sinks: &mut F,
    ) -> Result<StagedFile> {
        let FileSection {
            file_name,
            mut body,
            ..
        } = section;

        let original_name = base_file_name(&file_name).to_string();
        let extension = file_extension(&original_name);
        if !self.options.is_extension_allowed(&extension) {
            return Err(UploadError::UploadRejected(format!(
                "file extension {} is not allowed",
                if extension.is_empty() { "(none)" } else { &extension }
            )));
        }

        // Virus scanning would hook in here, before bytes reach the sink.

        let storage_key = storage_key_for(&original_name);
        let (mut sink, temp_path) = sinks.open(&storage_key).await?;
        debug!(key = %storage_key, path = %temp_path.display(), "opened staging sink");

        let copied = copy_body(&mut body, &mut sink).await;
        let closed = sink.shutdown().await;
        drop(sink);

        let byte_size = copied?;
        closed?;

        info!(
            original_name = %original_name,
            key = %storage_key,
            bytes = byte_size,
            "file staged"
        );

        Ok(StagedFile {
            original_name,
            storage_key,
            temp_path,
            byte_size,
        })
    }
}

async fn copy_body<W: AsyncWrite + Unpin>(body: &mut SectionBody<'_>, sink: &mut W) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = body.chunk().await? {
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Strip any client-side path components from a file name.
///
/// Both separators are handled because browsers on Windows may send full
/// paths.
pub fn base_file_name(file_name: &str) -> &str {
    file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name)
        .trim()
}

/// Lowercase extension with a leading dot, or an empty string.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn storage_key_for(original_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), sanitize_file_name(original_name))
}
