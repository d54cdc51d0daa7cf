//! Test helpers for integration tests.
//!
//! Provides a multipart body builder, an in-memory blob store with scripted
//! failures, and a harness wiring both into an `UploadService`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tempfile::TempDir;

use streamload::config::UploadConfig;
use streamload::{
    BlobCommitter, BlobStore, ByteStream, StoreError, UploadOptions, UploadResult, UploadService,
};

/// Boundary used by [`MultipartBody`].
pub const BOUNDARY: &str = "----streamload-test-7MA4YWxkTrZu0gW";

/// Builder for raw `multipart/form-data` bodies.
#[derive(Debug, Default, Clone)]
pub struct MultipartBody {
    data: Vec<u8>,
}

impl MultipartBody {
    /// Start an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain field.
    pub fn field(self, name: &str, value: &str) -> Self {
        self.part(
            &format!("Content-Disposition: form-data; name=\"{name}\""),
            value.as_bytes(),
        )
    }

    /// Append a field with an explicit content type.
    pub fn field_with_type(self, name: &str, content_type: &str, value: &[u8]) -> Self {
        self.part(
            &format!(
                "Content-Disposition: form-data; name=\"{name}\"\r\nContent-Type: {content_type}"
            ),
            value,
        )
    }

    /// Append a file.
    pub fn file(self, name: &str, file_name: &str, content: &[u8]) -> Self {
        self.part(
            &format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream"
            ),
            content,
        )
    }

    /// Append a part with raw headers.
    pub fn part(mut self, headers: &str, content: &[u8]) -> Self {
        self.data
            .extend_from_slice(format!("--{BOUNDARY}\r\n{headers}\r\n\r\n").as_bytes());
        self.data.extend_from_slice(content);
        self.data.extend_from_slice(b"\r\n");
        self
    }

    /// Finish the body with the closing delimiter.
    pub fn build(&self) -> Vec<u8> {
        let mut body = self.data.clone();
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    /// Content type header value for this body.
    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }
}

/// Split a body into a stream of fixed-size chunks.
pub fn chunked(body: Vec<u8>, chunk_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let chunks: Vec<io::Result<Bytes>> = body
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures::stream::iter(chunks)
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    puts: AtomicUsize,
    /// 1-based index of the put that fails.
    fail_on_put: Option<usize>,
    /// 1-based index of the put that never completes.
    hang_on_put: Option<usize>,
}

impl MemoryStore {
    /// A store whose `n`th put fails.
    pub fn failing_on_put(n: usize) -> Self {
        Self {
            fail_on_put: Some(n),
            ..Default::default()
        }
    }

    /// A store whose `n`th put never completes.
    pub fn hanging_on_put(n: usize) -> Self {
        Self {
            hang_on_put: Some(n),
            ..Default::default()
        }
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Content stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Keys passed to `delete`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Number of puts attempted.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, mut body: ByteStream, _size: u64) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_put == Some(n) {
            return Err(StoreError::Status {
                status: 503,
                key: key.to_string(),
            });
        }
        if self.hang_on_put == Some(n) {
            futures::future::pending::<()>().await;
        }

        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Upload service over a [`MemoryStore`] with a temporary staging root.
pub struct Harness {
    dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub service: UploadService,
}

impl Harness {
    /// Harness with default options.
    pub fn new(store: MemoryStore) -> Self {
        Self::with_options(store, UploadOptions::default())
    }

    /// Harness with the given options.
    pub fn with_options(store: MemoryStore, options: UploadOptions) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(store);
        let committer = BlobCommitter::new(store.clone(), 1);
        let service = UploadService::new(Arc::new(options), dir.path().join("staging"), committer);
        Self {
            dir,
            store,
            service,
        }
    }

    /// Root under which per-request staging directories are created.
    pub fn staging_root(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    /// Whether no staging directory or file is left behind.
    pub fn staging_is_clean(&self) -> bool {
        dir_is_empty(&self.staging_root())
    }

    /// Upload a body in 4 KiB chunks.
    pub async fn upload(&self, body: &MultipartBody) -> UploadResult {
        self.service
            .handle(
                chunked(body.build(), 4096),
                Some(&MultipartBody::content_type()),
            )
            .await
    }
}

/// Options built from an `[upload]` configuration section.
pub fn options_from(config: UploadConfig) -> UploadOptions {
    UploadOptions::from_config(&config).expect("Invalid upload config")
}

/// True when `path` is missing or has no entries.
pub fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
