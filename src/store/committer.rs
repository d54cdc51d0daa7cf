//! All-or-nothing commit of staged files to a durable store.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn, Instrument};

use super::{BlobStore, ByteStream, StoreError};
use crate::upload::StagedFile;
use crate::{Result, UploadError};

/// A file that reached the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedFile {
    /// Key in the durable store.
    pub key: String,
    /// Base name as sent by the client.
    pub original_name: String,
    /// Size in bytes.
    pub byte_size: u64,
}

impl From<&StagedFile> for CommittedFile {
    fn from(file: &StagedFile) -> Self {
        Self {
            key: file.storage_key.clone(),
            original_name: file.original_name.clone(),
            byte_size: file.byte_size,
        }
    }
}

/// Uploads a batch of staged files and compensates on failure.
#[derive(Clone)]
pub struct BlobCommitter {
    store: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl BlobCommitter {
    /// Create a committer issuing at most `concurrency` puts at once.
    pub fn new(store: Arc<dyn BlobStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Upload every staged file.
    ///
    /// On the first failed put no further puts start; puts already in flight
    /// are awaited, then exactly the keys that succeeded are deleted and
    /// `PartialCommitFailure` is returned. Committed files are reported in
    /// staged order regardless of completion order.
    ///
    /// The local copies are deleted once the attempt completes, on either
    /// outcome.
    pub async fn commit(&self, files: &[StagedFile]) -> Result<Vec<CommittedFile>> {
        Ok(self.begin(files).await?.finish())
    }

    /// Upload every staged file and hold the result open.
    ///
    /// Behaves like [`commit`](Self::commit), but the returned batch stays
    /// revocable until [`CommitBatch::finish`] is called. Dropping the
    /// future before it resolves, or dropping the batch unfinished, deletes
    /// every object written so far on a background task.
    pub async fn begin(&self, files: &[StagedFile]) -> Result<CommitBatch> {
        info!(
            files = files.len(),
            store = self.store.name(),
            concurrency = self.concurrency,
            "committing staged files"
        );

        let mut batch = CommitBatch::new(Arc::clone(&self.store));
        let mut pending = files.iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut succeeded: Vec<usize> = Vec::with_capacity(files.len());
        let mut failure: Option<(usize, StoreError)> = None;

        loop {
            while failure.is_none() && in_flight.len() < self.concurrency {
                let Some((index, file)) = pending.next() else {
                    break;
                };
                in_flight.push(self.put_indexed(index, file));
            }

            match in_flight.next().await {
                Some((index, Ok(()))) => {
                    batch.keys.push(files[index].storage_key.clone());
                    succeeded.push(index);
                }
                Some((index, Err(e))) => {
                    warn!(key = %files[index].storage_key, error = %e, "commit failed");
                    if failure.is_none() {
                        failure = Some((index, e));
                    }
                }
                None => break,
            }
        }

        succeeded.sort_unstable();
        batch.keys = succeeded
            .iter()
            .map(|&i| files[i].storage_key.clone())
            .collect();
        discard_local_copies(files).await;

        if let Some((index, e)) = failure {
            let rolled_back = batch.abort().await;
            return Err(UploadError::PartialCommitFailure {
                key: files[index].storage_key.clone(),
                reason: e.to_string(),
                rolled_back,
            });
        }

        batch.files = succeeded
            .into_iter()
            .map(|i| CommittedFile::from(&files[i]))
            .collect();
        Ok(batch)
    }

    /// Delete committed keys, returning how many deletes succeeded.
    ///
    /// Failures are logged and never escalated; remaining keys are still
    /// attempted.
    pub async fn rollback(&self, keys: &[String]) -> usize {
        rollback_keys(self.store.as_ref(), keys).await
    }

    async fn put_indexed(
        &self,
        index: usize,
        file: &StagedFile,
    ) -> (usize, std::result::Result<(), StoreError>) {
        (index, self.put(file).await)
    }

    async fn put(&self, file: &StagedFile) -> std::result::Result<(), StoreError> {
        let source = File::open(&file.temp_path).await?;
        let body: ByteStream = Box::pin(ReaderStream::new(source));
        self.store.put(&file.storage_key, body, file.byte_size).await?;
        debug!(key = %file.storage_key, bytes = file.byte_size, "object committed");
        Ok(())
    }
}

/// Objects written by a commit that is not final yet.
///
/// Dropped unfinished, the batch deletes its objects on a spawned task.
pub struct CommitBatch {
    store: Arc<dyn BlobStore>,
    keys: Vec<String>,
    files: Vec<CommittedFile>,
}

impl CommitBatch {
    fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            keys: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Committed files in staged order.
    pub fn files(&self) -> &[CommittedFile] {
        &self.files
    }

    /// Make the batch permanent.
    pub fn finish(mut self) -> Vec<CommittedFile> {
        self.keys.clear();
        std::mem::take(&mut self.files)
    }

    /// Delete every object of the batch, returning how many deletes succeeded.
    pub async fn abort(mut self) -> usize {
        // Keys stay armed until every delete ran.
        let deleted = rollback_keys(self.store.as_ref(), &self.keys).await;
        self.keys.clear();
        deleted
    }
}

impl Drop for CommitBatch {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(objects = keys.len(), "commit abandoned, rolling back");
                handle.spawn(
                    async move {
                        rollback_keys(store.as_ref(), &keys).await;
                    }
                    .in_current_span(),
                );
            }
            Err(_) => {
                warn!(keys = ?keys, "commit abandoned outside a runtime, objects orphaned");
            }
        }
    }
}

impl std::fmt::Debug for CommitBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitBatch")
            .field("store", &self.store.name())
            .field("keys", &self.keys)
            .field("files", &self.files)
            .finish()
    }
}

async fn rollback_keys(store: &dyn BlobStore, keys: &[String]) -> usize {
    let mut deleted = 0;
    for key in keys {
        match store.delete(key).await {
            Ok(()) => {
                info!(key = %key, "rolled back committed object");
                deleted += 1;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "rollback failed, object may be orphaned");
            }
        }
    }
    deleted
}

async fn discard_local_copies(files: &[StagedFile]) {
    for file in files {
        match tokio::fs::remove_file(&file.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %file.temp_path.display(),
                error = %e,
                "failed to delete staged file"
            ),
        }
    }
}

impl std::fmt::Debug for BlobCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCommitter")
            .field("store", &self.store.name())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory store with scripted failures.
    #[derive(Default)]
    struct ScriptedStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        fail_puts: HashSet<String>,
        fail_deletes: bool,
        /// Put latency per key, to shuffle completion order.
        delays: HashMap<String, u64>,
        /// Puts for these keys never complete.
        hang_puts: HashSet<String>,
        deletes: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn keys(&self) -> HashSet<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl BlobStore for ScriptedStore {
        async fn put(
            &self,
            key: &str,
            mut body: ByteStream,
            _size: u64,
        ) -> std::result::Result<(), StoreError> {
            if let Some(ms) = self.delays.get(key) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.hang_puts.contains(key) {
                futures::future::pending::<()>().await;
            }
            if self.fail_puts.contains(key) {
                return Err(StoreError::Status {
                    status: 500,
                    key: key.to_string(),
                });
            }
            let mut data = Vec::new();
            while let Some(chunk) = body.next().await {
                data.extend_from_slice(&chunk?);
            }
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.deletes.lock().unwrap().push(key.to_string());
            if self.fail_deletes {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "store unavailable",
                )));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn stage(dir: &TempDir, names: &[&str]) -> Vec<StagedFile> {
        names
            .iter()
            .map(|name| {
                let key = format!("key_{name}");
                let temp_path = dir.path().join(&key);
                std::fs::write(&temp_path, name.as_bytes()).unwrap();
                StagedFile {
                    original_name: name.to_string(),
                    storage_key: key,
                    temp_path,
                    byte_size: name.len() as u64,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commit_all() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.pdf"]);
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store.clone(), 1);

        let committed = committer.commit(&files).await.unwrap();

        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].key, "key_a.png");
        assert_eq!(committed[1].original_name, "b.pdf");
        assert_eq!(
            store.objects.lock().unwrap().get("key_a.png").unwrap(),
            b"a.png"
        );
        assert!(files.iter().all(|f| !f.temp_path.exists()));
    }

    #[tokio::test]
    async fn test_commit_empty_batch() {
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store, 4);

        assert!(committer.commit(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_put_fails_rolls_back_first() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png", "c.png"]);
        let store = Arc::new(ScriptedStore {
            fail_puts: HashSet::from(["key_b.png".to_string()]),
            ..Default::default()
        });
        let committer = BlobCommitter::new(store.clone(), 1);

        let err = committer.commit(&files).await.unwrap_err();

        match err {
            UploadError::PartialCommitFailure {
                key, rolled_back, ..
            } => {
                assert_eq!(key, "key_b.png");
                assert_eq!(rolled_back, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.keys().is_empty());
        assert!(files.iter().all(|f| !f.temp_path.exists()));
        // Sequential commit stops before the third file
        assert_eq!(*store.deletes.lock().unwrap(), vec!["key_a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_rollback_is_exact() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png", "c.png"]);
        let store = Arc::new(ScriptedStore {
            fail_puts: HashSet::from(["key_a.png".to_string()]),
            delays: HashMap::from([("key_a.png".to_string(), 50)]),
            ..Default::default()
        });
        let committer = BlobCommitter::new(store.clone(), 3);

        let err = committer.commit(&files).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::PartialCommitFailure { rolled_back: 2, .. }
        ));
        assert!(store.keys().is_empty());
        let deletes: HashSet<_> = store.deletes.lock().unwrap().iter().cloned().collect();
        assert_eq!(
            deletes,
            HashSet::from(["key_b.png".to_string(), "key_c.png".to_string()])
        );
    }

    #[tokio::test]
    async fn test_no_new_puts_after_failure() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png", "c.png", "d.png"]);
        let store = Arc::new(ScriptedStore {
            fail_puts: HashSet::from(["key_a.png".to_string()]),
            delays: HashMap::from([("key_b.png".to_string(), 30)]),
            ..Default::default()
        });
        let committer = BlobCommitter::new(store.clone(), 2);

        committer.commit(&files).await.unwrap_err();

        // b was in flight when a failed; c and d never started
        assert_eq!(*store.deletes.lock().unwrap(), vec!["key_b.png".to_string()]);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_committed_in_staged_order() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png", "c.png"]);
        let store = Arc::new(ScriptedStore {
            delays: HashMap::from([
                ("key_a.png".to_string(), 40),
                ("key_b.png".to_string(), 20),
            ]),
            ..Default::default()
        });
        let committer = BlobCommitter::new(store, 3);

        let committed = committer.commit(&files).await.unwrap();

        let keys: Vec<_> = committed.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["key_a.png", "key_b.png", "key_c.png"]);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_not_escalated() {
        let store = Arc::new(ScriptedStore {
            fail_deletes: true,
            ..Default::default()
        });
        let committer = BlobCommitter::new(store.clone(), 1);

        let deleted = committer
            .rollback(&["k1".to_string(), "k2".to_string()])
            .await;

        assert_eq!(deleted, 0);
        assert_eq!(store.deletes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_temp_file_fails_commit() {
        let dir = TempDir::new().unwrap();
        let mut files = stage(&dir, &["a.png", "b.png"]);
        std::fs::remove_file(&files[1].temp_path).unwrap();
        files[1].byte_size = 0;
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store.clone(), 1);

        let err = committer.commit(&files).await.unwrap_err();

        assert!(matches!(
            err,
            UploadError::PartialCommitFailure { rolled_back: 1, .. }
        ));
        assert!(store.keys().is_empty());
    }


    #[tokio::test]
    async fn test_cancelled_commit_rolls_back() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png", "c.png"]);
        let store = Arc::new(ScriptedStore {
            hang_puts: HashSet::from(["key_b.png".to_string()]),
            ..Default::default()
        });
        let committer = BlobCommitter::new(store.clone(), 1);

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), committer.commit(&files)).await;
        assert!(outcome.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.keys().is_empty());
        assert_eq!(*store.deletes.lock().unwrap(), vec!["key_a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_finish_keeps_objects() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png"]);
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store.clone(), 2);

        let batch = committer.begin(&files).await.unwrap();
        assert_eq!(batch.files().len(), 2);
        let committed = batch.finish();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(committed.len(), 2);
        assert_eq!(store.keys().len(), 2);
        assert!(store.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_abort_deletes_objects() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png"]);
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store.clone(), 1);

        let batch = committer.begin(&files).await.unwrap();
        let deleted = batch.abort().await;

        assert_eq!(deleted, 2);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_batch_rolls_back_on_drop() {
        let dir = TempDir::new().unwrap();
        let files = stage(&dir, &["a.png", "b.png"]);
        let store = Arc::new(ScriptedStore::default());
        let committer = BlobCommitter::new(store.clone(), 1);

        let batch = committer.begin(&files).await.unwrap();
        assert_eq!(store.keys().len(), 2);
        drop(batch);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.keys().is_empty());
        assert_eq!(store.deletes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrency_floor() {
        let committer = BlobCommitter::new(Arc::new(ScriptedStore::default()), 0);
        assert_eq!(committer.concurrency, 1);
    }
}
