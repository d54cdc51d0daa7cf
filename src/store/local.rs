//! Local filesystem blob store.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{BlobStore, ByteStream, StoreError};

/// Blob store backed by a sharded directory tree.
///
/// Objects are stored as:
/// ```text
/// {base_path}/
/// ├── 3f/
/// │   └── 3fa85f64-5717-4562-b3fc-2c963f66afa6_photo.png
/// ├── 9c/
/// │   └── 9c1e2b1a-0d2e-4f7b-a1c3-2d4e5f6a7b8c_scan.pdf
/// └── ...
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `base_path`, creating the directory.
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Get the base path of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Full path for a key: `{base_path}/{shard}/{key}`.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(shard_of(key)).join(key)
    }

    /// Check if an object exists.
    pub fn exists(&self, key: &str) -> bool {
        self.object_path(key).is_file()
    }

    async fn write_partial(path: &Path, mut body: ByteStream) -> io::Result<u64> {
        let mut file = File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn put(&self, key: &str, body: ByteStream, size: u64) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers never see a half-written object under the final name.
        let partial = path.with_file_name(format!("{key}.partial"));
        match Self::write_partial(&partial, body).await {
            Ok(written) => {
                fs::rename(&partial, &path).await?;
                debug!(key, bytes = written, expected = size, "object written");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e.into())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// First two characters of the key (the UUID prefix).
fn shard_of(key: &str) -> &str {
    match key.char_indices().nth(2) {
        Some((i, _)) => &key[..i],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, LocalStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path().join("blobs")).unwrap();
        (temp_dir, store)
    }

    fn body_of(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    #[test]
    fn test_new_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("blobs");
        assert!(!path.exists());

        let store = LocalStore::new(&path).unwrap();

        assert!(path.is_dir());
        assert_eq!(store.base_path(), path);
    }

    #[test]
    fn test_shard_of() {
        assert_eq!(shard_of("abcdef_photo.png"), "ab");
        assert_eq!(shard_of("x"), "x");
        assert_eq!(shard_of(""), "");
    }

    #[test]
    fn test_object_path() {
        let (_temp_dir, store) = setup_store();
        let key = "3fa85f64-5717-4562-b3fc-2c963f66afa6_photo.png";

        assert_eq!(
            store.object_path(key),
            store.base_path().join("3f").join(key)
        );
    }

    #[tokio::test]
    async fn test_put_and_read_back() {
        let (_temp_dir, store) = setup_store();
        let key = "ab12_photo.png";

        store
            .put(key, body_of(&["hello ", "world"]), 11)
            .await
            .unwrap();

        assert!(store.exists(key));
        assert_eq!(std::fs::read(store.object_path(key)).unwrap(), b"hello world");
        assert!(!store.object_path(key).with_file_name("ab12_photo.png.partial").exists());
    }

    #[tokio::test]
    async fn test_put_failure_leaves_nothing() {
        let (_temp_dir, store) = setup_store();
        let key = "cd34_scan.pdf";
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source truncated")),
        ]));

        let result = store.put(key, body, 100).await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!store.exists(key));
        let shard = store.base_path().join("cd");
        assert_eq!(std::fs::read_dir(shard).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp_dir, store) = setup_store();
        let key = "ef56_song.mp3";
        store.put(key, body_of(&["id3"]), 3).await.unwrap();

        store.delete(key).await.unwrap();

        assert!(!store.exists(key));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_temp_dir, store) = setup_store();
        store.delete("0000_nothing.png").await.unwrap();
    }
}
