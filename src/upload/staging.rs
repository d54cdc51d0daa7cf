//! Per-request staging directories.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

use super::SinkFactory;

/// Uniquely named temporary directory owned by one request.
///
/// The directory is created on the first [`SinkFactory::open`] call and
/// removed by [`StagingDir::remove`]. Dropping an unremoved directory
/// removes it synchronously, which covers cancelled requests.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    created: bool,
}

impl StagingDir {
    /// Reserve a new directory name under `root` without touching the disk.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(Uuid::new_v4().to_string()),
            created: false,
        }
    }

    /// Get the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_created(&mut self) -> io::Result<()> {
        if !self.created {
            fs::create_dir_all(&self.path).await?;
            self.created = true;
            debug!(path = %self.path.display(), "created staging directory");
        }
        Ok(())
    }

    /// Remove the directory and everything in it.
    ///
    /// Safe to call more than once.
    pub async fn remove(&mut self) -> io::Result<()> {
        if !self.created {
            return Ok(());
        }
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.created = false;
        debug!(path = %self.path.display(), "removed staging directory");
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for StagingDir {
    type Sink = File;

    async fn open(&mut self, storage_key: &str) -> io::Result<(Self::Sink, PathBuf)> {
        self.ensure_created().await?;
        let path = self.path.join(storage_key);
        let file = File::create(&path).await?;
        Ok((file, path))
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staging directory on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove staging directory"
            ),
        }
    }
}
