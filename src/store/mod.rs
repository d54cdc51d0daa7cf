//! Durable blob storage.
//!
//! Staged files are committed through the [`BlobStore`] trait, which is
//! implemented by:
//! - [`LocalStore`]: sharded directory tree on local disk
//! - [`HttpObjectStore`]: PUT/DELETE object storage over HTTP
//!
//! [`BlobCommitter`] drives a batch of puts and rolls back on failure.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

mod committer;
mod local;
mod remote;

pub use committer::{BlobCommitter, CommitBatch, CommittedFile};
pub use local::LocalStore;
pub use remote::HttpObjectStore;

/// Owned stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// Failure reported by a durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport error talking to a remote store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with a non-success status.
    #[error("store returned {status} for {key}")]
    Status { status: u16, key: String },
}

/// Key-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: ByteStream, size: u64) -> Result<(), StoreError>;

    /// Remove the object under `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
