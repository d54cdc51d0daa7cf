//! streamload - Streaming multipart upload ingestion
//!
//! Parses `multipart/form-data` bodies incrementally, stages files under
//! strict limits, and commits them to a durable store with rollback.

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod store;
pub mod upload;
pub mod web;

pub use config::Config;
pub use error::{MessageCode, Result, UploadError};
pub use service::{CommitHook, NoopHook, UploadResult, UploadService};
pub use store::{
    BlobCommitter, BlobStore, ByteStream, CommitBatch, CommittedFile, HttpObjectStore, LocalStore,
    StoreError,
};
pub use upload::{
    FormFieldSet, StagedFile, UploadOptions, UploadOrchestrator, UploadState,
};
