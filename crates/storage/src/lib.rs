//! Storage layer for the video grounding pipeline
//!
//! - **Asset store**: per-video directory holding the uploaded source, extracted
//!   frames and one JSON document per derived artifact
//! - **Artifact backends**: where the JSON documents live (local filesystem with
//!   atomic rename, or S3/MinIO)
//! - **Keyed locks**: per-`video_id` mutual exclusion for read-then-write spans
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_grounding_storage::{AssetStore, LocalArtifactBackend};
//!
//! # async fn run() -> Result<(), video_grounding_storage::StorageError> {
//! let backend = Arc::new(LocalArtifactBackend::new("uploads"));
//! let store = AssetStore::new("uploads", backend);
//! let artifacts = store.list_artifacts("3f2a...").await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use video_grounding_common::PipelineError;

pub mod asset_store;
pub mod backend;
pub mod locks;
pub mod s3;

pub use asset_store::{AssetStore, FrameStaging, ASSET_DOCUMENT};
pub use backend::{ArtifactBackend, LocalArtifactBackend};
pub use locks::KeyedLocks;
pub use s3::{S3ArtifactBackend, S3Config};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => PipelineError::ArtifactNotFound(what),
            StorageError::InvalidKey(key) => {
                PipelineError::InvalidRequest(format!("invalid identifier: {key}"))
            }
            StorageError::IoError(e) => PipelineError::Io(e),
            StorageError::SerializationError(e) => PipelineError::Serialization(e),
            other => PipelineError::Storage(other.to_string()),
        }
    }
}
