//! Durable run state in object storage

mod s3;

pub use s3::AwsCliStore;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("Failed to run aws {operation}: {source}")]
    Spawn {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("aws {operation} on s3://{bucket}/{key} failed: {stderr}")]
    Command {
        operation: &'static str,
        bucket: String,
        key: String,
        stderr: String,
    },

    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
}

/// Object storage holding the engine's state and lock objects
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StateStoreError>;

    /// Copy a directory tree under a prefix named after the directory
    async fn upload_dir(&self, dir: &Path) -> Result<(), StateStoreError>;

    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    /// Remove every object in the bucket
    async fn clear(&self) -> Result<(), StateStoreError>;
}

/// Lock object the engine keeps next to the state object
pub fn lock_key(state_key: &str) -> String {
    format!("{}.tflock", state_key)
}
