//! Backing filesystem collaborator.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{StagingError, WorkspacePath};

/// The real store staged changes are flushed into.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn exists(&self, path: &WorkspacePath) -> Result<bool, StagingError>;

    /// Read a file. Missing files yield [`StagingError::NotFound`].
    async fn read(&self, path: &WorkspacePath) -> Result<Vec<u8>, StagingError>;

    /// Create or overwrite a file, creating parent directories as needed.
    async fn write(&self, path: &WorkspacePath, content: &[u8]) -> Result<(), StagingError>;

    async fn delete(&self, path: &WorkspacePath) -> Result<(), StagingError>;

    /// Move a file, replacing any existing destination.
    async fn rename(&self, from: &WorkspacePath, to: &WorkspacePath) -> Result<(), StagingError>;

    /// Directory the store writes under, if it is backed by the filesystem.
    fn workspace_root(&self) -> Option<&Path> {
        None
    }
}
