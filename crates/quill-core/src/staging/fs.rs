use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::BackingStore;
use crate::domain::{StagingError, WorkspacePath};

/// Filesystem-backed store rooted at a workspace directory.
///
/// Writes go to a temp file in the destination directory and are renamed into
/// place, so a single write either lands completely or not at all.
#[derive(Debug, Clone)]
pub struct FsBackingStore {
    root: PathBuf,
}

impl FsBackingStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &WorkspacePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }
}

fn map_io(path: &WorkspacePath, err: std::io::Error) -> StagingError {
    if err.kind() == ErrorKind::NotFound {
        StagingError::NotFound(path.to_string())
    } else {
        StagingError::Io(err)
    }
}

fn write_atomic(dest: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BackingStore for FsBackingStore {
    fn workspace_root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    async fn exists(&self, path: &WorkspacePath) -> Result<bool, StagingError> {
        let target = self.resolve(path);
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StagingError::Io(e)),
        }
    }

    async fn read(&self, path: &WorkspacePath) -> Result<Vec<u8>, StagingError> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &WorkspacePath, content: &[u8]) -> Result<(), StagingError> {
        let dest = self.resolve(path);
        let content = content.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&dest, &content))
            .await
            .map_err(|e| StagingError::Backend(format!("write task failed: {e}")))?
            .map_err(StagingError::Io)
    }

    async fn delete(&self, path: &WorkspacePath) -> Result<(), StagingError> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn rename(&self, from: &WorkspacePath, to: &WorkspacePath) -> Result<(), StagingError> {
        let dest = self.resolve(to);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(self.resolve(from), &dest)
            .await
            .map_err(|e| map_io(from, e))
    }
}
