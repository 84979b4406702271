//! Per-workspace mutual exclusion.
//!
//! At most one cycle holds mutating access to a workspace at a time. Cycles
//! on different workspaces never contend. A registry built with
//! [`WorkspaceLocks::cross_process`] additionally holds an advisory lock on
//! [`LOCK_FILE`] under the workspace root, so separate processes exclude each
//! other too.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::config::LockPolicy;
use crate::domain::{QuillError, Result};

/// Advisory lock file created under each workspace root.
pub const LOCK_FILE: &str = ".quill.lock";

/// Registry of one async mutex per canonical workspace root.
#[derive(Debug, Default)]
pub struct WorkspaceLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    lock_files: bool,
}

/// Proof of exclusive access to a workspace, released on drop.
#[derive(Debug)]
pub struct WorkspaceLease {
    root: PathBuf,
    _file: Option<File>,
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceLease {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn canonical(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

fn open_lock_file(root: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(root.join(LOCK_FILE))?;
    Ok(file)
}

fn busy(root: &Path) -> QuillError {
    QuillError::WorkspaceBusy(root.display().to_string())
}

impl WorkspaceLocks {
    /// In-process exclusion only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusion across processes via [`LOCK_FILE`].
    pub fn cross_process() -> Self {
        Self {
            lock_files: true,
            ..Self::default()
        }
    }

    fn entry(&self, root: &Path) -> (PathBuf, Arc<tokio::sync::Mutex<()>>) {
        let root = canonical(root);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries referenced only by the map have no lease or waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = locks.entry(root.clone()).or_default().clone();
        (root, lock)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Wait until the workspace is free.
    pub async fn acquire(&self, root: &Path) -> Result<WorkspaceLease> {
        let (root, lock) = self.entry(root);
        let guard = lock.lock_owned().await;

        let file = if self.lock_files {
            let file = open_lock_file(&root)?;
            let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
                .await
                .map_err(std::io::Error::other)??;
            Some(file)
        } else {
            None
        };

        debug!(event = "lock.acquired", workspace = %root.display());
        Ok(WorkspaceLease {
            root,
            _file: file,
            _guard: guard,
        })
    }

    /// Fail with [`QuillError::WorkspaceBusy`] if a cycle is in flight.
    pub fn try_acquire(&self, root: &Path) -> Result<WorkspaceLease> {
        let (root, lock) = self.entry(root);
        let guard = lock.try_lock_owned().map_err(|_| busy(&root))?;

        let file = if self.lock_files {
            let file = open_lock_file(&root)?;
            match file.try_lock_exclusive() {
                Ok(()) => Some(file),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Err(busy(&root));
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        debug!(event = "lock.acquired", workspace = %root.display());
        Ok(WorkspaceLease {
            root,
            _file: file,
            _guard: guard,
        })
    }

    pub async fn acquire_with(&self, root: &Path, policy: LockPolicy) -> Result<WorkspaceLease> {
        match policy {
            LockPolicy::Queue => self.acquire(root).await,
            LockPolicy::Reject => self.try_acquire(root),
        }
    }
}
