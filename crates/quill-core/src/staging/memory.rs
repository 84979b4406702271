//! In-memory backing store with fault injection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::BackingStore;
use crate::domain::{StagingError, WorkspacePath};

/// In-memory store backed by a `BTreeMap<path, bytes>`.
///
/// Every mutating call is appended to an operation log so callers can assert
/// on the order a flush performed its work.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    files: Mutex<BTreeMap<WorkspacePath, Vec<u8>>>,
    failing: Mutex<BTreeSet<WorkspacePath>>,
    ops: Mutex<Vec<String>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file. Panics on an invalid path; intended for fixtures.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        let path = WorkspacePath::parse(path).expect("fixture path must be valid");
        self.files
            .lock()
            .unwrap()
            .insert(path, content.as_bytes().to_vec());
        self
    }

    /// Make every mutation touching `path` fail.
    pub fn fail_on(&self, path: &str) {
        if let Ok(path) = WorkspacePath::parse(path) {
            self.failing.lock().unwrap().insert(path);
        }
    }

    /// File content as UTF-8, if present.
    pub fn get(&self, path: &str) -> Option<String> {
        let path = WorkspacePath::parse(path).ok()?;
        self.files
            .lock()
            .unwrap()
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .keys()
            .map(|p| p.to_string())
            .collect()
    }

    /// Mutations performed so far, e.g. `"write a.txt"`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn check(&self, path: &WorkspacePath) -> Result<(), StagingError> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(StagingError::Backend(format!("injected failure for {path}")));
        }
        Ok(())
    }

    fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn exists(&self, path: &WorkspacePath) -> Result<bool, StagingError> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    async fn read(&self, path: &WorkspacePath) -> Result<Vec<u8>, StagingError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StagingError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &WorkspacePath, content: &[u8]) -> Result<(), StagingError> {
        self.check(path)?;
        self.log(format!("write {path}"));
        self.files
            .lock()
            .unwrap()
            .insert(path.clone(), content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &WorkspacePath) -> Result<(), StagingError> {
        self.check(path)?;
        self.log(format!("delete {path}"));
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StagingError::NotFound(path.to_string()))
    }

    async fn rename(&self, from: &WorkspacePath, to: &WorkspacePath) -> Result<(), StagingError> {
        self.check(from)?;
        self.check(to)?;
        self.log(format!("rename {from} -> {to}"));
        let mut files = self.files.lock().unwrap();
        let content = files
            .remove(from)
            .ok_or_else(|| StagingError::NotFound(from.to_string()))?;
        files.insert(to.clone(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> WorkspacePath {
        WorkspacePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn rename_and_delete() {
        let store = MemoryBackingStore::new().with_file("a.txt", "A");
        store.rename(&p("a.txt"), &p("b.txt")).await.unwrap();
        assert_eq!(store.get("b.txt").as_deref(), Some("A"));
        assert!(store.get("a.txt").is_none());
        store.delete(&p("b.txt")).await.unwrap();
        assert!(store.paths().is_empty());
        assert_eq!(store.ops(), vec!["rename a.txt -> b.txt", "delete b.txt"]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryBackingStore::new();
        store.fail_on("locked.txt");
        assert!(matches!(
            store.write(&p("locked.txt"), b"x").await,
            Err(StagingError::Backend(_))
        ));
        assert!(store.ops().is_empty());
    }
}
