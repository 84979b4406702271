//! Staging ("virtual") filesystem.
//!
//! An overlay of pending writes, deletes and renames layered over a read-only
//! view of a [`BackingStore`]. Reads consult the overlay first and fall back
//! to the baseline. [`StagingFs::flush`] commits every entry best-effort: it
//! keeps going after failures and never undoes what it already committed.

pub mod backing;
pub mod fs;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{StagingError, WorkspacePath};

pub use backing::BackingStore;
pub use fs::FsBackingStore;
pub use memory::MemoryBackingStore;

/// Pending state for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingEntry {
    Content(Vec<u8>),
    Tombstone,
    /// Content comes from this baseline path.
    RenamedFrom(WorkspacePath),
}

/// Kind of backing operation a flush performed for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FlushOp {
    Write,
    Delete,
    Rename { from: WorkspacePath },
}

/// Per-path flush result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushOutcome {
    pub path: WorkspacePath,
    #[serde(flatten)]
    pub op: FlushOp,
    /// `None` on success.
    pub error: Option<String>,
    /// SHA-256 of the committed content, for writes.
    pub digest: Option<String>,
}

impl FlushOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a flush, one outcome per committed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub outcomes: Vec<FlushOutcome>,
}

impl FlushReport {
    pub fn failures(&self) -> impl Iterator<Item = &FlushOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Hex SHA-256 of `content`.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Overlay over a backing store, created per response cycle.
pub struct StagingFs<'a> {
    backing: &'a dyn BackingStore,
    overlay: BTreeMap<WorkspacePath, StagingEntry>,
}

impl<'a> StagingFs<'a> {
    pub fn new(backing: &'a dyn BackingStore) -> Self {
        Self {
            backing,
            overlay: BTreeMap::new(),
        }
    }

    pub async fn exists(&self, path: &WorkspacePath) -> Result<bool, StagingError> {
        match self.overlay.get(path) {
            Some(StagingEntry::Tombstone) => Ok(false),
            Some(_) => Ok(true),
            None => self.backing.exists(path).await,
        }
    }

    pub async fn read(&self, path: &WorkspacePath) -> Result<Vec<u8>, StagingError> {
        match self.overlay.get(path) {
            Some(StagingEntry::Content(bytes)) => Ok(bytes.clone()),
            Some(StagingEntry::Tombstone) => Err(StagingError::NotFound(path.to_string())),
            Some(StagingEntry::RenamedFrom(origin)) => self.backing.read(origin).await,
            None => self.backing.read(path).await,
        }
    }

    pub async fn read_to_string(&self, path: &WorkspacePath) -> Result<String, StagingError> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| StagingError::Backend(format!("{path} is not valid UTF-8")))
    }

    /// Record or replace the overlay entry for `path`.
    pub fn stage(&mut self, path: WorkspacePath, entry: StagingEntry) {
        self.overlay.insert(path, entry);
    }

    pub fn write(&mut self, path: WorkspacePath, content: impl Into<Vec<u8>>) {
        self.stage(path, StagingEntry::Content(content.into()));
    }

    /// Stage a delete. Returns whether the file existed.
    pub async fn delete(&mut self, path: WorkspacePath) -> Result<bool, StagingError> {
        let existed = self.exists(&path).await?;
        self.stage(path, StagingEntry::Tombstone);
        Ok(existed)
    }

    /// Stage a rename. The source must exist in the overlay or baseline.
    pub async fn rename(
        &mut self,
        from: WorkspacePath,
        to: WorkspacePath,
    ) -> Result<(), StagingError> {
        let moved = match self.overlay.get(&from) {
            Some(StagingEntry::Tombstone) => {
                return Err(StagingError::NotFound(from.to_string()));
            }
            Some(StagingEntry::Content(bytes)) => StagingEntry::Content(bytes.clone()),
            Some(StagingEntry::RenamedFrom(origin)) => StagingEntry::RenamedFrom(origin.clone()),
            None if self.backing.exists(&from).await? => StagingEntry::RenamedFrom(from.clone()),
            None => return Err(StagingError::NotFound(from.to_string())),
        };
        self.stage(to, moved);
        self.stage(from, StagingEntry::Tombstone);
        Ok(())
    }

    pub fn get(&self, path: &WorkspacePath) -> Option<&StagingEntry> {
        self.overlay.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&WorkspacePath, &StagingEntry)> {
        self.overlay.iter()
    }

    pub fn len(&self) -> usize {
        self.overlay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }

    /// Commit every entry to the backing store and discard the overlay.
    ///
    /// Order: backing renames, then content writes, then deletes. Renames
    /// whose source or destination is involved in another pending entry are
    /// first read from the baseline and committed as writes, so swaps and
    /// chains resolve against the pre-flush state.
    pub async fn flush(self) -> FlushReport {
        let backing = self.backing;
        let mut overlay = self.overlay;
        let mut report = FlushReport::default();

        let origins: BTreeSet<WorkspacePath> = overlay
            .values()
            .filter_map(|entry| match entry {
                StagingEntry::RenamedFrom(origin) => Some(origin.clone()),
                _ => None,
            })
            .collect();

        let entangled: Vec<(WorkspacePath, WorkspacePath)> = overlay
            .iter()
            .filter_map(|(dest, entry)| match entry {
                StagingEntry::RenamedFrom(origin) => {
                    let source_reused = matches!(
                        overlay.get(origin),
                        Some(StagingEntry::Content(_) | StagingEntry::RenamedFrom(_))
                    );
                    (source_reused || origins.contains(dest))
                        .then(|| (dest.clone(), origin.clone()))
                }
                _ => None,
            })
            .collect();

        // origin -> (destination, destination committed?)
        let mut moves: BTreeMap<WorkspacePath, (WorkspacePath, bool)> = BTreeMap::new();

        for (dest, origin) in entangled {
            match backing.read(&origin).await {
                Ok(bytes) => {
                    overlay.insert(dest.clone(), StagingEntry::Content(bytes));
                    moves.insert(origin, (dest, false));
                }
                Err(err) => {
                    warn!(event = "staging.materialize_failed", path = %dest, from = %origin, error = %err);
                    overlay.remove(&dest);
                    report.outcomes.push(FlushOutcome {
                        path: dest.clone(),
                        op: FlushOp::Rename { from: origin.clone() },
                        error: Some(err.to_string()),
                        digest: None,
                    });
                    moves.insert(origin, (dest, false));
                }
            }
        }

        for (dest, entry) in &overlay {
            let StagingEntry::RenamedFrom(origin) = entry else {
                continue;
            };
            let result = backing.rename(origin, dest).await;
            debug!(event = "staging.rename", from = %origin, to = %dest, ok = result.is_ok());
            moves.insert(origin.clone(), (dest.clone(), result.is_ok()));
            report.outcomes.push(FlushOutcome {
                path: dest.clone(),
                op: FlushOp::Rename {
                    from: origin.clone(),
                },
                error: result.err().map(|e| e.to_string()),
                digest: None,
            });
        }

        for (path, entry) in &overlay {
            let StagingEntry::Content(bytes) = entry else {
                continue;
            };
            let result = backing.write(path, bytes).await;
            debug!(event = "staging.write", path = %path, bytes = bytes.len(), ok = result.is_ok());
            let committed = result.is_ok();
            if let Some(origin) = moves
                .iter()
                .find(|(_, (dest, _))| dest == path)
                .map(|(origin, _)| origin.clone())
            {
                moves.insert(origin, (path.clone(), committed));
            }
            report.outcomes.push(FlushOutcome {
                path: path.clone(),
                op: FlushOp::Write,
                digest: committed.then(|| content_digest(bytes)),
                error: result.err().map(|e| e.to_string()),
            });
        }

        for (path, entry) in &overlay {
            if !matches!(entry, StagingEntry::Tombstone) {
                continue;
            }
            let error = match moves.get(path) {
                Some((dest, false)) => Some(format!(
                    "kept: rename destination {dest} was not committed"
                )),
                Some((_, true)) => match backing.exists(path).await {
                    Ok(true) => backing.delete(path).await.err().map(|e| e.to_string()),
                    Ok(false) => None,
                    Err(e) => Some(e.to_string()),
                },
                None => match backing.exists(path).await {
                    Ok(true) => backing.delete(path).await.err().map(|e| e.to_string()),
                    Ok(false) => None,
                    Err(e) => Some(e.to_string()),
                },
            };
            debug!(event = "staging.delete", path = %path, ok = error.is_none());
            report.outcomes.push(FlushOutcome {
                path: path.clone(),
                op: FlushOp::Delete,
                error,
                digest: None,
            });
        }

        for failure in report.failures() {
            warn!(event = "staging.flush_failed", path = %failure.path, error = ?failure.error);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> WorkspacePath {
        WorkspacePath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn overlay_shadows_baseline() {
        let store = MemoryBackingStore::new().with_file("a.txt", "base");
        let mut staging = StagingFs::new(&store);
        assert_eq!(staging.read_to_string(&p("a.txt")).await.unwrap(), "base");

        staging.write(p("a.txt"), "staged");
        assert_eq!(staging.read_to_string(&p("a.txt")).await.unwrap(), "staged");
        assert_eq!(store.get("a.txt").as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn tombstone_hides_baseline() {
        let store = MemoryBackingStore::new().with_file("a.txt", "base");
        let mut staging = StagingFs::new(&store);
        assert!(staging.delete(p("a.txt")).await.unwrap());
        assert!(!staging.exists(&p("a.txt")).await.unwrap());
        assert!(matches!(
            staging.read(&p("a.txt")).await,
            Err(StagingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rename_reads_through_to_origin() {
        let store = MemoryBackingStore::new().with_file("a.txt", "A");
        let mut staging = StagingFs::new(&store);
        staging.rename(p("a.txt"), p("b.txt")).await.unwrap();
        assert!(!staging.exists(&p("a.txt")).await.unwrap());
        assert_eq!(staging.read_to_string(&p("b.txt")).await.unwrap(), "A");
        assert_eq!(
            staging.get(&p("b.txt")),
            Some(&StagingEntry::RenamedFrom(p("a.txt")))
        );
    }

    #[tokio::test]
    async fn rename_of_missing_source_fails() {
        let store = MemoryBackingStore::new();
        let mut staging = StagingFs::new(&store);
        assert!(matches!(
            staging.rename(p("ghost.txt"), p("b.txt")).await,
            Err(StagingError::NotFound(_))
        ));
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn flush_uses_backing_rename_when_independent() {
        let store = MemoryBackingStore::new().with_file("a.txt", "A");
        let mut staging = StagingFs::new(&store);
        staging.rename(p("a.txt"), p("b.txt")).await.unwrap();
        let report = staging.flush().await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(store.ops(), vec!["rename a.txt -> b.txt"]);
        assert_eq!(store.get("b.txt").as_deref(), Some("A"));
        assert!(store.get("a.txt").is_none());
    }

    #[tokio::test]
    async fn flush_resolves_swaps_against_baseline() {
        let store = MemoryBackingStore::new()
            .with_file("a.txt", "A")
            .with_file("b.txt", "B");
        let mut staging = StagingFs::new(&store);
        staging.rename(p("a.txt"), p("tmp.txt")).await.unwrap();
        staging.rename(p("b.txt"), p("a.txt")).await.unwrap();
        staging.rename(p("tmp.txt"), p("b.txt")).await.unwrap();
        let report = staging.flush().await;

        assert!(report.is_success(), "{report:?}");
        assert_eq!(store.get("a.txt").as_deref(), Some("B"));
        assert_eq!(store.get("b.txt").as_deref(), Some("A"));
        assert!(store.get("tmp.txt").is_none());
    }

    #[tokio::test]
    async fn flush_continues_after_failure_without_undo() {
        let store = MemoryBackingStore::new();
        store.fail_on("b.txt");
        let mut staging = StagingFs::new(&store);
        staging.write(p("a.txt"), "1");
        staging.write(p("b.txt"), "2");
        staging.write(p("c.txt"), "3");
        let report = staging.flush().await;

        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.failures().next().unwrap().path, p("b.txt"));
        assert_eq!(store.get("a.txt").as_deref(), Some("1"));
        assert_eq!(store.get("c.txt").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn rename_source_kept_when_destination_fails() {
        let store = MemoryBackingStore::new().with_file("a.txt", "A");
        store.fail_on("b.txt");
        let mut staging = StagingFs::new(&store);
        staging.rename(p("a.txt"), p("b.txt")).await.unwrap();
        let report = staging.flush().await;

        assert_eq!(report.failures().count(), 2);
        assert_eq!(store.get("a.txt").as_deref(), Some("A"));
        assert!(store.get("b.txt").is_none());
        let kept = report
            .outcomes
            .iter()
            .find(|o| o.path == p("a.txt"))
            .unwrap();
        assert!(kept.error.as_deref().unwrap().starts_with("kept"));
    }

    #[tokio::test]
    async fn write_outcomes_carry_digest() {
        let store = MemoryBackingStore::new();
        let mut staging = StagingFs::new(&store);
        staging.write(p("a.txt"), "hello");
        let report = staging.flush().await;
        assert_eq!(
            report.outcomes[0].digest.as_deref(),
            Some(content_digest(b"hello").as_str())
        );
        assert_eq!(content_digest(b"hello").len(), 64);
    }
}
