//! End-to-end cycles against a real directory.

use std::sync::Arc;

use quill_core::fakes::{ScriptedChecker, ScriptedGenerator};
use quill_core::generate::fragments;
use quill_core::{
    CancelFlag, ChangeApplier, Collaborators, CycleRunner, CycleStatus, Extractor,
    FsBackingStore, QuillError, WorkspaceLocks,
};

fn runner(root: &std::path::Path) -> CycleRunner {
    CycleRunner::new(
        Extractor::default(),
        ChangeApplier::new(
            Arc::new(FsBackingStore::new(root)),
            Collaborators::default(),
        ),
        Arc::new(ScriptedChecker::clean()),
        Arc::new(ScriptedGenerator::new()),
    )
}

#[tokio::test]
async fn applies_streamed_changes_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("obsolete.txt"), "bye").unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/old.rs"), "fn old() {}\n").unwrap();

    let locks = WorkspaceLocks::new();
    let lease = locks.acquire(dir.path()).await.unwrap();
    let response = "Done.\n\
        <quill-delete path=\"obsolete.txt\"/>\n\
        <quill-rename from=\"src/old.rs\" to=\"src/new.rs\"/>\n\
        <quill-write path=\"src/nested/deep/mod.rs\">pub mod x;\n</quill-write>";
    let parts: Vec<String> = response
        .as_bytes()
        .chunks(5)
        .map(|c| String::from_utf8(c.to_vec()).unwrap())
        .collect();

    let report = runner(dir.path())
        .run(&lease, fragments(parts), &CancelFlag::new())
        .await;

    assert_eq!(report.status, CycleStatus::Applied);
    assert!(!dir.path().join("obsolete.txt").exists());
    assert!(!dir.path().join("src/old.rs").exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
        "fn old() {}\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/nested/deep/mod.rs")).unwrap(),
        "pub mod x;\n"
    );
    let flush = &report.apply_results[0].flush;
    assert!(flush.is_success());
    assert!(flush.outcomes.iter().any(|o| o.digest.is_some()));
}

#[tokio::test]
async fn second_cycle_on_busy_workspace_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let locks = WorkspaceLocks::new();
    let lease = locks.try_acquire(dir.path()).unwrap();

    let busy = locks.try_acquire(dir.path());
    assert!(matches!(busy, Err(QuillError::WorkspaceBusy(_))));

    let report = runner(dir.path())
        .run(
            &lease,
            fragments(vec!["<quill-write path=\"a.txt\">1</quill-write>".to_string()]),
            &CancelFlag::new(),
        )
        .await;
    assert_eq!(report.status, CycleStatus::Applied);
    drop(lease);
    assert!(locks.try_acquire(dir.path()).is_ok());
}

#[tokio::test]
async fn escaping_paths_are_skipped_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = runner(dir.path())
        .run(
            &lease,
            fragments(vec![
                "<quill-write path=\"../outside.txt\">x</quill-write>".to_string(),
                "<quill-write path=\"inside.txt\">y</quill-write>".to_string(),
            ]),
            &CancelFlag::new(),
        )
        .await;

    assert_eq!(report.warnings.len(), 1);
    assert!(dir.path().join("inside.txt").exists());
    assert!(!dir.path().parent().unwrap().join("outside.txt").exists());
}
