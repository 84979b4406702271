//! Auto-fix loop behaviour through full cycles.

use std::sync::Arc;

use quill_core::fakes::{ScriptedChecker, ScriptedGenerator};
use quill_core::generate::single_fragment;
use quill_core::{
    CancelFlag, ChangeApplier, Collaborators, CycleRunner, CycleStatus, Diagnostic, Extractor,
    FixStatus, MemoryBackingStore, WorkspaceLocks, MAX_FIX_ATTEMPTS,
};

fn diagnostic() -> Diagnostic {
    Diagnostic::new("src/App.tsx", "Cannot find name 'foo'.")
        .at(4, 10)
        .with_code("TS2304")
}

struct Setup {
    store: Arc<MemoryBackingStore>,
    checker: Arc<ScriptedChecker>,
    generator: Arc<ScriptedGenerator>,
    runner: CycleRunner,
}

fn setup(checker: ScriptedChecker, generator: ScriptedGenerator) -> Setup {
    let store = Arc::new(MemoryBackingStore::new());
    let checker = Arc::new(checker);
    let generator = Arc::new(generator);
    let runner = CycleRunner::new(
        Extractor::default(),
        ChangeApplier::new(store.clone(), Collaborators::default()),
        checker.clone(),
        generator.clone(),
    );
    Setup {
        store,
        checker,
        generator,
        runner,
    }
}

#[tokio::test]
async fn resolves_after_one_fix() {
    let s = setup(
        ScriptedChecker::new(vec![vec![diagnostic()], Vec::new()]),
        ScriptedGenerator::new()
            .respond("<quill-write path=\"src/App.tsx\">const foo = 1;</quill-write>"),
    );
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = s
        .runner
        .run(
            &lease,
            single_fragment("<quill-write path=\"src/App.tsx\">foo;</quill-write>"),
            &CancelFlag::new(),
        )
        .await;

    let session = report.fix_session.clone().unwrap();
    assert_eq!(session.status, FixStatus::Resolved);
    assert_eq!(session.attempts, 1);
    assert_eq!(report.status, CycleStatus::ResolvedAfterFix);
    assert!(report.final_report.is_empty());
    assert_eq!(report.apply_results.len(), 2);
    assert_eq!(s.generator.call_count(), 1);
    assert_eq!(s.checker.call_count(), 2);
    assert_eq!(s.store.get("src/App.tsx").as_deref(), Some("const foo = 1;"));
}

#[tokio::test]
async fn exhausts_after_two_attempts() {
    let s = setup(
        ScriptedChecker::always(vec![diagnostic()]),
        ScriptedGenerator::new()
            .respond("<quill-write path=\"src/App.tsx\">try 1</quill-write>")
            .respond("<quill-write path=\"src/App.tsx\">try 2</quill-write>")
            .respond("<quill-write path=\"src/App.tsx\">never</quill-write>"),
    );
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = s
        .runner
        .run(
            &lease,
            single_fragment("<quill-write path=\"src/App.tsx\">foo;</quill-write>"),
            &CancelFlag::new(),
        )
        .await;

    let session = report.fix_session.clone().unwrap();
    assert_eq!(session.status, FixStatus::Exhausted);
    assert_eq!(session.attempts, MAX_FIX_ATTEMPTS);
    assert_eq!(report.status, CycleStatus::Exhausted);
    assert_eq!(s.generator.call_count(), 2);
    assert_eq!(report.final_report.len(), 1);
    assert_eq!(report.final_report.problems[0].code, "TS2304");
    // Changes from the attempts are kept.
    assert_eq!(s.store.get("src/App.tsx").as_deref(), Some("try 2"));
}

#[tokio::test]
async fn never_exceeds_attempt_cap_with_growing_problems() {
    let rounds = (1..=6)
        .map(|n| (0..n).map(|i| Diagnostic::new(format!("f{i}.ts"), "bad")).collect())
        .collect();
    let s = setup(
        ScriptedChecker::new(rounds),
        ScriptedGenerator::new()
            .respond("nothing useful")
            .respond("still nothing")
            .respond("unreachable"),
    );
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = s
        .runner
        .run(&lease, single_fragment("hello"), &CancelFlag::new())
        .await;

    assert_eq!(report.status, CycleStatus::Exhausted);
    assert_eq!(s.generator.call_count(), 2);
    assert_eq!(s.checker.call_count(), 3);
}

#[tokio::test]
async fn unavailable_checker_never_starts_a_session() {
    let s = setup(ScriptedChecker::unavailable(), ScriptedGenerator::new());
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = s
        .runner
        .run(
            &lease,
            single_fragment("<quill-write path=\"a.txt\">x</quill-write>"),
            &CancelFlag::new(),
        )
        .await;

    assert_eq!(report.status, CycleStatus::Applied);
    assert!(report.fix_session.is_none());
    assert_eq!(s.generator.call_count(), 0);
}

#[tokio::test]
async fn cancel_after_first_attempt_keeps_its_changes() {
    let cancel = CancelFlag::new();
    let s = setup(
        ScriptedChecker::always(vec![diagnostic()]).cancelling_on_call(1, cancel.clone()),
        ScriptedGenerator::new()
            .respond("<quill-write path=\"src/App.tsx\">attempt 1</quill-write>")
            .respond("<quill-write path=\"src/App.tsx\">never</quill-write>"),
    );
    let dir = tempfile::tempdir().unwrap();
    let lease = WorkspaceLocks::new().acquire(dir.path()).await.unwrap();

    let report = s
        .runner
        .run(
            &lease,
            single_fragment("<quill-write path=\"src/App.tsx\">foo;</quill-write>"),
            &cancel,
        )
        .await;

    let session = report.fix_session.clone().unwrap();
    assert_eq!(session.status, FixStatus::Aborted);
    assert_eq!(session.attempts, 1);
    assert_eq!(report.status, CycleStatus::Aborted);
    assert_eq!(report.apply_results.len(), 2);
    assert_eq!(s.generator.call_count(), 1);
    assert_eq!(s.checker.call_count(), 2);
    assert_eq!(s.store.get("src/App.tsx").as_deref(), Some("attempt 1"));
}
