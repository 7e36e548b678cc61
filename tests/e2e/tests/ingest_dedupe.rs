//! Import pipeline end-to-end (§4.2, §8): exact dedupe, low-signal
//! filtering, and auto-tagging by path/keyword, driven through `Importer`
//! against a real on-disk store.

use cortex_core::ingest::{ImportOptions, ImportOutcome, Importer};
use cortex_core::model::MemoryClass;
use cortex_e2e_tests::harness::TestDb;

#[test]
fn reimporting_identical_content_creates_zero_new_memories() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let opts = ImportOptions::default();
    let content = "always tag production deploys with a signed release note";

    let first = importer.import_text(content, Some("notes/deploys.md"), &opts).unwrap();
    assert_eq!(first.created, 1);

    let second = importer.import_text(content, Some("notes/deploys.md"), &opts).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_exact, 1);

    let stats = db.store.stats().unwrap();
    assert_eq!(stats.memory_count, 1);
}

#[test]
fn short_acknowledgements_are_skipped_as_low_signal() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let result = importer.import_text("thanks", None, &ImportOptions::default()).unwrap();
    assert_eq!(result.created, 0);
    assert_eq!(result.skipped_low_signal, 1);
}

#[test]
fn rules_directory_auto_tags_rule_class() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let result = importer
        .import_text(
            "never merge to main without a green pipeline",
            Some("cortex/rules/merge-policy.md"),
            &ImportOptions::default(),
        )
        .unwrap();
    match &result.outcomes[0] {
        ImportOutcome::Created(m) => assert_eq!(m.class, Some(MemoryClass::Rule)),
        other => panic!("expected Created outcome, got {other:?}"),
    }
}

#[test]
fn explicit_class_override_wins_over_auto_tagging() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let opts = ImportOptions { class: Some(MemoryClass::Scratch), ..ImportOptions::default() };
    let result = importer
        .import_text(
            "we decided to postpone the migration until next quarter",
            Some("notes/decisions/2026-q1.md"),
            &opts,
        )
        .unwrap();
    match &result.outcomes[0] {
        ImportOutcome::Created(m) => assert_eq!(m.class, Some(MemoryClass::Scratch)),
        other => panic!("expected Created outcome, got {other:?}"),
    }
}

#[test]
fn dry_run_reports_would_be_outcome_without_writing() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let opts = ImportOptions { dry_run: true, ..ImportOptions::default() };
    let result = importer
        .import_text("the incident channel is #prod-incidents", None, &opts)
        .unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(db.store.stats().unwrap().memory_count, 0);
}

#[test]
fn import_path_splits_markdown_sections_into_separate_memories() {
    let db = TestDb::new();
    let importer = Importer::new(db.store.clone(), None);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.md");
    std::fs::write(
        &path,
        "# Deploys\nalways run migrations before deploying the service\n\n# On-call\ncurrently rotating weekly starting monday\n",
    )
    .unwrap();

    let result = importer.import_path(&path, &ImportOptions::default()).unwrap();
    assert_eq!(result.created, 2);
}
