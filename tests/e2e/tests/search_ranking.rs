//! Hybrid search ranking end-to-end (§4.5, §8): class boosting, confidence
//! weighting, and keyword-vs-semantic mode selection against a real store.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use cortex_core::collab::EmbeddingProvider;
use cortex_core::error::Result;
use cortex_core::model::{Memory, MemoryClass, MemoryMetadata};
use cortex_core::search::{SearchEngine, SearchMode, SearchOptions};
use cortex_e2e_tests::harness::TestDb;

/// Deterministic stand-in embedder: maps a handful of known phrases onto
/// orthogonal-ish unit vectors so hybrid/semantic search has something real
/// to rank against without a network call.
struct StubEmbedder;

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vectorize(t)).collect())
    }
    fn dimensions(&self) -> usize {
        3
    }
    fn model_id(&self) -> &str {
        "stub-embedder"
    }
}

fn vectorize(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let rust = lower.contains("rust") as i32 as f32;
    let deploy = lower.contains("deploy") as i32 as f32;
    let cat = lower.contains("cat") as i32 as f32;
    vec![rust, deploy, cat]
}

fn seed_classed_memory(db: &TestDb, content: &str, class: MemoryClass) -> Memory {
    db.store
        .create_memory(Memory {
            id: 0,
            content: content.to_string(),
            content_hash: format!("{:x}", seahash(content)),
            source_file: None,
            source_line: None,
            source_section: None,
            imported_at: Utc::now(),
            project: None,
            class: Some(class),
            metadata: MemoryMetadata::default(),
            deleted_at: None,
        })
        .unwrap()
}

fn seahash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[test]
fn keyword_search_ranks_matching_content_above_unrelated_content() {
    let db = TestDb::new();
    db.seed_memory("the rust compiler enforces ownership at compile time");
    db.seed_memory("the office coffee machine broke again this week");

    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), None);
    let opts = SearchOptions { mode: SearchMode::Keyword, ..SearchOptions::default() };
    let results = engine.search("rust ownership", &opts).unwrap();

    assert!(!results.is_empty());
    assert!(results[0].memory.content.contains("rust"));
}

#[test]
fn rule_class_outranks_scratch_class_at_equal_keyword_overlap() {
    let db = TestDb::new();
    let rule = seed_classed_memory(&db, "rotate the access keys every ninety days", MemoryClass::Rule);
    let scratch = seed_classed_memory(&db, "rotate the access keys every ninety days too", MemoryClass::Scratch);

    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), None);
    let opts = SearchOptions { mode: SearchMode::Keyword, limit: 5, ..SearchOptions::default() };
    let results = engine.search("rotate access keys ninety days", &opts).unwrap();

    let rule_score = results.iter().find(|r| r.memory.id == rule.id).unwrap().final_score;
    let scratch_score = results.iter().find(|r| r.memory.id == scratch.id).unwrap().final_score;
    assert!(rule_score > scratch_score);
}

#[test]
fn hybrid_search_surfaces_semantic_matches_missed_by_keyword_overlap() {
    let db = TestDb::new();
    db.seed_memory("we deploy the rust service nightly via the release pipeline");
    db.seed_memory("the neighborhood cat knocked over a plant pot");

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), Some(embedder));

    let opts = SearchOptions { mode: SearchMode::Hybrid, ..SearchOptions::default() };
    let results = engine.search("rust deploy", &opts).unwrap();

    assert!(!results.is_empty());
    assert!(results[0].memory.content.contains("rust"));
}

#[test]
fn explain_is_only_populated_when_requested() {
    let db = TestDb::new();
    db.seed_memory("the staging environment mirrors production topology");

    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), None);
    let without_explain = engine
        .search("staging environment", &SearchOptions { mode: SearchMode::Keyword, ..SearchOptions::default() })
        .unwrap();
    assert!(without_explain[0].explain.is_none());

    let with_explain = engine
        .search(
            "staging environment",
            &SearchOptions { mode: SearchMode::Keyword, explain: true, ..SearchOptions::default() },
        )
        .unwrap();
    assert!(with_explain[0].explain.is_some());
}

#[test]
fn invalid_limit_is_rejected_before_any_query_executes() {
    let db = TestDb::new();
    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), None);
    let opts = SearchOptions { limit: 0, ..SearchOptions::default() };
    assert!(engine.search("anything", &opts).is_err());
}

#[test]
fn superseded_facts_are_hidden_unless_requested() {
    let db = TestDb::new();
    let m = db.seed_memory("the default timeout is 30 seconds");
    let old = db.seed_fact(m.id, "timeout", "is", "30 seconds", 0.7, 0);
    let new = db.seed_fact(m.id, "timeout", "is", "60 seconds", 0.9, 0);
    db.store.supersede_fact(old.id, new.id, "reconfigured", Utc::now()).unwrap();

    let engine = SearchEngine::new(db.store.clone(), Arc::new(RwLock::new(None)), None);
    let visible = engine
        .search("default timeout", &SearchOptions { mode: SearchMode::Keyword, ..SearchOptions::default() })
        .unwrap();
    let hit = visible.iter().find(|r| r.memory.id == m.id).unwrap();
    assert_eq!(hit.primary_fact.as_ref().unwrap().id, new.id);
}
