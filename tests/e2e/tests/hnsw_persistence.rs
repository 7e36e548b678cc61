//! HNSW index + embed lock end-to-end (§4.4, §5, §8): save/load fidelity
//! through the embed engine's own persistence path, and the process-exclusive
//! lock's stale-reclaim semantics.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use cortex_core::config::CortexConfig;
use cortex_core::embed::{EmbedEngine, EmbedLock, EmbedOptions};
use cortex_core::error::Result;
use cortex_core::collab::EmbeddingProvider;
use cortex_core::hnsw::Index as HnswIndex;
use cortex_core::model::Memory;
use cortex_e2e_tests::harness::TestDb;

struct DeterministicEmbedder {
    dims: usize,
}

impl EmbeddingProvider for DeterministicEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let seed = t.len() as f32;
                (0..self.dims).map(|i| (seed + i as f32).sin()).collect()
            })
            .collect())
    }
    fn dimensions(&self) -> usize {
        self.dims
    }
    fn model_id(&self) -> &str {
        "deterministic-test"
    }
}

#[test]
fn embed_pass_persists_an_hnsw_index_loadable_from_disk() {
    let db = TestDb::new();
    for i in 0..8 {
        db.store
            .create_memory(Memory {
                id: 0,
                content: format!("fact number {i} about the release pipeline"),
                content_hash: format!("hash-{i}"),
                source_file: None,
                source_line: None,
                source_section: None,
                imported_at: Utc::now(),
                project: None,
                class: None,
                metadata: Default::default(),
                deleted_at: None,
            })
            .unwrap();
    }

    let tmp = tempfile::tempdir().unwrap();
    let config = CortexConfig {
        db_path: tmp.path().join("cortex.db"),
        read_only: false,
        embed_enabled: true,
        telemetry_enabled: false,
    };
    let hnsw = Arc::new(RwLock::new(None));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbedder { dims: 4 });
    let engine = EmbedEngine::new(db.store.clone(), hnsw, embedder, &config);

    let result = engine.run_once(&EmbedOptions::default()).unwrap();
    assert_eq!(result.embedded, 8);

    let loaded = HnswIndex::load(&config.hnsw_path()).unwrap();
    assert_eq!(loaded.len(), 8);
}

#[test]
fn hnsw_save_load_round_trip_preserves_nearest_neighbor_order() {
    let mut index = HnswIndex::with_defaults(6);
    for i in 0..40i64 {
        let vector: Vec<f32> = (0..6).map(|j| ((i + j) as f32 * 0.13).cos()).collect();
        index.insert(i, &vector).unwrap();
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cortex.hnsw");
    index.save(&path).unwrap();
    let loaded = HnswIndex::load(&path).unwrap();

    let query: Vec<f32> = (0..6).map(|j| (j as f32 * 0.31).sin()).collect();
    let before: Vec<i64> = index.search(&query, 5).unwrap().into_iter().map(|(id, _)| id).collect();
    let after: Vec<i64> = loaded.search(&query, 5).unwrap().into_iter().map(|(id, _)| id).collect();
    assert_eq!(before, after);
}

#[test]
fn embed_lock_reclaims_a_lock_held_by_a_dead_pid() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("embed.lock");
    std::fs::write(&path, "pid=0\nstarted_at=2026-01-01T00:00:00Z\n").unwrap();

    let lock = EmbedLock::acquire(&path).unwrap();
    assert!(path.exists());
    drop(lock);
    assert!(!path.exists());
}

#[test]
fn embed_lock_blocks_while_its_own_process_still_holds_it() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("embed.lock");
    let _lock = EmbedLock::acquire(&path).unwrap();
    let second = EmbedLock::acquire(&path);
    assert!(second.is_err());
}
