//! `TestDb` — an isolated on-disk `Store` per test, plus small builders for
//! `Memory` / `Fact` fixtures (§10 ambient stack: test tooling mirrors the
//! reference crate's `tests/e2e` harness style).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cortex_core::model::{
    Fact, FactState, FactType, Memory, MemoryClass, MemoryMetadata, DEFAULT_DECAY_RATE,
};
use cortex_core::store::Store;
use tempfile::TempDir;

/// An isolated `Store` backed by a temp-directory SQLite file. Dropping
/// `TestDb` deletes the directory.
pub struct TestDb {
    pub store: Arc<Store>,
    _dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = Store::open(&dir.path().join("cortex.db"), false).expect("open store");
        Self { store: Arc::new(store), _dir: dir }
    }

    pub fn read_only_copy(&self) -> Store {
        Store::open(&self._dir.path().join("cortex.db"), true).expect("open read-only store")
    }

    /// Insert a minimal memory with the given content, returning the
    /// persisted row (with its assigned id).
    pub fn seed_memory(&self, content: &str) -> Memory {
        self.seed_memory_at(content, Utc::now())
    }

    pub fn seed_memory_at(&self, content: &str, imported_at: DateTime<Utc>) -> Memory {
        self.store
            .create_memory(Memory {
                id: 0,
                content: content.to_string(),
                content_hash: format!("{:x}", md5_ish(content)),
                source_file: None,
                source_line: None,
                source_section: None,
                imported_at,
                project: None,
                class: None,
                metadata: MemoryMetadata::default(),
                deleted_at: None,
            })
            .expect("create memory")
    }

    /// Insert a fact owned by `memory_id` with the given subject/predicate/
    /// object, confidence, and `last_reinforced` age in days.
    pub fn seed_fact(
        &self,
        memory_id: i64,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f64,
        age_days: i64,
    ) -> Fact {
        let now = Utc::now();
        let created_at = now - chrono::Duration::days(age_days);
        self.store
            .create_fact(Fact {
                id: 0,
                memory_id,
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                object: object.to_string(),
                fact_type: FactType::Kv,
                confidence,
                decay_rate: DEFAULT_DECAY_RATE,
                created_at,
                last_reinforced: created_at,
                state: FactState::Active,
                superseded_by: None,
                source_quote: None,
                agent: None,
            })
            .expect("create fact")
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap, deterministic content-hash stand-in for fixtures that don't go
/// through the real ingest pipeline's SHA-256 hashing.
fn md5_ish(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

pub fn memory_class(name: &str) -> MemoryClass {
    name.parse().expect("valid memory class")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_is_isolated_per_instance() {
        let a = TestDb::new();
        let b = TestDb::new();
        a.seed_memory("hello from a");
        assert_eq!(a.store.stats().unwrap().memory_count, 1);
        assert_eq!(b.store.stats().unwrap().memory_count, 0);
    }
}
