//! Store-level invariants (§8): dedupe, soft delete, supersession
//! acyclicity, and confidence decay monotonicity, driven end-to-end
//! through the public `Store` API rather than in-crate unit tests.

use chrono::Utc;
use cortex_core::model::{Fact, FactState, FactType, Memory, MemoryMetadata};
use cortex_core::store::ListOpts;
use cortex_e2e_tests::harness::TestDb;

#[test]
fn duplicate_content_hash_is_rejected() {
    let db = TestDb::new();
    let original = db.seed_memory("the staging cluster runs on us-east-1");
    let dup = Memory {
        id: 0,
        content: "the staging cluster runs on us-east-1 (restated)".to_string(),
        content_hash: original.content_hash.clone(),
        source_file: None,
        source_line: None,
        source_section: None,
        imported_at: Utc::now(),
        project: None,
        class: None,
        metadata: MemoryMetadata::default(),
        deleted_at: None,
    };
    assert!(db.store.create_memory(dup).is_err());
}

#[test]
fn soft_deleted_memories_are_invisible_to_get_and_list() {
    let db = TestDb::new();
    let m = db.seed_memory("on-call rotation starts monday at 9am");
    db.store.soft_delete_memory(m.id).unwrap();

    assert!(db.store.get_memory(m.id).unwrap().is_none());
    assert!(db.store.list_memories(&ListOpts::new()).unwrap().is_empty());
}

#[test]
fn effective_confidence_never_increases_without_reinforcement() {
    let db = TestDb::new();
    let m = db.seed_memory("the database backup window is 2am utc");
    let fact = db.seed_fact(m.id, "backup_window", "is", "2am utc", 0.9, 10);

    let now = fact.last_reinforced;
    let later = now + chrono::Duration::days(5);
    let even_later = later + chrono::Duration::days(5);

    let at_now = fact.effective_confidence_at(now);
    let at_later = fact.effective_confidence_at(later);
    let at_even_later = fact.effective_confidence_at(even_later);

    assert!(at_later <= at_now);
    assert!(at_even_later <= at_later);
}

#[test]
fn reinforcing_a_fact_never_decreases_confidence_and_revives_retired_facts() {
    let db = TestDb::new();
    let m = db.seed_memory("the release train ships every other tuesday");
    let fact = db.seed_fact(m.id, "release_train", "ships", "every other tuesday", 0.4, 40);
    db.store.update_fact_state(fact.id, FactState::Retired).unwrap();

    let reinforced = db.store.reinforce_fact(fact.id, Some("agent-a"), Utc::now()).unwrap();
    assert_eq!(reinforced.state, FactState::Active);
    assert!(reinforced.confidence >= fact.confidence);
}

#[test]
fn supersession_chain_rejects_cycles() {
    let db = TestDb::new();
    let m = db.seed_memory("the primary datastore is postgres");
    let a = db.seed_fact(m.id, "datastore", "is", "postgres", 0.6, 0);
    let b = db.seed_fact(m.id, "datastore", "is", "cockroachdb", 0.8, 0);

    assert!(db.store.supersede_fact(a.id, b.id, "migration", Utc::now()).unwrap());
    let err = db.store.supersede_fact(b.id, a.id, "revert", Utc::now()).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn supersede_is_idempotent_on_repeated_application() {
    let db = TestDb::new();
    let m = db.seed_memory("the default region is us-west-2");
    let a = db.seed_fact(m.id, "region", "is", "us-west-2", 0.6, 0);
    let b = db.seed_fact(m.id, "region", "is", "eu-central-1", 0.9, 0);

    assert!(db.store.supersede_fact(a.id, b.id, "reconfigured", Utc::now()).unwrap());
    assert!(!db.store.supersede_fact(a.id, b.id, "reconfigured", Utc::now()).unwrap());

    let loser = db.store.get_fact(a.id).unwrap().unwrap();
    assert_eq!(loser.state, FactState::Superseded);
    assert_eq!(loser.confidence, 0.0);
}

#[test]
fn fact_requires_an_existing_memory() {
    let db = TestDb::new();
    let orphan = Fact {
        id: 0,
        memory_id: 99_999,
        subject: "s".to_string(),
        predicate: "p".to_string(),
        object: "o".to_string(),
        fact_type: FactType::Kv,
        confidence: 0.5,
        decay_rate: 0.01,
        created_at: Utc::now(),
        last_reinforced: Utc::now(),
        state: FactState::Active,
        superseded_by: None,
        source_quote: None,
        agent: None,
    };
    assert!(db.store.create_fact(orphan).is_err());
}

#[test]
fn read_only_store_rejects_every_mutation() {
    let db = TestDb::new();
    db.seed_memory("read-only smoke test memory");
    let ro = db.read_only_copy();
    assert!(ro.is_read_only());
    assert!(ro
        .create_memory(Memory {
            id: 0,
            content: "should not persist".to_string(),
            content_hash: "should-not-persist".to_string(),
            source_file: None,
            source_line: None,
            source_section: None,
            imported_at: Utc::now(),
            project: None,
            class: None,
            metadata: MemoryMetadata::default(),
            deleted_at: None,
        })
        .is_err());
}
