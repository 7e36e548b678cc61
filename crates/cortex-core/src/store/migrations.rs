//! Database Migrations
//!
//! Forward-only schema migrations, applied in order under a single
//! transaction each (§4.1). `PRAGMA user_version` tracks the applied
//! version; never ad-hoc `ALTER TABLE` outside this list.

/// A single forward migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, facts, embeddings, access events, alerts, projects, edges",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Covering indexes for freshness/growth reporting and stale-fact scans",
        up: MIGRATION_V2_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    source_file TEXT,
    source_line INTEGER,
    source_section TEXT,
    imported_at TEXT NOT NULL,
    project TEXT,
    class TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    deleted_at TEXT
);

-- Dedupe invariant: content_hash unique among non-deleted memories (§3).
CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_hash_active
    ON memories(content_hash) WHERE deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);
CREATE INDEX IF NOT EXISTS idx_memories_source_file ON memories(source_file);
CREATE INDEX IF NOT EXISTS idx_memories_imported_at ON memories(imported_at);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE OF content ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TABLE IF NOT EXISTS facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL REFERENCES memories(id),
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    fact_type TEXT NOT NULL,
    confidence REAL NOT NULL,
    decay_rate REAL NOT NULL DEFAULT 0.01,
    created_at TEXT NOT NULL,
    last_reinforced TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active',
    superseded_by INTEGER REFERENCES facts(id),
    source_quote TEXT,
    agent TEXT
);

CREATE INDEX IF NOT EXISTS idx_facts_memory ON facts(memory_id);
CREATE INDEX IF NOT EXISTS idx_facts_subject_predicate ON facts(subject, predicate);
CREATE INDEX IF NOT EXISTS idx_facts_type ON facts(fact_type);
CREATE INDEX IF NOT EXISTS idx_facts_state ON facts(state);

CREATE TABLE IF NOT EXISTS embeddings (
    memory_id INTEGER PRIMARY KEY REFERENCES memories(id),
    vector BLOB NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fact_id INTEGER NOT NULL REFERENCES facts(id),
    actor TEXT,
    access_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_access_fact ON access_events(fact_id);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    fact_id INTEGER REFERENCES facts(id),
    related_fact_id INTEGER REFERENCES facts(id),
    message TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT '{}',
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    name TEXT PRIMARY KEY,
    auto_tag_rules TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fact_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_fact INTEGER NOT NULL REFERENCES facts(id),
    to_fact INTEGER NOT NULL REFERENCES facts(id),
    edge_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON fact_edges(from_fact);
CREATE INDEX IF NOT EXISTS idx_edges_to ON fact_edges(to_fact);
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_facts_last_reinforced ON facts(last_reinforced);
CREATE INDEX IF NOT EXISTS idx_memories_deleted_at ON memories(deleted_at);
CREATE INDEX IF NOT EXISTS idx_access_created_at ON access_events(created_at);
"#;
