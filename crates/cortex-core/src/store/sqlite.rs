//! SQLite-backed Store (§4.1).
//!
//! Single writer / multi reader, WAL-mode concurrency. All multi-row writes
//! execute inside one `rusqlite::Transaction`; read-only stores reject every
//! mutating operation with `StoreError::ReadOnly`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, warn};

use crate::model::{
    AccessEvent, AccessType, Alert, AlertSeverity, Embedding, Fact, FactEdge, FactState, FactType,
    Memory, MemoryClass, MemoryMetadata, Project,
};

use super::migrations::MIGRATIONS;
use super::options::{ListOpts, SortBy};

/// Store-local error type (§7, §10).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store is read-only")]
    ReadOnly,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("database is locked: {0}")]
    Transient(String),
    #[error("fatal store error: {0}")]
    Fatal(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for crate::error::CoreError {
    fn from(e: StoreError) -> Self {
        use crate::error::CoreError;
        match e {
            StoreError::NotFound(s) => CoreError::NotFound(s),
            StoreError::Conflict(s) => CoreError::Conflict(s),
            StoreError::ReadOnly => CoreError::ReadOnly,
            StoreError::InvalidInput(s) => CoreError::InvalidInput(s),
            StoreError::Transient(s) => CoreError::Transient(s),
            StoreError::Fatal(s) => CoreError::Fatal(s),
            StoreError::Database(e) => CoreError::Database(e),
            StoreError::Io(e) => CoreError::Io(e),
            StoreError::Json(e) => CoreError::Json(e),
        }
    }
}

fn busy_is_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Retry a write against a bounded backoff when SQLite reports the database
/// is busy/locked (§4.1 failure semantics).
fn with_retry<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> StoreResult<T> {
    let mut delay_ms = 20u64;
    for attempt in 0..6 {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if busy_is_locked(&e) && attempt < 5 => {
                debug!(attempt, delay_ms, "database busy, retrying");
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                delay_ms = (delay_ms * 2).min(1000);
            }
            Err(e) if busy_is_locked(&e) => {
                warn!(error = %e, "database still busy after retries, giving up");
                return Err(StoreError::Transient(e.to_string()));
            }
            Err(e) => return Err(StoreError::Database(e)),
        }
    }
    unreachable!()
}

/// Aggregate counts returned by `Store::stats` (§4.6).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub memory_count: i64,
    pub fact_count: i64,
    pub embedding_count: i64,
    pub source_count: i64,
    pub storage_bytes: i64,
    pub average_confidence: f64,
}

/// Freshness buckets based on the local calendar (§4.6).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FreshnessDistribution {
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
    pub older: i64,
}

/// An attribute conflict between two non-superseded facts (§4.6).
#[derive(Debug, Clone)]
pub struct AttributeConflictPair {
    pub fact1: Fact,
    pub fact2: Fact,
}

/// Durable store (§4.1). Holds one writer connection and one reader
/// connection, both serialized behind a mutex, mirroring the reference
/// crate's split of reader/writer connections for interior mutability.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    read_only: bool,
}

impl Store {
    /// Open (or create) the store at `path`. Runs pending migrations unless
    /// `read_only` is set, in which case a stale schema is `StoreError::Fatal`.
    pub fn open(path: &Path, read_only: bool) -> StoreResult<Self> {
        if read_only && !path.exists() {
            return Err(StoreError::NotFound(format!(
                "database not found at {} (read-only, cannot create)",
                path.display()
            )));
        }
        std::fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;

        let writer_conn = Connection::open(path)?;
        configure_connection(&writer_conn)?;

        if read_only {
            let version = schema_version(&writer_conn)?;
            let latest = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
            if version < latest {
                return Err(StoreError::Fatal(format!(
                    "schema version {version} is older than required {latest}; open read-write once to migrate"
                )));
            }
            if version > latest {
                return Err(StoreError::Fatal(format!(
                    "schema version {version} is newer than this build supports ({latest})"
                )));
            }
        } else {
            run_migrations(&writer_conn)?;
        }

        let reader_conn = Connection::open(path)?;
        configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            read_only,
        })
    }

    /// Open an in-memory store, primarily for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let writer_conn = Connection::open_in_memory()?;
        configure_connection(&writer_conn)?;
        run_migrations(&writer_conn)?;
        // in-memory DBs cannot be shared across connections by path; use the
        // same connection for reads (single-threaded test usage only).
        let reader_conn = Connection::open_in_memory()?;
        configure_connection(&reader_conn)?;
        run_migrations(&reader_conn)?;
        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            read_only: false,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().expect("store writer mutex poisoned")
    }

    fn reader(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().expect("store reader mutex poisoned")
    }

    // ---------------------------------------------------------------
    // Memories
    // ---------------------------------------------------------------

    /// Insert a new memory. Returns `StoreError::Conflict` if a non-deleted
    /// memory with the same `content_hash` already exists (§3 invariant).
    pub fn create_memory(&self, mut memory: Memory) -> StoreResult<Memory> {
        self.check_writable()?;
        let conn = self.writer();
        if self.find_memory_by_hash_conn(&conn, &memory.content_hash)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "memory with content_hash {} already exists",
                memory.content_hash
            )));
        }
        let metadata_json = serde_json::to_string(&memory.metadata)?;
        with_retry(|| {
            conn.execute(
                "INSERT INTO memories
                    (content, content_hash, source_file, source_line, source_section,
                     imported_at, project, class, metadata, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
                params![
                    memory.content,
                    memory.content_hash,
                    memory.source_file,
                    memory.source_line,
                    memory.source_section,
                    memory.imported_at.to_rfc3339(),
                    memory.project,
                    memory.class.map(|c| c.as_str().to_string()),
                    metadata_json,
                ],
            )
        })?;
        memory.id = conn.last_insert_rowid();
        Ok(memory)
    }

    pub fn get_memory(&self, id: i64) -> StoreResult<Option<Memory>> {
        let conn = self.reader();
        get_memory_conn(&conn, id)
    }

    fn find_memory_by_hash_conn(
        &self,
        conn: &Connection,
        content_hash: &str,
    ) -> StoreResult<Option<Memory>> {
        conn.query_row(
            "SELECT id, content, content_hash, source_file, source_line, source_section,
                    imported_at, project, class, metadata, deleted_at
             FROM memories WHERE content_hash = ?1 AND deleted_at IS NULL",
            params![content_hash],
            row_to_memory,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Find a non-deleted memory by content hash (exact dedupe, §4.2 step 4).
    pub fn find_memory_by_hash(&self, content_hash: &str) -> StoreResult<Option<Memory>> {
        let conn = self.reader();
        self.find_memory_by_hash_conn(&conn, content_hash)
    }

    /// Update memory content; this bumps the content hash rather than
    /// mutating identity (§3 lifecycle).
    pub fn update_memory_content(
        &self,
        id: i64,
        content: String,
        content_hash: String,
    ) -> StoreResult<Memory> {
        self.check_writable()?;
        let conn = self.writer();
        let updated = with_retry(|| {
            conn.execute(
                "UPDATE memories SET content = ?1, content_hash = ?2 WHERE id = ?3 AND deleted_at IS NULL",
                params![content, content_hash, id],
            )
        })?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("memory {id}")));
        }
        get_memory_conn(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("memory {id}")))
    }

    /// Soft-delete a memory (§3: never physically removed until cleanup).
    pub fn soft_delete_memory(&self, id: i64) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        let updated = with_retry(|| {
            conn.execute(
                "UPDATE memories SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![Utc::now().to_rfc3339(), id],
            )
        })?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    /// Physically purge memories soft-deleted before `before` (maintenance
    /// cleanup pass). Returns the number of rows removed.
    pub fn purge_deleted_memories(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        self.check_writable()?;
        let conn = self.writer();
        let n = with_retry(|| {
            conn.execute(
                "DELETE FROM memories WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
                params![before.to_rfc3339()],
            )
        })?;
        Ok(n as u64)
    }

    pub fn list_memories(&self, opts: &ListOpts) -> StoreResult<Vec<Memory>> {
        let conn = self.reader();
        let mut sql = String::from(
            "SELECT id, content, content_hash, source_file, source_line, source_section,
                    imported_at, project, class, metadata, deleted_at
             FROM memories WHERE deleted_at IS NULL",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(sf) = &opts.source_file {
            sql.push_str(" AND source_file = ?");
            binds.push(Box::new(sf.clone()));
        }
        if !opts.memory_classes.is_empty() {
            let placeholders = opts
                .memory_classes
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND class IN ({placeholders})"));
            for c in &opts.memory_classes {
                binds.push(Box::new(c.as_str().to_string()));
            }
        }
        if let Some(agent) = &opts.agent {
            sql.push_str(" AND json_extract(metadata, '$.agent') = ?");
            binds.push(Box::new(agent.clone()));
        }
        if let Some(channel) = &opts.channel {
            sql.push_str(" AND json_extract(metadata, '$.channel') = ?");
            binds.push(Box::new(channel.clone()));
        }
        if let Some(after) = opts.after {
            sql.push_str(" AND imported_at > ?");
            binds.push(Box::new(after.to_rfc3339()));
        }
        if let Some(before) = opts.before {
            sql.push_str(" AND imported_at < ?");
            binds.push(Box::new(before.to_rfc3339()));
        }

        sql.push_str(match opts.sort_by {
            SortBy::Date => " ORDER BY imported_at DESC",
            SortBy::Confidence => " ORDER BY imported_at DESC", // memories carry no confidence
            SortBy::Id => " ORDER BY id ASC",
        });
        sql.push_str(" LIMIT ?");
        binds.push(Box::new(opts.limit.unwrap_or(100) as i64));
        sql.push_str(" OFFSET ?");
        binds.push(Box::new(opts.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_memory)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Facts
    // ---------------------------------------------------------------

    pub fn create_fact(&self, mut fact: Fact) -> StoreResult<Fact> {
        self.check_writable()?;
        let conn = self.writer();
        if get_memory_conn(&conn, fact.memory_id)?.is_none() {
            return Err(StoreError::Conflict(format!(
                "fact references missing or deleted memory {}",
                fact.memory_id
            )));
        }
        with_retry(|| {
            conn.execute(
                "INSERT INTO facts
                    (memory_id, subject, predicate, object, fact_type, confidence, decay_rate,
                     created_at, last_reinforced, state, superseded_by, source_quote, agent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    fact.memory_id,
                    fact.subject,
                    fact.predicate,
                    fact.object,
                    fact.fact_type.as_str(),
                    fact.confidence,
                    fact.decay_rate,
                    fact.created_at.to_rfc3339(),
                    fact.last_reinforced.to_rfc3339(),
                    fact.state.as_str(),
                    fact.superseded_by,
                    fact.source_quote,
                    fact.agent,
                ],
            )
        })?;
        fact.id = conn.last_insert_rowid();
        Ok(fact)
    }

    pub fn get_fact(&self, id: i64) -> StoreResult<Option<Fact>> {
        let conn = self.reader();
        get_fact_conn(&conn, id)
    }

    /// Reinforce a fact: bump `last_reinforced` to `now`, never decrease
    /// confidence (§8 invariant 4), and append a `Reinforce` access event.
    pub fn reinforce_fact(&self, id: i64, actor: Option<&str>, now: DateTime<Utc>) -> StoreResult<Fact> {
        self.check_writable()?;
        let conn_guard = self.writer();
        let conn: &Connection = &conn_guard;
        let tx = conn.unchecked_transaction()?;
        let fact = get_fact_tx(&tx, id)?.ok_or_else(|| StoreError::NotFound(format!("fact {id}")))?;
        let new_state = if fact.state == FactState::Retired {
            FactState::Active
        } else {
            fact.state
        };
        tx.execute(
            "UPDATE facts SET last_reinforced = ?1, state = ?2 WHERE id = ?3",
            params![now.to_rfc3339(), new_state.as_str(), id],
        )?;
        insert_access_event_tx(&tx, id, actor, AccessType::Reinforce, now)?;
        tx.commit()?;
        get_fact_conn(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("fact {id}")))
    }

    pub fn update_fact_confidence(&self, id: i64, confidence: f64) -> StoreResult<()> {
        self.check_writable()?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(StoreError::InvalidInput(format!(
                "confidence {confidence} out of [0,1]"
            )));
        }
        let conn = self.writer();
        let n = with_retry(|| {
            conn.execute(
                "UPDATE facts SET confidence = ?1 WHERE id = ?2",
                params![confidence, id],
            )
        })?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("fact {id}")));
        }
        Ok(())
    }

    pub fn update_fact_state(&self, id: i64, state: FactState) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        let n = with_retry(|| {
            conn.execute(
                "UPDATE facts SET state = ?1 WHERE id = ?2",
                params![state.as_str(), id],
            )
        })?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("fact {id}")));
        }
        Ok(())
    }

    /// Supersede `old_id` with `new_id` (§4.7). Rejects cycles (§9): if
    /// `new_id` transitively points back to `old_id` via `superseded_by`,
    /// this is `StoreError::Conflict`. Idempotent: a second application on
    /// an already-superseded loser is a no-op returning `false`.
    pub fn supersede_fact(
        &self,
        old_id: i64,
        new_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_writable()?;
        if old_id == new_id {
            return Err(StoreError::Conflict(
                "a fact cannot supersede itself".to_string(),
            ));
        }
        let conn_guard = self.writer();
        let conn: &Connection = &conn_guard;
        let tx = conn.unchecked_transaction()?;

        let loser = get_fact_tx(&tx, old_id)?
            .ok_or_else(|| StoreError::NotFound(format!("fact {old_id}")))?;
        let winner = get_fact_tx(&tx, new_id)?
            .ok_or_else(|| StoreError::NotFound(format!("fact {new_id}")))?;

        if loser.state == FactState::Superseded && loser.superseded_by == Some(new_id) {
            return Ok(false);
        }

        // Acyclicity: walk winner's supersession chain; it must never reach loser.
        let mut cursor = winner.superseded_by;
        let mut hops = 0;
        while let Some(next) = cursor {
            if next == old_id {
                return Err(StoreError::Conflict(format!(
                    "supersede({old_id}, {new_id}) would create a cycle"
                )));
            }
            hops += 1;
            if hops > 10_000 {
                return Err(StoreError::Fatal("supersession chain too long".to_string()));
            }
            cursor = get_fact_tx(&tx, next)?.and_then(|f| f.superseded_by);
        }

        tx.execute(
            "UPDATE facts SET state = ?1, superseded_by = ?2, confidence = 0.0 WHERE id = ?3",
            params![FactState::Superseded.as_str(), new_id, old_id],
        )?;
        insert_access_event_tx(&tx, old_id, None, AccessType::Supersede, now)?;
        insert_access_event_tx(&tx, new_id, None, AccessType::Reinforce, now)?;
        tx.execute(
            "UPDATE facts SET last_reinforced = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), new_id],
        )?;
        tx.execute(
            "INSERT INTO fact_edges (from_fact, to_fact, edge_type, created_at)
             VALUES (?1, ?2, 'contradicts', ?3)",
            params![old_id, new_id, now.to_rfc3339()],
        )?;
        tx.execute(
            "INSERT INTO alerts (alert_type, severity, fact_id, related_fact_id, message, detail, acknowledged, created_at)
             VALUES ('supersede', 'info', ?1, ?2, ?3, '{}', 0, ?4)",
            params![
                old_id,
                new_id,
                format!("fact {old_id} superseded by {new_id}: {reason}"),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        debug!(old_id, new_id, %reason, "fact superseded");
        Ok(true)
    }

    pub fn list_facts(&self, opts: &ListOpts) -> StoreResult<Vec<Fact>> {
        let conn = self.reader();
        let mut sql = String::from(
            "SELECT f.id, f.memory_id, f.subject, f.predicate, f.object, f.fact_type,
                    f.confidence, f.decay_rate, f.created_at, f.last_reinforced, f.state,
                    f.superseded_by, f.source_quote, f.agent
             FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !opts.include_superseded {
            sql.push_str(" AND f.state != 'superseded'");
        }
        if let Some(ft) = opts.fact_type {
            sql.push_str(" AND f.fact_type = ?");
            binds.push(Box::new(ft.as_str().to_string()));
        }
        if let Some(sf) = &opts.source_file {
            sql.push_str(" AND m.source_file = ?");
            binds.push(Box::new(sf.clone()));
        }
        if !opts.memory_classes.is_empty() {
            let placeholders = opts
                .memory_classes
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND m.class IN ({placeholders})"));
            for c in &opts.memory_classes {
                binds.push(Box::new(c.as_str().to_string()));
            }
        }
        if let Some(agent) = &opts.agent {
            sql.push_str(" AND f.agent = ?");
            binds.push(Box::new(agent.clone()));
        }
        if let Some(after) = opts.after {
            sql.push_str(" AND f.created_at > ?");
            binds.push(Box::new(after.to_rfc3339()));
        }
        if let Some(before) = opts.before {
            sql.push_str(" AND f.created_at < ?");
            binds.push(Box::new(before.to_rfc3339()));
        }
        let _ = &opts.channel; // facts carry no channel; filter is a no-op here

        sql.push_str(match opts.sort_by {
            SortBy::Date => " ORDER BY f.created_at DESC",
            SortBy::Confidence => " ORDER BY f.confidence DESC",
            SortBy::Id => " ORDER BY f.id ASC",
        });
        sql.push_str(" LIMIT ?");
        binds.push(Box::new(opts.limit.unwrap_or(100) as i64));
        sql.push_str(" OFFSET ?");
        binds.push(Box::new(opts.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_fact)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Embeddings
    // ---------------------------------------------------------------

    pub fn upsert_embedding(&self, embedding: &Embedding) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        let bytes = encode_vector(&embedding.vector);
        with_retry(|| {
            conn.execute(
                "INSERT INTO embeddings (memory_id, vector, model, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(memory_id) DO UPDATE SET vector = excluded.vector,
                    model = excluded.model, created_at = excluded.created_at",
                params![
                    embedding.memory_id,
                    bytes,
                    embedding.model,
                    embedding.created_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_embedding(&self, memory_id: i64) -> StoreResult<Option<Embedding>> {
        let conn = self.reader();
        conn.query_row(
            "SELECT memory_id, vector, model, created_at FROM embeddings WHERE memory_id = ?1",
            params![memory_id],
            row_to_embedding,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_embeddings(&self) -> StoreResult<Vec<Embedding>> {
        let conn = self.reader();
        let mut stmt =
            conn.prepare("SELECT memory_id, vector, model, created_at FROM embeddings")?;
        let rows = stmt.query_map([], row_to_embedding)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Memory ids that have content but no embedding row yet (§4.3 step 2).
    pub fn memories_without_embeddings(&self, limit: u32) -> StoreResult<Vec<Memory>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.content, m.content_hash, m.source_file, m.source_line, m.source_section,
                    m.imported_at, m.project, m.class, m.metadata, m.deleted_at
             FROM memories m LEFT JOIN embeddings e ON e.memory_id = m.id
             WHERE m.deleted_at IS NULL AND e.memory_id IS NULL
             ORDER BY m.id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_memory)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn delete_all_embeddings(&self) -> StoreResult<u64> {
        self.check_writable()?;
        let conn = self.writer();
        let n = with_retry(|| conn.execute("DELETE FROM embeddings", []))?;
        Ok(n as u64)
    }

    // ---------------------------------------------------------------
    // Access events
    // ---------------------------------------------------------------

    pub fn record_fact_access(
        &self,
        fact_id: i64,
        actor: Option<&str>,
        access_type: AccessType,
        now: DateTime<Utc>,
    ) -> StoreResult<AccessEvent> {
        self.check_writable()?;
        let conn = self.writer();
        let id = insert_access_event(&conn, fact_id, actor, access_type, now)?;
        Ok(AccessEvent {
            id,
            fact_id,
            actor: actor.map(|s| s.to_string()),
            access_type,
            created_at: now,
        })
    }

    pub fn list_fact_accesses(&self, fact_id: i64) -> StoreResult<Vec<AccessEvent>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT id, fact_id, actor, access_type, created_at FROM access_events
             WHERE fact_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![fact_id], row_to_access_event)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Count of distinct actors that reinforced `fact_id` (reinforce-promote
    /// policy, §4.8) and the distinct source memory count for its subject.
    pub fn count_distinct_reinforcements(&self, fact_id: i64) -> StoreResult<i64> {
        let conn = self.reader();
        conn.query_row(
            "SELECT COUNT(*) FROM access_events WHERE fact_id = ?1 AND access_type = 'reinforce'",
            params![fact_id],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    /// Distinct memory ids contributing facts with the same subject+predicate
    /// as `fact_id` (used by the reinforce-promote "multi-sourced" check).
    pub fn count_distinct_sources_for_subject(&self, fact_id: i64) -> StoreResult<i64> {
        let conn = self.reader();
        conn.query_row(
            "SELECT COUNT(DISTINCT f2.memory_id) FROM facts f1
             JOIN facts f2 ON lower(f1.subject) = lower(f2.subject)
                AND lower(f1.predicate) = lower(f2.predicate)
             WHERE f1.id = ?1 AND f2.state != 'superseded'",
            params![fact_id],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    // ---------------------------------------------------------------
    // Projects
    // ---------------------------------------------------------------

    pub fn upsert_project(&self, project: &Project) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        let rules = serde_json::to_string(&project.auto_tag_rules)?;
        with_retry(|| {
            conn.execute(
                "INSERT INTO projects (name, auto_tag_rules, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET auto_tag_rules = excluded.auto_tag_rules",
                params![project.name, rules, project.created_at.to_rfc3339()],
            )
        })?;
        Ok(())
    }

    pub fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let conn = self.reader();
        let mut stmt =
            conn.prepare("SELECT name, auto_tag_rules, created_at FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            let rules_json: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            Ok(Project {
                name: row.get(0)?,
                auto_tag_rules: serde_json::from_str(&rules_json).unwrap_or_default(),
                created_at: parse_dt(&created_at),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Alerts
    // ---------------------------------------------------------------

    pub fn create_alert(&self, alert: &Alert) -> StoreResult<i64> {
        self.check_writable()?;
        let conn = self.writer();
        let detail = serde_json::to_string(&alert.detail)?;
        with_retry(|| {
            conn.execute(
                "INSERT INTO alerts (alert_type, severity, fact_id, related_fact_id, message, detail, acknowledged, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    alert.alert_type,
                    match alert.severity {
                        AlertSeverity::Info => "info",
                        AlertSeverity::Warning => "warning",
                        AlertSeverity::Critical => "critical",
                    },
                    alert.fact_id,
                    alert.related_fact_id,
                    alert.message,
                    detail,
                    alert.acknowledged as i64,
                    alert.created_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn acknowledge_alert(&self, id: i64) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        let n = with_retry(|| {
            conn.execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", params![id])
        })?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("alert {id}")));
        }
        Ok(())
    }

    pub fn list_alerts(&self, include_acknowledged: bool) -> StoreResult<Vec<Alert>> {
        let conn = self.reader();
        let sql = if include_acknowledged {
            "SELECT id, alert_type, severity, fact_id, related_fact_id, message, detail, acknowledged, created_at
             FROM alerts ORDER BY created_at DESC"
        } else {
            "SELECT id, alert_type, severity, fact_id, related_fact_id, message, detail, acknowledged, created_at
             FROM alerts WHERE acknowledged = 0 ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_alert)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Fact edges
    // ---------------------------------------------------------------

    pub fn add_edge(&self, edge: &FactEdge) -> StoreResult<i64> {
        self.check_writable()?;
        let conn = self.writer();
        with_retry(|| {
            conn.execute(
                "INSERT INTO fact_edges (from_fact, to_fact, edge_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    edge.from_fact,
                    edge.to_fact,
                    edge.edge_type.as_str(),
                    edge.created_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_edges_for_fact(&self, fact_id: i64) -> StoreResult<Vec<FactEdge>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT id, from_fact, to_fact, edge_type, created_at FROM fact_edges
             WHERE from_fact = ?1 OR to_fact = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![fact_id], |row| {
            let edge_type: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(FactEdge {
                id: row.get(0)?,
                from_fact: row.get(1)?,
                to_fact: row.get(2)?,
                edge_type: edge_type.parse().unwrap_or(crate::model::EdgeType::RelatesTo),
                created_at: parse_dt(&created_at),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Stats & observability queries (§4.6)
    // ---------------------------------------------------------------

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.reader();
        let memory_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM memories WHERE deleted_at IS NULL", [], |r| r.get(0))?;
        let fact_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM facts f JOIN memories m ON m.id = f.memory_id WHERE m.deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let embedding_count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?;
        let source_count = self.get_source_count_conn(&conn)?;
        let average_confidence: f64 = conn
            .query_row(
                "SELECT COALESCE(AVG(f.confidence), 0.0) FROM facts f JOIN memories m ON m.id = f.memory_id
                 WHERE m.deleted_at IS NULL AND f.state != 'superseded'",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0.0);
        let storage_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        Ok(StoreStats {
            memory_count,
            fact_count,
            embedding_count,
            source_count,
            storage_bytes,
            average_confidence,
        })
    }

    fn get_source_count_conn(&self, conn: &Connection) -> StoreResult<i64> {
        conn.query_row(
            "SELECT COUNT(DISTINCT source_file) FROM memories WHERE deleted_at IS NULL AND source_file IS NOT NULL",
            [],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    pub fn get_source_count(&self) -> StoreResult<i64> {
        let conn = self.reader();
        self.get_source_count_conn(&conn)
    }

    pub fn get_facts_by_type(&self) -> StoreResult<Vec<(FactType, i64)>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT f.fact_type, COUNT(*) FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL AND f.state != 'superseded' GROUP BY f.fact_type",
        )?;
        let rows = stmt.query_map([], |row| {
            let t: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((t, count))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (t, count) = r?;
            if let Ok(ft) = t.parse::<FactType>() {
                out.push((ft, count));
            }
        }
        Ok(out)
    }

    pub fn get_freshness_distribution(&self, now: DateTime<Utc>) -> StoreResult<FreshnessDistribution> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT imported_at FROM memories WHERE deleted_at IS NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            let s: String = row.get(0)?;
            Ok(s)
        })?;
        let today_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let week_start = today_start
            - Duration::days(today_start.weekday().num_days_from_monday() as i64);
        let month_start = now
            .date_naive()
            .with_day(1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        let mut dist = FreshnessDistribution::default();
        for r in rows {
            let ts = parse_dt(&r?);
            if ts >= today_start {
                dist.today += 1;
            } else if ts >= week_start {
                dist.this_week += 1;
            } else if ts >= month_start {
                dist.this_month += 1;
            } else {
                dist.older += 1;
            }
        }
        Ok(dist)
    }

    /// Confidence distribution across active (non-superseded) facts, bucketed
    /// into deciles [0.0,0.1) .. [0.9,1.0].
    pub fn get_confidence_distribution(&self) -> StoreResult<[i64; 10]> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT f.confidence FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL AND f.state != 'superseded'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
        let mut buckets = [0i64; 10];
        for r in rows {
            let c = r?.clamp(0.0, 1.0);
            let idx = ((c * 10.0) as usize).min(9);
            buckets[idx] += 1;
        }
        Ok(buckets)
    }

    pub fn growth_count_memories_since(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let conn = self.reader();
        conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE deleted_at IS NULL AND imported_at >= ?1",
            params![since.to_rfc3339()],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    pub fn growth_count_facts_since(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let conn = self.reader();
        conn.query_row(
            "SELECT COUNT(*) FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL AND f.created_at >= ?1",
            params![since.to_rfc3339()],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    /// Top source files imported since `since`, descending by memory count.
    pub fn top_sources_since(&self, since: DateTime<Utc>, cap: u32) -> StoreResult<Vec<(String, i64)>> {
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT source_file, COUNT(*) AS n FROM memories
             WHERE deleted_at IS NULL AND imported_at >= ?1 AND source_file IS NOT NULL
             GROUP BY source_file ORDER BY n DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), cap], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Facts whose state is not superseded, last reinforced before `cutoff`,
    /// ordered by effective confidence ascending and capped at `limit` — the
    /// raw rows for `observe::stale_facts` to post-process (§4.6).
    pub fn candidate_stale_facts(&self, cutoff: DateTime<Utc>, include_superseded: bool, limit: u32) -> StoreResult<Vec<Fact>> {
        let conn = self.reader();
        let sql = if include_superseded {
            "SELECT f.id, f.memory_id, f.subject, f.predicate, f.object, f.fact_type,
                    f.confidence, f.decay_rate, f.created_at, f.last_reinforced, f.state,
                    f.superseded_by, f.source_quote, f.agent
             FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL AND f.last_reinforced < ?1
             ORDER BY f.last_reinforced ASC LIMIT ?2"
        } else {
            "SELECT f.id, f.memory_id, f.subject, f.predicate, f.object, f.fact_type,
                    f.confidence, f.decay_rate, f.created_at, f.last_reinforced, f.state,
                    f.superseded_by, f.source_quote, f.agent
             FROM facts f JOIN memories m ON m.id = f.memory_id
             WHERE m.deleted_at IS NULL AND f.state != 'superseded' AND f.last_reinforced < ?1
             ORDER BY f.last_reinforced ASC LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339(), limit.max(1) as i64 * 4], row_to_fact)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Attribute-conflict pairs (§4.6): same subject+predicate, different
    /// object, case-insensitive, `f1.id < f2.id`, both non-superseded unless
    /// `include_superseded`.
    pub fn attribute_conflicts(
        &self,
        limit: u32,
        include_superseded: bool,
    ) -> StoreResult<Vec<AttributeConflictPair>> {
        let conn = self.reader();
        let sql = if include_superseded {
            "SELECT f1.id, f2.id FROM facts f1 JOIN facts f2
                ON lower(f1.subject) = lower(f2.subject)
               AND lower(f1.predicate) = lower(f2.predicate)
               AND lower(f1.object) != lower(f2.object)
               AND f1.id < f2.id
             JOIN memories m1 ON m1.id = f1.memory_id
             JOIN memories m2 ON m2.id = f2.memory_id
             WHERE m1.deleted_at IS NULL AND m2.deleted_at IS NULL
             ORDER BY f1.id ASC LIMIT ?1"
        } else {
            "SELECT f1.id, f2.id FROM facts f1 JOIN facts f2
                ON lower(f1.subject) = lower(f2.subject)
               AND lower(f1.predicate) = lower(f2.predicate)
               AND lower(f1.object) != lower(f2.object)
               AND f1.id < f2.id
             JOIN memories m1 ON m1.id = f1.memory_id
             JOIN memories m2 ON m2.id = f2.memory_id
             WHERE m1.deleted_at IS NULL AND m2.deleted_at IS NULL
               AND f1.state != 'superseded' AND f2.state != 'superseded'
             ORDER BY f1.id ASC LIMIT ?1"
        };
        let mut stmt = conn.prepare(sql)?;
        let pairs: Vec<(i64, i64)> = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        let mut out = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            let fact1 = get_fact_conn(&conn, a)?.ok_or_else(|| StoreError::NotFound(format!("fact {a}")))?;
            let fact2 = get_fact_conn(&conn, b)?.ok_or_else(|| StoreError::NotFound(format!("fact {b}")))?;
            out.push(AttributeConflictPair { fact1, fact2 });
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Maintenance (§4.1)
    // ---------------------------------------------------------------

    pub fn vacuum(&self) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    pub fn analyze(&self) -> StoreResult<()> {
        self.check_writable()?;
        let conn = self.writer();
        conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    pub fn integrity_check(&self) -> StoreResult<Vec<String>> {
        self.check_writable()?;
        let conn = self.writer();
        let mut stmt = conn.prepare("PRAGMA integrity_check;")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

// =====================================================================
// Free helper functions shared across connection types
// =====================================================================

fn configure_connection(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

fn schema_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version;", [], |r| r.get(0))?;
    Ok(version)
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let current = schema_version(conn)?;
    let latest = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
    if current > latest {
        return Err(StoreError::Fatal(format!(
            "on-disk schema version {current} is newer than this build supports ({latest})"
        )));
    }
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        tracing::info!(version = migration.version, description = migration.description, "applied migration");
    }
    Ok(())
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let imported_at: String = row.get(6)?;
    let class: Option<String> = row.get(8)?;
    let metadata_json: String = row.get(9)?;
    let deleted_at: Option<String> = row.get(10)?;
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        content_hash: row.get(2)?,
        source_file: row.get(3)?,
        source_line: row.get(4)?,
        source_section: row.get(5)?,
        imported_at: parse_dt(&imported_at),
        project: row.get(7)?,
        class: class.and_then(|c| c.parse().ok()),
        metadata: serde_json::from_str::<MemoryMetadata>(&metadata_json).unwrap_or_default(),
        deleted_at: deleted_at.map(|s| parse_dt(&s)),
    })
}

fn get_memory_conn(conn: &Connection, id: i64) -> StoreResult<Option<Memory>> {
    conn.query_row(
        "SELECT id, content, content_hash, source_file, source_line, source_section,
                imported_at, project, class, metadata, deleted_at
         FROM memories WHERE id = ?1 AND deleted_at IS NULL",
        params![id],
        row_to_memory,
    )
    .optional()
    .map_err(StoreError::from)
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let fact_type: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let last_reinforced: String = row.get(9)?;
    let state: String = row.get(10)?;
    Ok(Fact {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        subject: row.get(2)?,
        predicate: row.get(3)?,
        object: row.get(4)?,
        fact_type: fact_type.parse().unwrap_or(FactType::Kv),
        confidence: row.get(6)?,
        decay_rate: row.get(7)?,
        created_at: parse_dt(&created_at),
        last_reinforced: parse_dt(&last_reinforced),
        state: state.parse().unwrap_or(FactState::Active),
        superseded_by: row.get(11)?,
        source_quote: row.get(12)?,
        agent: row.get(13)?,
    })
}

fn get_fact_conn(conn: &Connection, id: i64) -> StoreResult<Option<Fact>> {
    conn.query_row(
        "SELECT id, memory_id, subject, predicate, object, fact_type, confidence, decay_rate,
                created_at, last_reinforced, state, superseded_by, source_quote, agent
         FROM facts WHERE id = ?1",
        params![id],
        row_to_fact,
    )
    .optional()
    .map_err(StoreError::from)
}

fn get_fact_tx(tx: &Transaction<'_>, id: i64) -> StoreResult<Option<Fact>> {
    tx.query_row(
        "SELECT id, memory_id, subject, predicate, object, fact_type, confidence, decay_rate,
                created_at, last_reinforced, state, superseded_by, source_quote, agent
         FROM facts WHERE id = ?1",
        params![id],
        row_to_fact,
    )
    .optional()
    .map_err(StoreError::from)
}

fn row_to_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<Embedding> {
    let bytes: Vec<u8> = row.get(1)?;
    let created_at: String = row.get(3)?;
    Ok(Embedding {
        memory_id: row.get(0)?,
        vector: decode_vector(&bytes),
        model: row.get(2)?,
        created_at: parse_dt(&created_at),
    })
}

fn row_to_access_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessEvent> {
    let access_type: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(AccessEvent {
        id: row.get(0)?,
        fact_id: row.get(1)?,
        actor: row.get(2)?,
        access_type: access_type.parse().unwrap_or(AccessType::Reference),
        created_at: parse_dt(&created_at),
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let severity: String = row.get(2)?;
    let detail_json: String = row.get(6)?;
    let acknowledged: i64 = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(Alert {
        id: row.get(0)?,
        alert_type: row.get(1)?,
        severity: severity.parse().unwrap_or(AlertSeverity::Info),
        fact_id: row.get(3)?,
        related_fact_id: row.get(4)?,
        message: row.get(5)?,
        detail: serde_json::from_str(&detail_json).unwrap_or(serde_json::Value::Null),
        acknowledged: acknowledged != 0,
        created_at: parse_dt(&created_at),
    })
}

fn insert_access_event_tx(
    tx: &Transaction<'_>,
    fact_id: i64,
    actor: Option<&str>,
    access_type: AccessType,
    now: DateTime<Utc>,
) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO access_events (fact_id, actor, access_type, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![fact_id, actor, access_type.as_str(), now.to_rfc3339()],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_access_event(
    conn: &Connection,
    fact_id: i64,
    actor: Option<&str>,
    access_type: AccessType,
    now: DateTime<Utc>,
) -> StoreResult<i64> {
    with_retry(|| {
        conn.execute(
            "INSERT INTO access_events (fact_id, actor, access_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![fact_id, actor, access_type.as_str(), now.to_rfc3339()],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

use chrono::Datelike;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryMetadata;

    fn mk_memory(hash: &str) -> Memory {
        Memory {
            id: 0,
            content: format!("content {hash}"),
            content_hash: hash.to_string(),
            source_file: Some("notes.md".to_string()),
            source_line: Some(1),
            source_section: None,
            imported_at: Utc::now(),
            project: None,
            class: None,
            metadata: MemoryMetadata::default(),
            deleted_at: None,
        }
    }

    #[test]
    fn dedupe_rejects_duplicate_hash() {
        let store = Store::open_in_memory().unwrap();
        let m = store.create_memory(mk_memory("abc")).unwrap();
        assert!(m.id > 0);
        let err = store.create_memory(mk_memory("abc")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn soft_delete_hides_from_get_and_list() {
        let store = Store::open_in_memory().unwrap();
        let m = store.create_memory(mk_memory("hash1")).unwrap();
        store.soft_delete_memory(m.id).unwrap();
        assert!(store.get_memory(m.id).unwrap().is_none());
        assert!(store.list_memories(&ListOpts::new()).unwrap().is_empty());
    }

    #[test]
    fn supersede_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let m = store.create_memory(mk_memory("h")).unwrap();
        let f1 = store
            .create_fact(Fact {
                id: 0,
                memory_id: m.id,
                subject: "color".into(),
                predicate: "is".into(),
                object: "blue".into(),
                fact_type: FactType::Kv,
                confidence: 0.5,
                decay_rate: 0.01,
                created_at: Utc::now(),
                last_reinforced: Utc::now(),
                state: FactState::Active,
                superseded_by: None,
                source_quote: None,
                agent: None,
            })
            .unwrap();
        let f2 = store
            .create_fact(Fact {
                id: 0,
                memory_id: m.id,
                subject: "color".into(),
                predicate: "is".into(),
                object: "green".into(),
                fact_type: FactType::Kv,
                confidence: 0.8,
                decay_rate: 0.01,
                created_at: Utc::now(),
                last_reinforced: Utc::now(),
                state: FactState::Active,
                superseded_by: None,
                source_quote: None,
                agent: None,
            })
            .unwrap();

        let applied1 = store.supersede_fact(f1.id, f2.id, "test", Utc::now()).unwrap();
        assert!(applied1);
        let applied2 = store.supersede_fact(f1.id, f2.id, "test", Utc::now()).unwrap();
        assert!(!applied2);

        let loser = store.get_fact(f1.id).unwrap().unwrap();
        assert_eq!(loser.state, FactState::Superseded);
        assert_eq!(loser.superseded_by, Some(f2.id));
        assert_eq!(loser.confidence, 0.0);

        let accesses = store.list_fact_accesses(f1.id).unwrap();
        assert_eq!(accesses.iter().filter(|a| a.access_type == AccessType::Supersede).count(), 1);
    }

    #[test]
    fn supersede_rejects_cycle() {
        let store = Store::open_in_memory().unwrap();
        let m = store.create_memory(mk_memory("h2")).unwrap();
        let mk = |obj: &str| Fact {
            id: 0,
            memory_id: m.id,
            subject: "s".into(),
            predicate: "p".into(),
            object: obj.into(),
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
        let a = store.create_fact(mk("a")).unwrap();
        let b = store.create_fact(mk("b")).unwrap();
        store.supersede_fact(a.id, b.id, "t", Utc::now()).unwrap();
        let err = store.supersede_fact(b.id, a.id, "t", Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.db");
        {
            let store = Store::open(&path, false).unwrap();
            store.create_memory(mk_memory("seed")).unwrap();
        }
        let store = Store::open(&path, true).unwrap();
        assert!(store.is_read_only());
        let err = store.create_memory(mk_memory("new")).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }

    #[test]
    fn attribute_conflict_detection() {
        let store = Store::open_in_memory().unwrap();
        let m = store.create_memory(mk_memory("h3")).unwrap();
        let mk = |obj: &str| Fact {
            id: 0,
            memory_id: m.id,
            subject: "Favorite Color".into(),
            predicate: "Is".into(),
            object: obj.into(),
            fact_type: FactType::Preference,
            confidence: 0.9,
            decay_rate: 0.01,
            created_at: Utc::now(),
            last_reinforced: Utc::now(),
            state: FactState::Active,
            superseded_by: None,
            source_quote: None,
            agent: None,
        };
        store.create_fact(mk("blue")).unwrap();
        store.create_fact(mk("BLUE")).unwrap(); // same object, case differs -> no conflict
        store.create_fact(mk("red")).unwrap();

        let conflicts = store.attribute_conflicts(10, false).unwrap();
        assert_eq!(conflicts.len(), 1);
    }
}
