//! Import pipeline (§4.2): normalize, hash, dedupe, low-signal filter,
//! auto-tag, and persist as `Memory` rows.

mod format;

pub use format::{detect_format, ImportFormat};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use tracing::{debug, info, warn};

use crate::collab::EmbeddingProvider;
use crate::error::{CoreError, Result};
use crate::model::{Memory, MemoryClass, MemoryMetadata};
use crate::store::Store;

/// Default cap on a single imported file's size before it is skipped with
/// an error entry (§4.2).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Per-file progress callback: `(files_seen, files_total_hint)`.
pub type ProgressFn = Arc<dyn Fn(usize, Option<usize>) + Send + Sync>;

/// Options accepted by `Importer::import_file` / `import_path` / `import_text`
/// (§4.2). A plain struct rather than a stringly-typed bag: an unknown key
/// has no field to land in, so rejection is a compile error, not a runtime one.
#[derive(Clone)]
pub struct ImportOptions {
    /// Walk directory subtrees when the input path is a directory.
    pub recursive: bool,
    pub dry_run: bool,
    /// Files larger than this are skipped with an `ImportResult.errors` entry.
    pub max_file_size: u64,
    pub project: Option<String>,
    pub class: Option<MemoryClass>,
    pub agent: Option<String>,
    pub channel: Option<String>,
    /// Extra metadata merged into each created memory's `MemoryMetadata::extra`.
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    /// Infer `project`/`class` from path and content-keyword rules when unset.
    pub auto_tag: bool,
    /// Gate near-duplicate embedding-similarity suppression (step 6).
    pub capture_dedupe_enabled: bool,
    pub capture_similarity_threshold: f32,
    pub capture_dedupe_window_sec: i64,
    /// Gate the low-signal length/pattern filter (step 5).
    pub capture_low_signal_enabled: bool,
    pub capture_min_chars: usize,
    /// Extra substring (case-insensitive) patterns rejected alongside the
    /// built-in boilerplate acknowledgement list.
    pub capture_low_signal_patterns: Vec<String>,
    pub progress_fn: Option<ProgressFn>,
}

impl std::fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOptions")
            .field("recursive", &self.recursive)
            .field("dry_run", &self.dry_run)
            .field("max_file_size", &self.max_file_size)
            .field("project", &self.project)
            .field("class", &self.class)
            .field("agent", &self.agent)
            .field("channel", &self.channel)
            .field("metadata", &self.metadata)
            .field("auto_tag", &self.auto_tag)
            .field("capture_dedupe_enabled", &self.capture_dedupe_enabled)
            .field("capture_similarity_threshold", &self.capture_similarity_threshold)
            .field("capture_dedupe_window_sec", &self.capture_dedupe_window_sec)
            .field("capture_low_signal_enabled", &self.capture_low_signal_enabled)
            .field("capture_min_chars", &self.capture_min_chars)
            .field("capture_low_signal_patterns", &self.capture_low_signal_patterns)
            .field("progress_fn", &self.progress_fn.is_some())
            .finish()
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            dry_run: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            project: None,
            class: None,
            agent: None,
            channel: None,
            metadata: Default::default(),
            auto_tag: true,
            capture_dedupe_enabled: true,
            capture_similarity_threshold: 0.95,
            capture_dedupe_window_sec: 300,
            capture_low_signal_enabled: true,
            capture_min_chars: 20,
            capture_low_signal_patterns: Vec::new(),
            progress_fn: None,
        }
    }
}

/// A single chunk considered (and possibly rejected) during import.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Created(Memory),
    SkippedExactDuplicate { content_hash: String },
    SkippedNearDuplicate { similar_to: i64, similarity: f32 },
    SkippedLowSignal { reason: String },
}

/// Aggregate result of one import run (§4.2).
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub created: usize,
    pub skipped_exact: usize,
    pub skipped_near_duplicate: usize,
    pub skipped_low_signal: usize,
    pub errors: Vec<(PathBuf, String)>,
    pub outcomes: Vec<ImportOutcome>,
}

impl ImportResult {
    fn record(&mut self, outcome: ImportOutcome) {
        match &outcome {
            ImportOutcome::Created(_) => self.created += 1,
            ImportOutcome::SkippedExactDuplicate { .. } => self.skipped_exact += 1,
            ImportOutcome::SkippedNearDuplicate { .. } => self.skipped_near_duplicate += 1,
            ImportOutcome::SkippedLowSignal { .. } => self.skipped_low_signal += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Fold a per-file result into this aggregate (§4.2 `import_file`).
    fn merge(&mut self, other: ImportResult) {
        self.created += other.created;
        self.skipped_exact += other.skipped_exact;
        self.skipped_near_duplicate += other.skipped_near_duplicate;
        self.skipped_low_signal += other.skipped_low_signal;
        self.errors.extend(other.errors);
        self.outcomes.extend(other.outcomes);
    }
}

/// Path-prefix / keyword auto-tag rules applied when `opts.class` is absent
/// (§4.2). Checked in order; first match wins.
const PATH_CLASS_RULES: &[(&str, MemoryClass)] = &[
    ("decisions/", MemoryClass::Decision),
    ("rules/", MemoryClass::Rule),
    ("identity/", MemoryClass::Identity),
    ("scratch/", MemoryClass::Scratch),
];

const KEYWORD_CLASS_RULES: &[(&str, MemoryClass)] = &[
    ("always ", MemoryClass::Rule),
    ("never ", MemoryClass::Rule),
    ("we decided", MemoryClass::Decision),
    ("i prefer", MemoryClass::Preference),
    ("currently", MemoryClass::Status),
];

fn auto_tag_class(source_file: Option<&str>, content: &str) -> Option<MemoryClass> {
    if let Some(path) = source_file {
        let lower = path.to_lowercase();
        for (prefix, class) in PATH_CLASS_RULES {
            if lower.contains(prefix) {
                return Some(*class);
            }
        }
    }
    let lower = content.to_lowercase();
    for (kw, class) in KEYWORD_CLASS_RULES {
        if lower.contains(kw) {
            return Some(*class);
        }
    }
    None
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

/// Drives the import pipeline against a `Store`, optionally consulting an
/// `EmbeddingProvider` for near-duplicate detection (§4.2).
pub struct Importer {
    store: Arc<Store>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Importer {
    pub fn new(store: Arc<Store>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { store, embedder }
    }

/// Entry point for §4.2 step 1: walks `path` (a single file, or a directory
    /// subtree when `opts.recursive`), picking an importer per file by
    /// extension and folding each file's `ImportResult` into one aggregate.
    pub fn import_file(&self, path: &Path, opts: &ImportOptions) -> Result<ImportResult> {
        let files = self.collect_files(path, opts)?;
        let total = files.len();
        let mut result = ImportResult::default();
        for (seen, file) in files.into_iter().enumerate() {
            let file_result = self.import_path(&file, opts);
            match file_result {
                Ok(r) => result.merge(r),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to import file");
                    result.errors.push((file, e.to_string()));
                }
            }
            if let Some(progress) = &opts.progress_fn {
                progress(seen + 1, Some(total));
            }
        }
        Ok(result)
    }

    /// Resolve `path` to the concrete file list this run will process.
    fn collect_files(&self, path: &Path, opts: &ImportOptions) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Ok(vec![path.to_path_buf()]);
        }
        let mut files = Vec::new();
        self.walk_dir(path, opts.recursive, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn walk_dir(&self, dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(CoreError::Io)?;
        for entry in entries {
            let entry = entry.map_err(CoreError::Io)?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    self.walk_dir(&path, recursive, out)?;
                }
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Import every chunk of a single file, dispatching on its extension.
    pub fn import_path(&self, path: &Path, opts: &ImportOptions) -> Result<ImportResult> {
        let mut result = ImportResult::default();

        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > opts.max_file_size => {
                result.errors.push((
                    path.to_path_buf(),
                    format!("file size {} exceeds max_file_size {}", meta.len(), opts.max_file_size),
                ));
                return Ok(result);
            }
            Ok(_) => {}
            Err(e) => {
                result.errors.push((path.to_path_buf(), e.to_string()));
                return Ok(result);
            }
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                result.errors.push((path.to_path_buf(), e.to_string()));
                return Ok(result);
            }
        };
        let fmt = detect_format(path);
        let chunks = format::split_chunks(&raw, fmt);
        for (line, section, content) in chunks {
            let outcome = self.import_chunk(
                &content,
                Some(&path.display().to_string()),
                Some(line),
                section.as_deref(),
                opts,
            );
            match outcome {
                Ok(o) => result.record(o),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to import chunk");
                    result.errors.push((path.to_path_buf(), e.to_string()));
                }
            }
        }
        info!(
            path = %path.display(),
            created = result.created,
            skipped_exact = result.skipped_exact,
            skipped_near_duplicate = result.skipped_near_duplicate,
            skipped_low_signal = result.skipped_low_signal,
            "import path complete"
        );
        Ok(result)
    }

    /// Import a single block of already-extracted text (e.g. from a plugin
    /// capture pipe) without touching the filesystem.
    pub fn import_text(
        &self,
        content: &str,
        source_file: Option<&str>,
        opts: &ImportOptions,
    ) -> Result<ImportResult> {
        let mut result = ImportResult::default();
        match self.import_chunk(content, source_file, None, None, opts) {
            Ok(o) => result.record(o),
            Err(e) => result.errors.push((PathBuf::from(source_file.unwrap_or("<text>")), e.to_string())),
        }
        Ok(result)
    }

    fn import_chunk(
        &self,
        content: &str,
        source_file: Option<&str>,
        source_line: Option<u32>,
        source_section: Option<&str>,
        opts: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let normalized = content.trim();
        if opts.capture_low_signal_enabled {
            if normalized.chars().count() < opts.capture_min_chars {
                return Ok(ImportOutcome::SkippedLowSignal {
                    reason: format!("content shorter than {} chars", opts.capture_min_chars),
                });
            }
            if is_boilerplate(normalized) {
                return Ok(ImportOutcome::SkippedLowSignal {
                    reason: "boilerplate acknowledgement".to_string(),
                });
            }
            let lower = normalized.to_lowercase();
            if let Some(pattern) = opts
                .capture_low_signal_patterns
                .iter()
                .find(|p| lower.contains(&p.to_lowercase()))
            {
                return Ok(ImportOutcome::SkippedLowSignal {
                    reason: format!("matches low-signal pattern {pattern:?}"),
                });
            }
        }

        let hash = hash_content(normalized);
        if self.store.find_memory_by_hash(&hash)?.is_some() {
            debug!(content_hash = %hash, "skipping exact duplicate");
            return Ok(ImportOutcome::SkippedExactDuplicate { content_hash: hash });
        }

        let now = Utc::now();
        if opts.capture_dedupe_enabled {
            if let Some(embedder) = &self.embedder {
                if let Some((similar_to, similarity)) =
                    self.near_duplicate(normalized, embedder.as_ref(), now, opts)?
                {
                    debug!(similar_to, similarity, "skipping near duplicate");
                    return Ok(ImportOutcome::SkippedNearDuplicate { similar_to, similarity });
                }
            }
        }

        let auto_class = if opts.auto_tag { auto_tag_class(source_file, normalized) } else { None };
        let class = opts.class.or(auto_class);
        let project = opts.project.clone();

        let memory = Memory {
            id: 0,
            content: normalized.to_string(),
            content_hash: hash,
            source_file: source_file.map(str::to_string),
            source_line,
            source_section: source_section.map(str::to_string),
            imported_at: now,
            project,
            class,
            metadata: MemoryMetadata {
                agent: opts.agent.clone(),
                channel: opts.channel.clone(),
                model: None,
                tokens_in: None,
                tokens_out: None,
                extra: opts.metadata.clone(),
            },
            deleted_at: None,
        };

        if opts.dry_run {
            return Ok(ImportOutcome::Created(memory));
        }

        let created = self.store.create_memory(memory)?;
        Ok(ImportOutcome::Created(created))
    }

    fn near_duplicate(
        &self,
        content: &str,
        embedder: &dyn EmbeddingProvider,
        now: chrono::DateTime<Utc>,
        opts: &ImportOptions,
    ) -> Result<Option<(i64, f32)>> {
        let window_start = now - chrono::Duration::seconds(opts.capture_dedupe_window_sec);
        let recent = self
            .store
            .list_memories(&crate::store::ListOpts::new().with_after(window_start).with_limit(500))?;
        if recent.is_empty() {
            return Ok(None);
        }
        let vector = embedder.embed(std::slice::from_ref(&content.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::InvalidInput("embedding provider returned no vector".to_string()))?;
        for memory in recent {
            if let Some(existing) = self.store.get_embedding(memory.id)? {
                let sim = cosine(&vector, &existing.vector);
                if sim >= opts.capture_similarity_threshold {
                    return Ok(Some((memory.id, sim)));
                }
            }
        }
        Ok(None)
    }
}

fn is_boilerplate(content: &str) -> bool {
    const PHRASES: &[&str] = &["ok", "okay", "sounds good", "got it", "thanks", "thank you", "sure"];
    let lower = content.to_lowercase();
    PHRASES.iter().any(|p| lower == *p)
}
