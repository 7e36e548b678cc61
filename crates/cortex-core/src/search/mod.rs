//! Hybrid search engine (§4.5): keyword (BM25), semantic (HNSW/brute force),
//! and hybrid (weighted blend), with class-aware boosting, confidence/decay
//! post-weighting, and optional explanation.

mod bm25;

pub use bm25::{tokenize, Bm25Index, Bm25Params, DEFAULT_BM25_PARAMS};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::collab::EmbeddingProvider;
use crate::error::{CoreError, Result};
use crate::hnsw::Index as HnswIndex;
use crate::model::{Fact, FactState, Memory, MemoryClass};
use crate::store::Store;

/// Search mode (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

/// Per-class score multiplier applied after fusion, unless disabled (§4.5).
/// Pinned per §9 Open Questions; exposed as a `const` so tests can assert
/// exact values.
pub const CLASS_BOOST: &[(MemoryClass, f64)] = &[
    (MemoryClass::Rule, 1.3),
    (MemoryClass::Decision, 1.3),
    (MemoryClass::Identity, 1.25),
    (MemoryClass::Preference, 1.1),
    (MemoryClass::Status, 1.0),
    (MemoryClass::Scratch, 0.7),
];

pub fn class_boost(class: Option<MemoryClass>) -> f64 {
    match class {
        None => 1.0,
        Some(c) => CLASS_BOOST
            .iter()
            .find(|(k, _)| *k == c)
            .map(|(_, v)| *v)
            .unwrap_or(1.0),
    }
}

fn default_min_score(mode: SearchMode) -> f64 {
    match mode {
        SearchMode::Keyword => 0.05,
        SearchMode::Semantic => 0.25,
        SearchMode::Hybrid => 0.05,
    }
}

/// Options recognized by `SearchEngine::search` (§4.5). Unknown keys are
/// rejected by construction: this is a plain struct, not a stringly-typed bag.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub limit: usize,
    pub min_score: Option<f64>,
    pub project: Option<String>,
    pub classes: Vec<MemoryClass>,
    pub disable_class_boost: bool,
    pub agent: Option<String>,
    pub channel: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub include_superseded: bool,
    pub explain: bool,
    pub bm25_weight: f64,
    pub semantic_weight: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            limit: 10,
            min_score: None,
            project: None,
            classes: Vec::new(),
            disable_class_boost: false,
            agent: None,
            channel: None,
            after: None,
            before: None,
            include_superseded: false,
            explain: false,
            bm25_weight: 0.5,
            semantic_weight: 0.5,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.limit) {
            return Err(CoreError::InvalidInput(format!(
                "limit {} out of [1,1000]",
                self.limit
            )));
        }
        Ok(())
    }

    fn effective_min_score(&self) -> f64 {
        self.min_score.unwrap_or_else(|| default_min_score(self.mode))
    }
}

/// Provenance + confidence + rank-component breakdown attached when
/// `explain` is requested (§4.5).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Explain {
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub age_days: f64,
    pub raw_confidence: f64,
    pub effective_confidence: f64,
    pub base: f64,
    pub class_multiplier: f64,
    pub pre_confidence: f64,
    pub bm25_raw: Option<f64>,
    pub bm25_normalized: Option<f64>,
    pub semantic: Option<f64>,
    pub hybrid_bm25_contribution: Option<f64>,
    pub hybrid_semantic_contribution: Option<f64>,
    pub why: String,
}

/// One ranked search hit (§4.5).
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub memory: Memory,
    pub primary_fact: Option<Fact>,
    pub final_score: f64,
    pub explain: Option<Explain>,
}

/// Combines the store, the in-memory HNSW index, and an optional embedding
/// collaborator into the three search modes (§4.5).
pub struct SearchEngine {
    store: Arc<Store>,
    hnsw: Arc<RwLock<Option<HnswIndex>>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<Store>,
        hnsw: Arc<RwLock<Option<HnswIndex>>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { store, hnsw, embedder }
    }

    pub fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        opts.validate()?;
        let now = Utc::now();

        let memories = self.store.list_memories(&crate::store::ListOpts::new().with_limit(100_000))?;
        let memories: Vec<Memory> = memories.into_iter().filter(|m| !m.is_deleted()).collect();
        let memory_by_id: HashMap<i64, Memory> = memories.iter().map(|m| (m.id, m.clone())).collect();

        let bm25_raw: HashMap<i64, f64> = if matches!(opts.mode, SearchMode::Keyword | SearchMode::Hybrid) {
            let corpus: Vec<(i64, &str)> = memories.iter().map(|m| (m.id, m.content.as_str())).collect();
            let index = Bm25Index::build(&corpus, DEFAULT_BM25_PARAMS);
            index.search(query, memories.len()).into_iter().collect()
        } else {
            HashMap::new()
        };
        let bm25_max = bm25_raw.values().cloned().fold(0.0_f64, f64::max).max(1e-9);

        let semantic_raw: HashMap<i64, f64> = if matches!(opts.mode, SearchMode::Semantic | SearchMode::Hybrid) {
            self.semantic_scores(query, opts.limit)?
        } else {
            HashMap::new()
        };

        let candidate_ids: Vec<i64> = match opts.mode {
            SearchMode::Keyword => bm25_raw.keys().copied().collect(),
            SearchMode::Semantic => semantic_raw.keys().copied().collect(),
            SearchMode::Hybrid => {
                let mut ids: std::collections::HashSet<i64> = bm25_raw.keys().copied().collect();
                ids.extend(semantic_raw.keys().copied());
                ids.into_iter().collect()
            }
        };

        let facts = self
            .store
            .list_facts(&crate::store::ListOpts::new().with_include_superseded(true).with_limit(1_000_000))?;
        let mut facts_by_memory: HashMap<i64, Vec<Fact>> = HashMap::new();
        for f in facts {
            facts_by_memory.entry(f.memory_id).or_default().push(f);
        }

        let mut results = Vec::new();
        for id in candidate_ids {
            let Some(memory) = memory_by_id.get(&id) else { continue };
            if !self.passes_filters(memory, opts) {
                continue;
            }

            let bm25_score_raw = bm25_raw.get(&id).copied();
            let bm25_norm = bm25_score_raw.map(|s| s / bm25_max);
            let semantic_score = semantic_raw.get(&id).copied();

            let (base, bm25_contrib, semantic_contrib) = match opts.mode {
                SearchMode::Keyword => (bm25_norm.unwrap_or(0.0), bm25_norm, None),
                SearchMode::Semantic => (semantic_score.unwrap_or(0.0), None, semantic_score),
                SearchMode::Hybrid => {
                    let bm25_part = opts.bm25_weight * bm25_norm.unwrap_or(0.0);
                    let sem_part = opts.semantic_weight * semantic_score.unwrap_or(0.0);
                    (bm25_part + sem_part, Some(bm25_part), Some(sem_part))
                }
            };

            let class_mult = if opts.disable_class_boost { 1.0 } else { class_boost(memory.class) };
            let pre_confidence = base * class_mult;

            let facts_for_memory = facts_by_memory.get(&id).cloned().unwrap_or_default();
            let visible_facts: Vec<&Fact> = facts_for_memory
                .iter()
                .filter(|f| opts.include_superseded || f.state != FactState::Superseded)
                .collect();

            if !facts_for_memory.is_empty() && visible_facts.is_empty() {
                // every fact for this memory is superseded and hidden
                continue;
            }

            let primary_fact = visible_facts
                .iter()
                .max_by(|a, b| {
                    a.effective_confidence_at(now)
                        .partial_cmp(&b.effective_confidence_at(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|f| (*f).clone());

            let effective_confidence = primary_fact
                .as_ref()
                .map(|f| f.effective_confidence_at(now))
                .unwrap_or(1.0);
            let final_score = (pre_confidence * effective_confidence).max(0.0);

            if final_score < opts.effective_min_score() {
                continue;
            }

            let explain = if opts.explain {
                let age_days = (now - memory.imported_at).num_milliseconds() as f64 / 86_400_000.0;
                Some(Explain {
                    source: memory.source_file.clone(),
                    timestamp: memory.imported_at,
                    age_days,
                    raw_confidence: primary_fact.as_ref().map(|f| f.confidence).unwrap_or(1.0),
                    effective_confidence,
                    base,
                    class_multiplier: class_mult,
                    pre_confidence,
                    bm25_raw: bm25_score_raw,
                    bm25_normalized: bm25_norm,
                    semantic: semantic_score,
                    hybrid_bm25_contribution: bm25_contrib,
                    hybrid_semantic_contribution: semantic_contrib,
                    why: explain_reason(opts.mode, bm25_norm, semantic_score, class_mult, effective_confidence),
                })
            } else {
                None
            };

            results.push(SearchResult {
                memory: memory.clone(),
                primary_fact,
                final_score,
                explain,
            });
        }

        // Tie-break: higher final, then higher created_at (imported_at), then smaller memory id.
        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.imported_at.cmp(&a.memory.imported_at))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        results.truncate(opts.limit);
        Ok(results)
    }

    fn passes_filters(&self, memory: &Memory, opts: &SearchOptions) -> bool {
        if let Some(project) = &opts.project {
            if memory.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if !opts.classes.is_empty() {
            match memory.class {
                Some(c) if opts.classes.contains(&c) => {}
                _ => return false,
            }
        }
        if let Some(agent) = &opts.agent {
            if memory.metadata.agent.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        if let Some(channel) = &opts.channel {
            if memory.metadata.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(after) = opts.after {
            if memory.imported_at <= after {
                return false;
            }
        }
        if let Some(before) = opts.before {
            if memory.imported_at >= before {
                return false;
            }
        }
        true
    }

    /// Semantic scores keyed by memory id, via HNSW when fresh or brute
    /// force over stored embeddings otherwise (§4.5).
    fn semantic_scores(&self, query: &str, limit: usize) -> Result<HashMap<i64, f64>> {
        let Some(embedder) = &self.embedder else {
            return Ok(HashMap::new());
        };
        let query_vec = embedder.embed(std::slice::from_ref(&query.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::InvalidInput("embedding provider returned no vector".to_string()))?;

        let ef_search = (limit * 4).max(50);

        let use_hnsw = {
            let guard = self.hnsw.read().expect("hnsw lock poisoned");
            matches!(&*guard, Some(idx) if idx.dims() == embedder.dimensions() && !idx.is_empty())
        };

        if use_hnsw {
            let guard = self.hnsw.read().expect("hnsw lock poisoned");
            if let Some(idx) = &*guard {
                let hits = idx.search(&query_vec, ef_search)?;
                return Ok(hits
                    .into_iter()
                    .map(|(id, sim)| (id, (sim as f64).clamp(0.0, 1.0)))
                    .collect());
            }
        }

        // Stale or absent HNSW: brute-force cosine over all stored embeddings.
        let embeddings = self.store.list_embeddings()?;
        let mut scored: Vec<(i64, f64)> = embeddings
            .into_iter()
            .map(|e| {
                let sim = cosine(&query_vec, &e.vector);
                (e.memory_id, (sim as f64).clamp(0.0, 1.0))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(ef_search);
        Ok(scored.into_iter().collect())
    }
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

fn explain_reason(mode: SearchMode, bm25: Option<f64>, semantic: Option<f64>, class_mult: f64, eff_conf: f64) -> String {
    let base = match mode {
        SearchMode::Keyword => format!("keyword match (bm25={:.3})", bm25.unwrap_or(0.0)),
        SearchMode::Semantic => format!("semantic match (cosine={:.3})", semantic.unwrap_or(0.0)),
        SearchMode::Hybrid => format!(
            "hybrid match (bm25={:.3}, semantic={:.3})",
            bm25.unwrap_or(0.0),
            semantic.unwrap_or(0.0)
        ),
    };
    format!("{base}, class_boost={class_mult:.2}, effective_confidence={eff_conf:.3}")
}
