//! BM25 keyword scoring (§4.5): k1=1.2, b=0.75, Unicode-aware tokenization.

use std::collections::HashMap;

use unicode_segmentation::UnicodeSegmentation;

/// BM25 tuning constants, exposed as `pub const` per §9 Open Questions so
/// callers can see (and in principle override) the pinned defaults.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

pub const DEFAULT_BM25_PARAMS: Bm25Params = Bm25Params { k1: 1.2, b: 0.75 };

/// Lowercase, Unicode-aware word tokenization with punctuation split.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

struct DocStats {
    term_freq: HashMap<String, u32>,
    len: u32,
}

/// A brute-force BM25 index over a corpus of `(id, content)` pairs. Rebuilt
/// per query against the current non-deleted memory set — this crate targets
/// a local single-node corpus, not web-scale retrieval.
pub struct Bm25Index {
    params: Bm25Params,
    docs: HashMap<i64, DocStats>,
    doc_freq: HashMap<String, u32>,
    avg_doc_len: f64,
}

impl Bm25Index {
    pub fn build(corpus: &[(i64, &str)], params: Bm25Params) -> Self {
        let mut docs = HashMap::with_capacity(corpus.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_len = 0u64;

        for (id, content) in corpus {
            let tokens = tokenize(content);
            let len = tokens.len() as u32;
            total_len += len as u64;
            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for t in &tokens {
                *term_freq.entry(t.clone()).or_insert(0) += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            docs.insert(*id, DocStats { term_freq, len });
        }

        let avg_doc_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        Self { params, docs, doc_freq, avg_doc_len }
    }

    /// Raw (non-negative, unnormalized) BM25 score for `query` against
    /// document `id`. Zero if the document isn't indexed.
    pub fn score(&self, id: i64, query_terms: &[String]) -> f64 {
        let Some(doc) = self.docs.get(&id) else {
            return 0.0;
        };
        let n = self.docs.len() as f64;
        let mut score = 0.0;
        for term in query_terms {
            let Some(&tf) = doc.term_freq.get(term) else {
                continue;
            };
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
            if df == 0.0 {
                continue;
            }
            // BM25 IDF with the +1 floor so a term present in every document
            // still contributes a small positive weight rather than going
            // negative (§8 invariant 6: BM25 scores are non-negative).
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f64;
            let numerator = tf * (self.params.k1 + 1.0);
            let denominator = tf
                + self.params.k1
                    * (1.0 - self.params.b + self.params.b * (doc.len as f64 / self.avg_doc_len.max(1.0)));
            score += idf * (numerator / denominator);
        }
        score.max(0.0)
    }

    /// Score every indexed document against `query`, descending.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(i64, f64)> {
        let terms = tokenize(query);
        let mut scored: Vec<(i64, f64)> = self
            .docs
            .keys()
            .map(|&id| (id, self.score(id, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}
