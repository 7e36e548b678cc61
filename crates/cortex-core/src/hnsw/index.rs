//! HNSW graph: insert, search, save, load (§4.4).

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::Rng;

use super::format::{self, FORMAT_MAGIC, FORMAT_VERSION};

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_M_MAX0: usize = 32;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_EF_SEARCH: usize = 50;

/// HNSW-local error type (§7, §10).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("format mismatch: {0}")]
    FormatMismatch(String),
    #[error("dimension mismatch: index is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HnswResult<T> = std::result::Result<T, HnswError>;

impl From<HnswError> for crate::error::CoreError {
    fn from(e: HnswError) -> Self {
        match e {
            HnswError::FormatMismatch(s) => crate::error::CoreError::FormatMismatch(s),
            HnswError::DimensionMismatch { expected, got } => crate::error::CoreError::FormatMismatch(
                format!("dimension mismatch: index is {expected}, got {got}"),
            ),
            HnswError::Io(e) => crate::error::CoreError::Io(e),
        }
    }
}

/// Construction/search parameters (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            m_max0: DEFAULT_M_MAX0,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

impl HnswParams {
    /// `level_mult = 1 / ln(M)` (§4.4).
    fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

struct Node {
    id: i64,
    vector: Vec<f32>,
    /// `friends[layer]` = neighbor indices into `Index::nodes`.
    friends: Vec<Vec<usize>>,
}

/// In-memory HNSW graph over f32 vectors of fixed dimension (§4.4).
///
/// Not `Sync` on its own; callers serialize writers behind a `RwLock`
/// per the concurrency model in §5.
pub struct Index {
    dims: usize,
    params: HnswParams,
    nodes: Vec<Node>,
    id_to_idx: HashMap<i64, usize>,
    entry_point: Option<usize>,
    max_level: usize,
}

#[derive(PartialEq)]
struct ScoredCandidate {
    dist: f32,
    idx: usize,
}
impl Eq for ScoredCandidate {}
impl Ord for ScoredCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

impl Index {
    pub fn new(dims: usize, params: HnswParams) -> Self {
        Self {
            dims,
            params,
            nodes: Vec::new(),
            id_to_idx: HashMap::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub fn with_defaults(dims: usize) -> Self {
        Self::new(dims, HnswParams::default())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn contains(&self, id: i64) -> bool {
        self.id_to_idx.contains_key(&id)
    }

    /// Distance used internally: `1 - cosine_similarity` so smaller is closer.
    fn dist(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - cosine_similarity(a, b)
    }

    fn random_level(&self) -> usize {
        let mult = self.params.level_mult();
        let mut rng = rand::thread_rng();
        let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-r.ln() * mult).floor() as usize
    }

    /// Insert (or replace) a vector under `id` (§4.4 insert algorithm).
    pub fn insert(&mut self, id: i64, vector: &[f32]) -> HnswResult<()> {
        if vector.len() != self.dims {
            return Err(HnswError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        if let Some(&idx) = self.id_to_idx.get(&id) {
            self.remove_idx(idx);
        }

        let level = self.random_level();
        let new_idx = self.nodes.len();
        self.nodes.push(Node {
            id,
            vector: vector.to_vec(),
            friends: vec![Vec::new(); level + 1],
        });
        self.id_to_idx.insert(id, new_idx);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(new_idx);
            self.max_level = level;
            return Ok(());
        };

        let mut cur = entry;
        // Greedy descend from the top layer down to level+1, one best hop per layer.
        for layer in (level + 1..=self.max_level).rev() {
            cur = self.greedy_closest(cur, vector, layer);
        }

        // At each layer 0..=level, beam search for candidates and connect.
        let mut entry_points = vec![cur];
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(vector, &entry_points, self.params.ef_construction, layer);
            let m = if layer == 0 { self.params.m_max0 } else { self.params.m };
            let selected = self.select_neighbors(vector, candidates, m);

            for &neighbor_idx in &selected {
                self.connect(new_idx, neighbor_idx, layer);
                self.connect(neighbor_idx, new_idx, layer);
                self.prune(neighbor_idx, layer);
            }
            entry_points = selected;
            if entry_points.is_empty() {
                entry_points.push(cur);
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(new_idx);
        }
        Ok(())
    }

    fn connect(&mut self, from: usize, to: usize, layer: usize) {
        let node = &mut self.nodes[from];
        if layer >= node.friends.len() {
            node.friends.resize(layer + 1, Vec::new());
        }
        if !node.friends[layer].contains(&to) {
            node.friends[layer].push(to);
        }
    }

    fn prune(&mut self, idx: usize, layer: usize) {
        let m = if layer == 0 { self.params.m_max0 } else { self.params.m };
        if self.nodes[idx].friends.get(layer).map(|f| f.len()).unwrap_or(0) <= m {
            return;
        }
        let vector = self.nodes[idx].vector.clone();
        let mut friends = self.nodes[idx].friends[layer].clone();
        friends.sort_by(|&a, &b| {
            self.dist(&vector, &self.nodes[a].vector)
                .partial_cmp(&self.dist(&vector, &self.nodes[b].vector))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        friends.truncate(m);
        self.nodes[idx].friends[layer] = friends;
    }

    fn greedy_closest(&self, from: usize, query: &[f32], layer: usize) -> usize {
        let mut cur = from;
        let mut cur_dist = self.dist(query, &self.nodes[cur].vector);
        loop {
            let mut improved = false;
            let neighbors = self.nodes[cur].friends.get(layer).cloned().unwrap_or_default();
            for n in neighbors {
                let d = self.dist(query, &self.nodes[n].vector);
                if d < cur_dist {
                    cur_dist = d;
                    cur = n;
                    improved = true;
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    /// Beam search of width `ef` at `layer`, returning candidate indices
    /// ordered by ascending distance.
    fn search_layer(&self, query: &[f32], entry_points: &[usize], ef: usize, layer: usize) -> Vec<usize> {
        let mut visited: HashSet<usize> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<std::cmp::Reverse<ScoredCandidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<ScoredCandidate> = BinaryHeap::new();

        for &ep in entry_points {
            let d = self.dist(query, &self.nodes[ep].vector);
            candidates.push(std::cmp::Reverse(ScoredCandidate { dist: d, idx: ep }));
            results.push(ScoredCandidate { dist: d, idx: ep });
        }

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && results.len() >= ef {
                break;
            }
            let neighbors = self.nodes[current.idx].friends.get(layer).cloned().unwrap_or_default();
            for n in neighbors {
                if visited.insert(n) {
                    let d = self.dist(query, &self.nodes[n].vector);
                    if results.len() < ef {
                        candidates.push(std::cmp::Reverse(ScoredCandidate { dist: d, idx: n }));
                        results.push(ScoredCandidate { dist: d, idx: n });
                    } else if let Some(worst_c) = results.peek() {
                        if d < worst_c.dist {
                            candidates.push(std::cmp::Reverse(ScoredCandidate { dist: d, idx: n }));
                            results.push(ScoredCandidate { dist: d, idx: n });
                            while results.len() > ef {
                                results.pop();
                            }
                        }
                    }
                }
            }
        }

        let mut out: Vec<ScoredCandidate> = results.into_vec();
        out.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap_or(std::cmp::Ordering::Equal));
        out.into_iter().map(|c| c.idx).collect()
    }

    fn select_neighbors(&self, query: &[f32], candidates: Vec<usize>, m: usize) -> Vec<usize> {
        let mut scored: Vec<(f32, usize)> = candidates
            .into_iter()
            .map(|idx| (self.dist(query, &self.nodes[idx].vector), idx))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(m);
        scored.into_iter().map(|(_, idx)| idx).collect()
    }

    fn remove_idx(&mut self, idx: usize) {
        // Soft removal: drop from the id map and unlink from neighbor lists,
        // leaving a tombstone node behind so existing indices stay valid.
        self.id_to_idx.remove(&self.nodes[idx].id);
        for node in &mut self.nodes {
            for layer in &mut node.friends {
                layer.retain(|&n| n != idx);
            }
        }
        self.nodes[idx].friends.clear();
    }

    /// Ordered list of `(id, cosine_similarity)` descending (§4.4).
    pub fn search(&self, query: &[f32], k: usize) -> HnswResult<Vec<(i64, f32)>> {
        if query.len() != self.dims {
            return Err(HnswError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut cur = entry;
        for layer in (1..=self.max_level).rev() {
            cur = self.greedy_closest(cur, query, layer);
        }

        let ef = self.params.ef_search.max(k);
        let candidates = self.search_layer(query, &[cur], ef, 0);
        let mut out: Vec<(i64, f32)> = candidates
            .into_iter()
            .filter(|&idx| !self.id_to_idx.get(&self.nodes[idx].id).map(|&i| i != idx).unwrap_or(true))
            .map(|idx| {
                let sim = cosine_similarity(query, &self.nodes[idx].vector).clamp(-1.0, 1.0);
                (self.nodes[idx].id, sim)
            })
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(k);
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> HnswResult<()> {
        let tmp_path = path.with_extension("idx.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut w = BufWriter::new(file);
            w.write_all(FORMAT_MAGIC)?;
            format::write_u32(&mut w, FORMAT_VERSION)?;
            format::write_u32(&mut w, self.dims as u32)?;
            format::write_u32(&mut w, self.nodes.len() as u32)?;
            format::write_i32(&mut w, self.entry_point.map(|e| e as i32).unwrap_or(-1))?;
            format::write_u32(&mut w, self.max_level as u32)?;
            format::write_u32(&mut w, self.params.m as u32)?;
            format::write_u32(&mut w, self.params.m_max0 as u32)?;
            format::write_u32(&mut w, self.params.ef_construction as u32)?;
            format::write_u32(&mut w, self.params.ef_search as u32)?;

            for node in &self.nodes {
                format::write_i64(&mut w, node.id)?;
                let level = node.friends.len().saturating_sub(1);
                format::write_u32(&mut w, level as u32)?;
                for v in &node.vector {
                    format::write_f32(&mut w, *v)?;
                }
                for layer_friends in &node.friends {
                    format::write_u32(&mut w, layer_friends.len() as u32)?;
                    for &f in layer_friends {
                        format::write_u32(&mut w, f as u32)?;
                    }
                }
            }
            w.flush()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> HnswResult<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != FORMAT_MAGIC {
            return Err(HnswError::FormatMismatch("bad magic".to_string()));
        }
        let version = format::read_u32(&mut r)?;
        if version != FORMAT_VERSION {
            return Err(HnswError::FormatMismatch(format!(
                "unsupported version {version}"
            )));
        }
        let dims = format::read_u32(&mut r)? as usize;
        let node_count = format::read_u32(&mut r)? as usize;
        let entry_point_raw = format::read_i32(&mut r)?;
        let max_level = format::read_u32(&mut r)? as usize;
        let m = format::read_u32(&mut r)? as usize;
        let m_max0 = format::read_u32(&mut r)? as usize;
        let ef_construction = format::read_u32(&mut r)? as usize;
        let ef_search = format::read_u32(&mut r)? as usize;

        let mut nodes = Vec::with_capacity(node_count);
        let mut id_to_idx = HashMap::with_capacity(node_count);
        for idx in 0..node_count {
            let id = format::read_i64(&mut r)?;
            let level = format::read_u32(&mut r)? as usize;
            let mut vector = Vec::with_capacity(dims);
            for _ in 0..dims {
                vector.push(format::read_f32(&mut r)?);
            }
            let mut friends = Vec::with_capacity(level + 1);
            for _ in 0..=level {
                let count = format::read_u32(&mut r)? as usize;
                let mut layer_friends = Vec::with_capacity(count);
                for _ in 0..count {
                    layer_friends.push(format::read_u32(&mut r)? as usize);
                }
                friends.push(layer_friends);
            }
            id_to_idx.insert(id, idx);
            nodes.push(Node { id, vector, friends });
        }

        Ok(Self {
            dims,
            params: HnswParams { m, m_max0, ef_construction, ef_search },
            nodes,
            id_to_idx,
            entry_point: if entry_point_raw < 0 { None } else { Some(entry_point_raw as usize) },
            max_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_vector(dims: usize, seed: u64) -> Vec<f32> {
        (0..dims)
            .map(|i| ((seed as f32 + i as f32) * 0.37).sin())
            .collect()
    }

    #[test]
    fn insert_and_search_finds_self() {
        let mut index = Index::with_defaults(16);
        for i in 0..50i64 {
            index.insert(i, &seeded_vector(16, i as u64)).unwrap();
        }
        let query = seeded_vector(16, 7);
        let results = index.search(&query, 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 7);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut index = Index::with_defaults(8);
        let err = index.insert(1, &[0.0; 4]).unwrap_err();
        assert!(matches!(err, HnswError::DimensionMismatch { .. }));
    }

    #[test]
    fn save_load_round_trip_preserves_top_k() {
        let mut index = Index::with_defaults(12);
        for i in 0..30i64 {
            index.insert(i, &seeded_vector(12, i as u64)).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hnsw.idx");
        index.save(&path).unwrap();
        let loaded = Index::load(&path).unwrap();

        for seed in [0u64, 5, 17, 29] {
            let query = seeded_vector(12, seed);
            let before = index.search(&query, 5).unwrap();
            let after = loaded.search(&query, 5).unwrap();
            let before_ids: Vec<i64> = before.iter().map(|(id, _)| *id).collect();
            let after_ids: Vec<i64> = after.iter().map(|(id, _)| *id).collect();
            assert_eq!(before_ids, after_ids);
        }
    }

    #[test]
    fn bad_magic_is_format_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, b"NOTHNSW!garbage").unwrap();
        let err = Index::load(&path).unwrap_err();
        assert!(matches!(err, HnswError::FormatMismatch(_)));
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let index = Index::with_defaults(4);
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }
}
