//! Embed engine (§4.4, §5): fills in missing memory vectors in adaptive
//! batches, persists the HNSW index, and can run as a cancellable watch loop.

mod lock;

pub use lock::EmbedLock;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::EmbeddingProvider;
use crate::config::CortexConfig;
use crate::error::{CoreError, Result};
use crate::hnsw::Index as HnswIndex;
use crate::model::Embedding;
use crate::store::Store;

/// Options accepted by `EmbedEngine::run_once` (§4.4).
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub batch_size: usize,
    pub adaptive_batching: bool,
    pub health_check_every: u32,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            adaptive_batching: true,
            health_check_every: 5,
        }
    }
}

/// Outcome of one embed pass (§4.4).
#[derive(Debug, Clone, Default)]
pub struct EmbedResult {
    pub embedded: usize,
    pub batches_run: usize,
    pub failures: usize,
    pub final_batch_size: usize,
}

/// Drives embedding of not-yet-vectorized memories, maintaining the HNSW
/// index alongside the store (§4.4).
pub struct EmbedEngine {
    store: Arc<Store>,
    hnsw: Arc<RwLock<Option<HnswIndex>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    lock_path: PathBuf,
    hnsw_path: PathBuf,
}

impl EmbedEngine {
    pub fn new(
        store: Arc<Store>,
        hnsw: Arc<RwLock<Option<HnswIndex>>>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &CortexConfig,
    ) -> Self {
        Self {
            store,
            hnsw,
            embedder,
            lock_path: config.embed_lock_path(),
            hnsw_path: config.hnsw_path(),
        }
    }

    /// Run one embed pass to completion (§4.4 algorithm steps 1-4).
    pub fn run_once(&self, opts: &EmbedOptions) -> Result<EmbedResult> {
        let _lock = EmbedLock::acquire(&self.lock_path)?;

        let mut result = EmbedResult { final_batch_size: opts.batch_size, ..Default::default() };
        let mut batch_size = opts.batch_size;
        let mut consecutive_successes = 0u32;
        let mut backoff = Duration::from_secs(1);
        let mut added_any = false;

        loop {
            let pending = self.store.memories_without_embeddings(batch_size as u32)?;
            if pending.is_empty() {
                break;
            }
            let texts: Vec<String> = pending.iter().map(|m| m.content.clone()).collect();

            match self.embedder.embed(&texts) {
                Ok(vectors) => {
                    for (memory, vector) in pending.iter().zip(vectors.into_iter()) {
                        let normalized = normalize(&vector);
                        self.store.upsert_embedding(&Embedding {
                            memory_id: memory.id,
                            vector: normalized.clone(),
                            model: self.embedder.model_id().to_string(),
                            created_at: chrono::Utc::now(),
                        })?;
                        self.insert_into_hnsw(memory.id, &normalized)?;
                        added_any = true;
                        result.embedded += 1;
                    }
                    result.batches_run += 1;
                    consecutive_successes += 1;
                    backoff = Duration::from_secs(1);
                    if opts.adaptive_batching && consecutive_successes >= 2 {
                        batch_size = (batch_size * 2).min(opts.batch_size);
                        consecutive_successes = 0;
                    }
                    debug!(embedded = pending.len(), batch_size, "embed batch succeeded");
                }
                Err(e) => {
                    result.failures += 1;
                    warn!(error = %e, batch_size, "embed batch failed, backing off");
                    if opts.adaptive_batching {
                        batch_size = (batch_size / 2).max(1);
                        consecutive_successes = 0;
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                    if batch_size == 1 && result.failures > 10 {
                        return Err(CoreError::Transient(format!(
                            "embed pass aborted after repeated failures: {e}"
                        )));
                    }
                }
            }
        }

        result.final_batch_size = batch_size;
        if added_any {
            self.persist_hnsw()?;
        }
        info!(embedded = result.embedded, batches = result.batches_run, "embed pass complete");
        Ok(result)
    }

    /// Run embed passes on a timer until `token` is canceled (§4.4, §5).
    /// Cancellation is treated as clean shutdown, not an error.
    pub async fn watch(
        &self,
        opts: EmbedOptions,
        interval: Duration,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("embed watch loop canceled");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_once(&opts) {
                        warn!(error = %e, "embed watch pass failed");
                    }
                }
            }
        }
    }

    fn insert_into_hnsw(&self, memory_id: i64, vector: &[f32]) -> Result<()> {
        let mut guard = self.hnsw.write().expect("hnsw lock poisoned");
        let index = match guard.as_mut() {
            Some(idx) if idx.dims() == vector.len() => idx,
            _ => {
                *guard = Some(HnswIndex::with_defaults(vector.len()));
                guard.as_mut().unwrap()
            }
        };
        index.insert(memory_id, vector)?;
        Ok(())
    }

    fn persist_hnsw(&self) -> Result<()> {
        let guard = self.hnsw.read().expect("hnsw lock poisoned");
        if let Some(idx) = &*guard {
            idx.save(&self.hnsw_path)?;
        }
        Ok(())
    }

    /// Rebuild the HNSW index from every stored embedding (§4.4), e.g. after
    /// a format mismatch or dimension change is detected.
    pub fn rebuild_hnsw(&self) -> Result<()> {
        let embeddings = self.store.list_embeddings()?;
        let mut index = match embeddings.first() {
            Some(e) => HnswIndex::with_defaults(e.vector.len()),
            None => {
                *self.hnsw.write().expect("hnsw lock poisoned") = None;
                return Ok(());
            }
        };
        for e in &embeddings {
            index.insert(e.memory_id, &e.vector)?;
        }
        index.save(&self.hnsw_path)?;
        *self.hnsw.write().expect("hnsw lock poisoned") = Some(index);
        Ok(())
    }
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector.to_vec()
    } else {
        vector.iter().map(|v| v / norm).collect()
    }
}
